use crate::{config::Txt2MdConfig, types::StructuredDocument};

/// Format seconds as HH:MM:SS timestamp
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkdownOptions {
    pub include_summary: bool,
    pub include_key_points: bool,
    pub include_timestamps: bool,
}

impl From<&Txt2MdConfig> for MarkdownOptions {
    fn from(config: &Txt2MdConfig) -> Self {
        Self {
            include_summary: config.include_summary,
            include_key_points: config.include_key_points,
            include_timestamps: config.include_timestamps,
        }
    }
}

impl Default for MarkdownOptions {
    fn default() -> Self {
        Self::from(&Txt2MdConfig::default())
    }
}

fn is_srt_timing_line(line: &str) -> bool {
    let Some((start, end)) = line.split_once("-->") else {
        return false;
    };
    let looks_like_time = |s: &str| {
        let s = s.trim();
        !s.is_empty()
            && s.contains(':')
            && s.chars().all(|c| c.is_ascii_digit() || matches!(c, ':' | ',' | '.'))
    };
    looks_like_time(start) && end.split_whitespace().next().is_some_and(looks_like_time)
}

/// Length of a leading `[HH:MM:SS]` / `[MM:SS]` marker, including trailing spaces.
fn bracket_marker_len(line: &str) -> Option<usize> {
    let rest = line.strip_prefix('[')?;
    let close = rest.find(']')?;
    let inner = &rest[..close];
    let is_time = inner.contains(':')
        && inner
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ':' | ',' | '.'));
    if !is_time {
        return None;
    }
    let after = &rest[close + 1..];
    Some(1 + close + 1 + (after.len() - after.trim_start().len()))
}

/// Remove timing markers a transcript may still carry: bracketed clock
/// prefixes and SRT timing lines.
pub fn strip_timing_markers(text: &str) -> String {
    text.lines()
        .filter(|line| !is_srt_timing_line(line))
        .map(|line| match bracket_marker_len(line) {
            Some(len) => &line[len..],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render a structured document as markdown.
///
/// Layout: `# title`, optional `## Summary`, optional `## Key Points`, then one
/// `##` section per body part.
pub fn to_markdown(doc: &StructuredDocument, options: MarkdownOptions) -> String {
    let mut output = String::new();

    output.push_str(&format!("# {}\n\n", doc.title.trim()));

    if options.include_summary && !doc.summary.trim().is_empty() {
        output.push_str("## Summary\n\n");
        output.push_str(doc.summary.trim());
        output.push_str("\n\n");
    }

    if options.include_key_points && !doc.key_points.is_empty() {
        output.push_str("## Key Points\n\n");
        for point in &doc.key_points {
            output.push_str(&format!("- {}\n", point.trim()));
        }
        output.push('\n');
    }

    for section in &doc.body_sections {
        let heading = match section.heading.trim() {
            "" => "Transcript",
            heading => heading,
        };
        output.push_str(&format!("## {}\n\n", heading));
        let text = if options.include_timestamps {
            section.text.trim().to_string()
        } else {
            strip_timing_markers(section.text.trim())
        };
        output.push_str(&text);
        output.push_str("\n\n");
    }

    let trimmed = output.trim_end().len();
    output.truncate(trimmed);
    output.push('\n');
    output
}
