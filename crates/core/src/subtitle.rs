//! SubRip (`.srt`) reading and writing.

use crate::types::{SubtitleCue, Transcript};

/// Parse `HH:MM:SS,mmm` (a `.` separator is accepted too) into seconds.
pub fn parse_srt_timestamp(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let mut parts = raw.split(':');
    let hours: u64 = parts.next()?.trim().parse().ok()?;
    let minutes: u64 = parts.next()?.trim().parse().ok()?;
    let rest = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let (secs, millis) = rest.split_once([',', '.']).unwrap_or((rest, "0"));
    let secs: u64 = secs.trim().parse().ok()?;
    let millis: u64 = millis.trim().parse().ok()?;
    if minutes >= 60 || secs >= 60 || millis >= 1000 {
        return None;
    }
    Some((hours * 3600 + minutes * 60 + secs) as f64 + millis as f64 / 1000.0)
}

/// Format seconds as an SRT timestamp, `HH:MM:SS,mmm`.
pub fn format_srt_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Remove markup tags and collapse whitespace runs.
pub fn clean_cue_text(text: &str) -> String {
    let mut stripped = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => stripped.push(ch),
            _ => {}
        }
    }
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse SRT content into a transcript ordered by start time.
///
/// Cues whose text is empty after cleaning are dropped, and so are cues that
/// last no time at all. Blocks without a timing line are ignored; a timing
/// line that does not parse, or ends before it starts, is an error.
pub fn parse_srt(content: &str) -> Result<Transcript, String> {
    let content = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut cues = Vec::new();
    let mut block: Vec<&str> = Vec::new();
    let mut block_no = 0usize;

    let lines = content.lines().chain(std::iter::once(""));
    for line in lines {
        if !line.trim().is_empty() {
            block.push(line);
            continue;
        }
        if block.is_empty() {
            continue;
        }
        block_no += 1;
        if let Some(cue) = parse_block(&block, cues.len() as u32 + 1)
            .map_err(|reason| format!("block {block_no}: {reason}"))?
        {
            cues.push(cue);
        }
        block.clear();
    }

    cues.sort_by(|a: &SubtitleCue, b: &SubtitleCue| a.start.total_cmp(&b.start));
    Ok(Transcript::new(cues))
}

fn parse_block(block: &[&str], fallback_index: u32) -> Result<Option<SubtitleCue>, String> {
    let Some(timing_pos) = block.iter().position(|l| l.contains("-->")) else {
        return Ok(None);
    };
    let index = match timing_pos {
        0 => fallback_index,
        _ => block[0].trim().parse().unwrap_or(fallback_index),
    };

    let (start_raw, end_raw) = block[timing_pos]
        .split_once("-->")
        .ok_or_else(|| "missing '-->'".to_string())?;
    // Positioning hints may follow the end time
    let end_raw = end_raw.split_whitespace().next().unwrap_or_default();
    let start = parse_srt_timestamp(start_raw)
        .ok_or_else(|| format!("bad start time '{}'", start_raw.trim()))?;
    let end =
        parse_srt_timestamp(end_raw).ok_or_else(|| format!("bad end time '{}'", end_raw))?;
    if end < start {
        return Err(format!(
            "cue ends before it starts ({} --> {})",
            start_raw.trim(),
            end_raw
        ));
    }
    if end == start {
        return Ok(None);
    }

    let text = clean_cue_text(&block[timing_pos + 1..].join(" "));
    if text.is_empty() {
        return Ok(None);
    }
    Ok(Some(SubtitleCue {
        index,
        start,
        end,
        text,
    }))
}

/// Serialize a transcript as SRT, renumbering cues from 1.
pub fn format_srt(transcript: &Transcript) -> String {
    let mut out = String::new();
    for (i, cue) in transcript.cues.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            format_srt_timestamp(cue.start),
            format_srt_timestamp(cue.end),
            cue.text.trim()
        ));
    }
    out
}
