//! Subtitle to plain text conversion.

use crate::{
    config::Srt2TxtConfig,
    error::{Result, StudydocError},
    format::format_timestamp,
    types::Transcript,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    pub remove_timestamps: bool,
    pub combine_sentences: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self::from(&Srt2TxtConfig::default())
    }
}

impl From<&Srt2TxtConfig> for ExtractOptions {
    fn from(config: &Srt2TxtConfig) -> Self {
        Self {
            remove_timestamps: config.remove_timestamps,
            combine_sentences: config.combine_sentences,
        }
    }
}

fn ends_sentence(text: &str) -> bool {
    let trimmed = text.trim_end().trim_end_matches(['"', '\'', ')', '\u{201d}', '\u{2019}']);
    trimmed.ends_with(['.', '?', '!'])
}

/// Lines of output text, one per cue or one per merged sentence.
pub fn extract_lines(transcript: &Transcript, options: ExtractOptions) -> Result<Vec<String>> {
    if transcript.is_empty() {
        return Err(StudydocError::EmptyTranscript);
    }

    let stamp = |seconds: f64, text: String| {
        if options.remove_timestamps {
            text
        } else {
            format!("[{}] {}", format_timestamp(seconds), text)
        }
    };

    if !options.combine_sentences {
        return Ok(transcript
            .cues
            .iter()
            .map(|cue| stamp(cue.start, cue.text.trim().to_string()))
            .collect());
    }

    let mut lines = Vec::new();
    let mut pending: Option<(f64, String)> = None;
    for cue in &transcript.cues {
        let text = cue.text.trim();
        if text.is_empty() {
            continue;
        }
        let (start, mut sentence) = pending.take().unwrap_or((cue.start, String::new()));
        if !sentence.is_empty() {
            sentence.push(' ');
        }
        sentence.push_str(text);
        if ends_sentence(&sentence) {
            lines.push(stamp(start, sentence));
        } else {
            pending = Some((start, sentence));
        }
    }
    // A trailing fragment without terminal punctuation is flushed as-is
    if let Some((start, sentence)) = pending {
        lines.push(stamp(start, sentence));
    }
    Ok(lines)
}

/// Plain text for a transcript, lines separated by newlines.
pub fn extract(transcript: &Transcript, options: ExtractOptions) -> Result<String> {
    let mut text = extract_lines(transcript, options)?.join("\n");
    text.push('\n');
    Ok(text)
}
