use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// One timed subtitle entry. Times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleCue {
    pub index: u32,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Ordered cues for one unit, ascending by `start`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub cues: Vec<SubtitleCue>,
}

impl Transcript {
    pub fn new(cues: Vec<SubtitleCue>) -> Self {
        Self { cues }
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub sequence_number: usize,
    pub content: String,
    pub approx_size: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChunkSummary {
    pub sequence_number: usize,
    pub summary: String,
    pub key_points: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodySection {
    pub heading: String,
    pub text: String,
}

/// Output of summarization, input of markdown assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredDocument {
    pub title: String,
    pub summary: String,
    pub key_points: Vec<String>,
    pub body_sections: Vec<BodySection>,
}

/// Artifacts a unit can have on disk, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactKind {
    Video,
    Subtitle,
    Text,
    Markdown,
    Document,
}

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm"];

impl ArtifactKind {
    /// Canonical extension used when this artifact is written.
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Video => "mp4",
            ArtifactKind::Subtitle => "srt",
            ArtifactKind::Text => "txt",
            ArtifactKind::Markdown => "md",
            ArtifactKind::Document => "docx",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_lowercase();
        match ext.as_str() {
            "srt" => Some(ArtifactKind::Subtitle),
            "txt" => Some(ArtifactKind::Text),
            "md" => Some(ArtifactKind::Markdown),
            "docx" => Some(ArtifactKind::Document),
            e if VIDEO_EXTENSIONS.contains(&e) => Some(ArtifactKind::Video),
            _ => None,
        }
    }
}

/// User-selectable steps, as named on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Srt2Txt,
    Txt2Md,
    Md2Docx,
}

impl Step {
    pub const ALL: [Step; 3] = [Step::Srt2Txt, Step::Txt2Md, Step::Md2Docx];

    pub fn output(&self) -> ArtifactKind {
        match self {
            Step::Srt2Txt => ArtifactKind::Text,
            Step::Txt2Md => ArtifactKind::Markdown,
            Step::Md2Docx => ArtifactKind::Document,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Step::Srt2Txt => "srt2txt",
            Step::Txt2Md => "txt2md",
            Step::Md2Docx => "md2docx",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "srt2txt" => Ok(Step::Srt2Txt),
            "txt2md" => Ok(Step::Txt2Md),
            "md2docx" => Ok(Step::Md2Docx),
            other => Err(format!("unknown step '{other}'")),
        }
    }
}

/// Requested steps: everything, or an explicit subset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StepSelection {
    #[default]
    All,
    Only(BTreeSet<Step>),
}

impl StepSelection {
    pub fn only(steps: impl IntoIterator<Item = Step>) -> Self {
        StepSelection::Only(steps.into_iter().collect())
    }

    pub fn includes(&self, step: Step) -> bool {
        match self {
            StepSelection::All => true,
            StepSelection::Only(steps) => steps.contains(&step),
        }
    }

    /// Requested steps in pipeline order.
    pub fn steps(&self) -> Vec<Step> {
        Step::ALL.into_iter().filter(|s| self.includes(*s)).collect()
    }
}

impl fmt::Display for StepSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepSelection::All => f.write_str("all"),
            StepSelection::Only(_) => {
                let names: Vec<&str> = self.steps().iter().map(|s| s.name()).collect();
                f.write_str(&names.join(" -> "))
            }
        }
    }
}

/// Internal stages a unit passes through. Finer grained than [`Step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Transcribe,
    Extract,
    Summarize,
    Assemble,
    Render,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Transcribe => "transcribe",
            Stage::Extract => "extract",
            Stage::Summarize => "summarize",
            Stage::Assemble => "assemble",
            Stage::Render => "render",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Pending,
    TranscriptReady,
    TextReady,
    DocumentReady,
    RenderedReady,
    Done,
    Failed(Stage),
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitState::Pending => f.write_str("pending"),
            UnitState::TranscriptReady => f.write_str("transcript ready"),
            UnitState::TextReady => f.write_str("text ready"),
            UnitState::DocumentReady => f.write_str("document ready"),
            UnitState::RenderedReady => f.write_str("rendered"),
            UnitState::Done => f.write_str("done"),
            UnitState::Failed(stage) => write!(f, "failed ({stage})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_orders_steps() {
        let sel = StepSelection::only([Step::Md2Docx, Step::Srt2Txt]);
        assert_eq!(sel.steps(), vec![Step::Srt2Txt, Step::Md2Docx]);
        assert!(!sel.includes(Step::Txt2Md));
        assert!(StepSelection::All.includes(Step::Txt2Md));
    }

    #[test]
    fn parses_step_names() {
        assert_eq!("TXT2MD".parse::<Step>(), Ok(Step::Txt2Md));
        assert!("docx".parse::<Step>().is_err());
    }

    #[test]
    fn kinds_follow_pipeline_order() {
        assert!(ArtifactKind::Video < ArtifactKind::Subtitle);
        assert!(ArtifactKind::Markdown < ArtifactKind::Document);
        assert_eq!(ArtifactKind::from_extension("MKV"), Some(ArtifactKind::Video));
        assert_eq!(ArtifactKind::from_extension("wav"), None);
    }
}
