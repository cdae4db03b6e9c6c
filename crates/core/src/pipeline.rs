//! Drives each unit through its stages and collects a batch report.

use std::{path::PathBuf, sync::Arc};

use crate::{
    backend::{CompletionBackend, CompletionClient},
    config::Config,
    error::{Result, StageFailure, StudydocError},
    extract::{ExtractOptions, extract},
    format::{MarkdownOptions, to_markdown},
    render::{RenderOptions, Renderer, to_rendered_document},
    stage_io::{StageIo, Unit, read_text, write_atomic},
    subtitle::{format_srt, parse_srt},
    summarize::Summarizer,
    transcribe::Transcriber,
    types::{ArtifactKind, Stage, Step, StepSelection, Transcript, UnitState},
};

/// The external collaborators a pipeline calls out to.
#[derive(Clone)]
pub struct Services {
    pub transcriber: Arc<dyn Transcriber>,
    pub backend: Arc<dyn CompletionBackend>,
    pub renderer: Arc<dyn Renderer>,
}

#[derive(Debug)]
pub struct UnitOutcome {
    pub unit_id: String,
    pub source: PathBuf,
    pub state: UnitState,
    /// Stages that did work in this run.
    pub ran: Vec<Stage>,
    /// Stages satisfied by an artifact already on disk.
    pub skipped: Vec<Stage>,
    pub error: Option<StageFailure>,
}

impl UnitOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self.state, UnitState::Failed(_))
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<UnitOutcome>,
}

impl BatchReport {
    pub fn push(&mut self, outcome: UnitOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_failed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }

    /// Units that finished without doing any work.
    pub fn up_to_date(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| !o.is_failed() && o.ran.is_empty())
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }
}

/// Where the transcript for the extract stage comes from.
enum TranscriptSource {
    Artifact(PathBuf),
    Fresh(Transcript),
}

fn fail(stage: Stage) -> impl FnOnce(StudydocError) -> StageFailure {
    move |source| StageFailure { stage, source }
}

pub struct Pipeline {
    io: StageIo,
    services: Services,
    summarizer: Summarizer,
    extract_text_only: bool,
    extract_options: ExtractOptions,
    markdown_options: MarkdownOptions,
    render_options: RenderOptions,
}

impl Pipeline {
    pub fn new(config: &Config, services: Services, io: StageIo) -> Self {
        let client = CompletionClient::new(services.backend.clone(), &config.backend);
        Self {
            summarizer: Summarizer::new(client, config),
            extract_text_only: config.processing.srt2txt.extract_text_only,
            extract_options: ExtractOptions::from(&config.processing.srt2txt),
            markdown_options: MarkdownOptions::from(&config.processing.txt2md),
            render_options: RenderOptions::from(&config.processing.md2docx),
            io,
            services,
        }
    }

    /// Process every unit in order. A failing unit never stops the batch.
    pub async fn run(&self, units: &[Unit], selection: &StepSelection) -> BatchReport {
        let mut report = BatchReport::default();
        for unit in units {
            report.push(self.process_unit(unit, selection).await);
        }
        report
    }

    pub async fn process_unit(&self, unit: &Unit, selection: &StepSelection) -> UnitOutcome {
        let mut outcome = UnitOutcome {
            unit_id: unit.id.clone(),
            source: unit.source.clone(),
            state: UnitState::Pending,
            ran: Vec::new(),
            skipped: Vec::new(),
            error: None,
        };

        match self.advance(unit, selection, &mut outcome).await {
            Ok(()) => {
                outcome.state = UnitState::Done;
                tracing::info!(
                    unit = %unit.id,
                    ran = outcome.ran.len(),
                    skipped = outcome.skipped.len(),
                    "Unit done"
                );
            }
            Err(failure) => {
                tracing::error!(unit = %unit.id, stage = %failure.stage, error = %failure.source, "Unit failed");
                outcome.state = UnitState::Failed(failure.stage);
                outcome.error = Some(failure);
            }
        }
        outcome
    }

    async fn advance(
        &self,
        unit: &Unit,
        selection: &StepSelection,
        outcome: &mut UnitOutcome,
    ) -> std::result::Result<(), StageFailure> {
        for step in unit.applicable_steps(selection) {
            let run = self.io.should_run(unit, step, selection);
            match step {
                Step::Srt2Txt => {
                    if run {
                        let source = self.obtain_transcript(unit, outcome).await?;
                        outcome.state = UnitState::TranscriptReady;
                        self.write_text(unit, source).await.map_err(fail(Stage::Extract))?;
                        outcome.ran.push(Stage::Extract);
                    } else {
                        tracing::debug!(unit = %unit.id, stage = %Stage::Extract, "Text exists, skipping");
                        outcome.skipped.push(Stage::Extract);
                    }
                    outcome.state = UnitState::TextReady;
                }
                Step::Txt2Md => {
                    if run {
                        self.write_markdown(unit, outcome).await?;
                    } else {
                        tracing::debug!(unit = %unit.id, stage = %Stage::Summarize, "Markdown exists, skipping");
                        outcome.skipped.push(Stage::Summarize);
                        outcome.skipped.push(Stage::Assemble);
                    }
                    outcome.state = UnitState::DocumentReady;
                }
                Step::Md2Docx => {
                    if run {
                        self.write_document(unit).await.map_err(fail(Stage::Render))?;
                        outcome.ran.push(Stage::Render);
                    } else {
                        tracing::debug!(unit = %unit.id, stage = %Stage::Render, "Document exists, skipping");
                        outcome.skipped.push(Stage::Render);
                    }
                    outcome.state = UnitState::RenderedReady;
                }
            }
        }
        Ok(())
    }

    /// Subtitle presence alone decides whether a video is transcribed again.
    async fn obtain_transcript(
        &self,
        unit: &Unit,
        outcome: &mut UnitOutcome,
    ) -> std::result::Result<TranscriptSource, StageFailure> {
        let subtitle = self.io.resolve_stage(unit, ArtifactKind::Subtitle);
        if unit.source_kind != ArtifactKind::Video {
            return self
                .io
                .require(unit, ArtifactKind::Subtitle)
                .map(TranscriptSource::Artifact)
                .map_err(fail(Stage::Transcribe));
        }
        if subtitle.exists && !self.io.force() {
            tracing::debug!(unit = %unit.id, stage = %Stage::Transcribe, "Subtitle exists, skipping");
            outcome.skipped.push(Stage::Transcribe);
            return Ok(TranscriptSource::Artifact(subtitle.path));
        }

        tracing::info!(unit = %unit.id, stage = %Stage::Transcribe, "Transcribing");
        let transcript = self
            .services
            .transcriber
            .transcribe(&unit.source)
            .await
            .map_err(fail(Stage::Transcribe))?;
        outcome.ran.push(Stage::Transcribe);

        // An empty transcript is left for extraction to reject, never persisted
        if !transcript.is_empty() {
            write_atomic(&subtitle.path, format_srt(&transcript))
                .await
                .map_err(fail(Stage::Transcribe))?;
        }
        Ok(TranscriptSource::Fresh(transcript))
    }

    async fn write_text(&self, unit: &Unit, source: TranscriptSource) -> Result<()> {
        let (transcript, raw) = match source {
            TranscriptSource::Fresh(transcript) => (transcript, None),
            TranscriptSource::Artifact(path) => {
                let raw = read_text(&path).await?;
                let transcript = parse_srt(&raw).map_err(|reason| StudydocError::SubtitleParse {
                    path: path.clone(),
                    reason,
                })?;
                (transcript, Some(raw))
            }
        };

        let text = if self.extract_text_only {
            extract(&transcript, self.extract_options)?
        } else if transcript.is_empty() {
            return Err(StudydocError::EmptyTranscript);
        } else {
            raw.unwrap_or_else(|| format_srt(&transcript))
        };

        let path = self.io.artifact_path(unit, ArtifactKind::Text);
        write_atomic(&path, text).await?;
        tracing::info!(unit = %unit.id, stage = %Stage::Extract, path = %path.display(), "Text written");
        Ok(())
    }

    async fn write_markdown(
        &self,
        unit: &Unit,
        outcome: &mut UnitOutcome,
    ) -> std::result::Result<(), StageFailure> {
        let text_path = self
            .io
            .require(unit, ArtifactKind::Text)
            .map_err(fail(Stage::Summarize))?;
        let body = read_text(&text_path).await.map_err(fail(Stage::Summarize))?;

        let document = self
            .summarizer
            .summarize(&unit.id, &body)
            .await
            .map_err(fail(Stage::Summarize))?;
        outcome.ran.push(Stage::Summarize);

        let markdown = to_markdown(&document, self.markdown_options);
        let path = self.io.artifact_path(unit, ArtifactKind::Markdown);
        write_atomic(&path, markdown)
            .await
            .map_err(fail(Stage::Assemble))?;
        outcome.ran.push(Stage::Assemble);
        tracing::info!(unit = %unit.id, stage = %Stage::Assemble, path = %path.display(), "Markdown written");
        Ok(())
    }

    async fn write_document(&self, unit: &Unit) -> Result<()> {
        let markdown_path = self.io.require(unit, ArtifactKind::Markdown)?;
        let markdown = read_text(&markdown_path).await?;
        let bytes = to_rendered_document(
            self.services.renderer.as_ref(),
            &markdown,
            &self.render_options,
        )
        .await?;

        let path = self.io.artifact_path(unit, ArtifactKind::Document);
        write_atomic(&path, bytes).await?;
        tracing::info!(unit = %unit.id, stage = %Stage::Render, path = %path.display(), "Document written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(state: UnitState, ran: Vec<Stage>) -> UnitOutcome {
        UnitOutcome {
            unit_id: "u".into(),
            source: PathBuf::from("u.srt"),
            state,
            ran,
            skipped: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn report_counts_states() {
        let mut report = BatchReport::default();
        report.push(outcome(UnitState::Done, vec![Stage::Extract]));
        report.push(outcome(UnitState::Done, vec![]));
        report.push(outcome(UnitState::Failed(Stage::Summarize), vec![Stage::Extract]));

        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.up_to_date(), 1);
        assert!(report.has_failures());
        assert!(!BatchReport::default().has_failures());
    }
}
