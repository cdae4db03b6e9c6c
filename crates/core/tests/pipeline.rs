use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use studydoc_core::{
    BackendError, CompletionBackend, Config, Pipeline, Prompt, RenderOptions, Renderer, Services,
    Stage, StageIo, Step, StepSelection, StudydocError, Transcriber, Transcript, UnitState,
    discover_units, types::SubtitleCue,
};
use tempfile::TempDir;

const POISON: &str = "POISONED";

struct FakeTranscriber {
    calls: AtomicUsize,
    transcript: Transcript,
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _video_path: &Path) -> studydoc_core::Result<Transcript> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.transcript.clone())
    }
}

/// Answers with a fixed JSON summary, or a transient error when the
/// prompt contains [`POISON`].
#[derive(Default)]
struct FakeBackend {
    calls: AtomicUsize,
}

#[async_trait]
impl CompletionBackend for FakeBackend {
    async fn complete(
        &self,
        prompt: &Prompt,
        _max_tokens: u32,
        _timeout: Duration,
    ) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if prompt.user.contains(POISON) {
            return Err(BackendError::Transient("HTTP 503: overloaded".into()));
        }
        Ok(serde_json::json!({
            "summary": "The lecturer explains caching",
            "key_points": ["Use caching", "use caching.", "Optimize queries"],
        })
        .to_string())
    }
}

#[derive(Default)]
struct FakeRenderer {
    calls: AtomicUsize,
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn render(
        &self,
        markdown: &str,
        _options: &RenderOptions,
    ) -> studydoc_core::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("DOCX\n{markdown}").into_bytes())
    }
}

struct Harness {
    transcriber: Arc<FakeTranscriber>,
    backend: Arc<FakeBackend>,
    renderer: Arc<FakeRenderer>,
    pipeline: Pipeline,
}

impl Harness {
    fn new(config: &Config, output: &Path, force: bool, transcript: Transcript) -> Self {
        let transcriber = Arc::new(FakeTranscriber {
            calls: AtomicUsize::new(0),
            transcript,
        });
        let backend = Arc::new(FakeBackend::default());
        let renderer = Arc::new(FakeRenderer::default());
        let services = Services {
            transcriber: transcriber.clone(),
            backend: backend.clone(),
            renderer: renderer.clone(),
        };
        let pipeline = Pipeline::new(
            config,
            services,
            StageIo::new(Some(output.to_path_buf()), force),
        );
        Self {
            transcriber,
            backend,
            renderer,
            pipeline,
        }
    }

    fn external_calls(&self) -> (usize, usize, usize) {
        (
            self.transcriber.calls.load(Ordering::SeqCst),
            self.backend.calls.load(Ordering::SeqCst),
            self.renderer.calls.load(Ordering::SeqCst),
        )
    }
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.backend.retry.initial_backoff_ms = 1;
    config.backend.retry.max_backoff_ms = 2;
    config
}

fn spoken() -> Transcript {
    Transcript::new(vec![
        SubtitleCue {
            index: 1,
            start: 0.0,
            end: 1.5,
            text: "Caching keeps".into(),
        },
        SubtitleCue {
            index: 2,
            start: 1.5,
            end: 3.0,
            text: "hot data close.".into(),
        },
    ])
}

fn srt(lines: &[&str]) -> String {
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            format!(
                "{}\n00:00:{:02},000 --> 00:00:{:02},500\n{}\n",
                i + 1,
                i * 2,
                i * 2 + 1,
                line
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn write(path: &Path, contents: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut files = BTreeMap::new();
    for entry in std::fs::read_dir(dir).unwrap().flatten() {
        let path = entry.path();
        if path.is_dir() {
            files.extend(snapshot(&path));
        } else {
            files.insert(path.clone(), std::fs::read(&path).unwrap());
        }
    }
    files
}

#[tokio::test]
async fn second_run_is_a_no_op() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    write(&input.join("a.mp4"), "not really a video");
    write(&input.join("week1/b.srt"), &srt(&["Hello", "world."]));
    let config = fast_config();
    let units = discover_units(&input, &StepSelection::All, Some(&output)).unwrap();
    assert_eq!(units.len(), 2);

    let first = Harness::new(&config, &output, false, spoken());
    let report = first.pipeline.run(&units, &StepSelection::All).await;
    assert!(!report.has_failures());
    assert!(report.outcomes.iter().all(|o| o.state == UnitState::Done));
    assert_eq!(first.external_calls(), (1, 2, 2));

    for name in ["a.srt", "a.txt", "a.md", "a.docx", "week1/b.txt", "week1/b.md", "week1/b.docx"] {
        assert!(output.join(name).is_file(), "missing {name}");
    }
    assert_eq!(
        std::fs::read_to_string(output.join("week1/b.txt")).unwrap(),
        "Hello world.\n"
    );
    let markdown = std::fs::read_to_string(output.join("a.md")).unwrap();
    assert!(markdown.starts_with("# a\n\n## Summary\n\nThe lecturer explains caching\n"));
    assert!(markdown.contains("## Key Points\n\n- Use caching\n- Optimize queries\n"));
    assert!(markdown.contains("## Transcript\n\nCaching keeps hot data close.\n"));

    let before = snapshot(&output);
    let second = Harness::new(&config, &output, false, spoken());
    let report = second.pipeline.run(&units, &StepSelection::All).await;
    assert!(!report.has_failures());
    assert_eq!(report.up_to_date(), 2);
    assert_eq!(second.external_calls(), (0, 0, 0));
    assert_eq!(snapshot(&output), before);
}

#[tokio::test]
async fn existing_subtitle_skips_transcription() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    write(&input.join("talk.mkv"), "video");
    write(&output.join("talk.srt"), &srt(&["Already", "transcribed."]));

    let units = discover_units(&input, &StepSelection::All, Some(&output)).unwrap();
    let harness = Harness::new(&fast_config(), &output, false, spoken());
    let report = harness.pipeline.run(&units, &StepSelection::All).await;

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.state, UnitState::Done);
    assert!(outcome.skipped.contains(&Stage::Transcribe));
    assert_eq!(harness.transcriber.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        std::fs::read_to_string(output.join("talk.txt")).unwrap(),
        "Already transcribed.\n"
    );
}

#[tokio::test]
async fn failing_unit_does_not_stop_the_batch() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    write(&input.join("u1.srt"), &srt(&["First lecture."]));
    write(&input.join("u2.srt"), &srt(&[POISON, "lecture."]));
    write(&input.join("u3.srt"), &srt(&["Third lecture."]));

    let config = fast_config();
    let units = discover_units(&input, &StepSelection::All, Some(&output)).unwrap();
    let harness = Harness::new(&config, &output, false, spoken());
    let report = harness.pipeline.run(&units, &StepSelection::All).await;

    let states: Vec<UnitState> = report.outcomes.iter().map(|o| o.state).collect();
    assert_eq!(
        states,
        vec![
            UnitState::Done,
            UnitState::Failed(Stage::Summarize),
            UnitState::Done
        ]
    );
    assert!(report.has_failures());
    assert_eq!(report.failed(), 1);

    let failure = report.outcomes[1].error.as_ref().unwrap();
    assert!(matches!(
        failure.source,
        StudydocError::Summarization { chunk: 0, .. }
    ));
    // one call per healthy unit plus every retry of the poisoned one
    assert_eq!(
        harness.backend.calls.load(Ordering::SeqCst),
        2 + config.backend.retry.max_attempts as usize
    );
    assert!(output.join("u2.txt").is_file());
    assert!(!output.join("u2.md").exists());
    assert!(!output.join("u2.docx").exists());
    assert!(output.join("u3.docx").is_file());
}

#[tokio::test]
async fn empty_transcript_halts_before_summarization() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    write(&input.join("silent.mp4"), "video");

    let units = discover_units(&input, &StepSelection::All, Some(&output)).unwrap();
    let harness = Harness::new(&fast_config(), &output, false, Transcript::default());
    let report = harness.pipeline.run(&units, &StepSelection::All).await;

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.state, UnitState::Failed(Stage::Extract));
    assert!(matches!(
        outcome.error.as_ref().unwrap().source,
        StudydocError::EmptyTranscript
    ));
    assert_eq!(harness.external_calls(), (1, 0, 0));
    assert!(!output.join("silent.srt").exists());
    assert!(!output.join("silent.txt").exists());
}

#[tokio::test]
async fn force_recomputes_existing_artifacts() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    write(&input.join("a.mp4"), "video");
    let config = fast_config();
    let units = discover_units(&input, &StepSelection::All, Some(&output)).unwrap();

    let first = Harness::new(&config, &output, false, spoken());
    first.pipeline.run(&units, &StepSelection::All).await;

    let forced = Harness::new(&config, &output, true, spoken());
    let report = forced.pipeline.run(&units, &StepSelection::All).await;
    assert!(!report.has_failures());
    assert_eq!(forced.external_calls(), (1, 1, 1));
}

#[tokio::test]
async fn only_requested_steps_run() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    write(&input.join("a.srt"), &srt(&["Only", "text."]));

    let config = fast_config();
    let text_only = StepSelection::only([Step::Srt2Txt]);
    let units = discover_units(&input, &text_only, Some(&output)).unwrap();
    let harness = Harness::new(&config, &output, false, spoken());
    let report = harness.pipeline.run(&units, &text_only).await;

    assert_eq!(report.outcomes[0].state, UnitState::Done);
    assert!(output.join("a.txt").is_file());
    assert!(!output.join("a.md").exists());
    assert_eq!(harness.external_calls(), (0, 0, 0));

    // The next run picks up where the first stopped
    let rest = StepSelection::only([Step::Txt2Md, Step::Md2Docx]);
    let units = discover_units(&input, &rest, Some(&output)).unwrap();
    let report = harness.pipeline.run(&units, &rest).await;
    assert_eq!(report.outcomes[0].state, UnitState::Done);
    assert!(output.join("a.docx").is_file());
    assert_eq!(harness.external_calls(), (0, 1, 1));
}

#[tokio::test]
async fn rendering_without_markdown_fails_the_unit() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    write(&input.join("a.srt"), &srt(&["Hello."]));

    let render_only = StepSelection::only([Step::Md2Docx]);
    let units = discover_units(&input, &render_only, Some(&output)).unwrap();
    let harness = Harness::new(&fast_config(), &output, false, spoken());
    let report = harness.pipeline.run(&units, &render_only).await;

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.state, UnitState::Failed(Stage::Render));
    assert!(matches!(
        outcome.error.as_ref().unwrap().source,
        StudydocError::MissingInput { .. }
    ));
    assert_eq!(harness.renderer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn long_text_is_summarized_in_parts() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    let paragraph = "Caches trade memory for latency and need an eviction policy. ".repeat(6);
    let body = [paragraph.trim(), paragraph.trim(), paragraph.trim()].join("\n\n");
    write(&input.join("notes.txt"), &body);

    let mut config = fast_config();
    config.backend.chunk_chars = 2_000;
    let selection = StepSelection::only([Step::Txt2Md]);
    let units = discover_units(&input, &selection, Some(&output)).unwrap();
    let harness = Harness::new(&config, &output, false, spoken());
    let report = harness.pipeline.run(&units, &selection).await;

    assert_eq!(report.outcomes[0].state, UnitState::Done);
    assert_eq!(harness.backend.calls.load(Ordering::SeqCst), 3);
    let markdown = std::fs::read_to_string(output.join("notes.md")).unwrap();
    assert!(markdown.contains("## Part 1\n"));
    assert!(markdown.contains("## Part 3\n"));
    assert!(!markdown.contains("## Part 4\n"));
    assert_eq!(markdown.matches("- Use caching\n").count(), 1);
    assert!(markdown.contains(
        "The lecturer explains caching. The lecturer explains caching. The lecturer explains caching."
    ));
}

#[tokio::test]
async fn single_video_uses_the_subtitle_beside_it() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    write(&input.join("talk.mp4"), "video");
    write(&input.join("talk.srt"), &srt(&["Already", "transcribed."]));

    let units =
        discover_units(&input.join("talk.mp4"), &StepSelection::All, Some(&output)).unwrap();
    let harness = Harness::new(&fast_config(), &output, false, spoken());
    let report = harness.pipeline.run(&units, &StepSelection::All).await;

    assert_eq!(report.outcomes[0].state, UnitState::Done);
    assert_eq!(report.outcomes[0].source, input.join("talk.srt"));
    assert_eq!(harness.external_calls(), (0, 1, 1));
    assert_eq!(
        std::fs::read_to_string(output.join("talk.txt")).unwrap(),
        "Already transcribed.\n"
    );
}

#[tokio::test]
async fn raw_subtitles_are_kept_when_text_extraction_is_off() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("in");
    let output = tmp.path().join("out");
    let subtitles = srt(&["Keep", "the timings."]);
    write(&input.join("a.srt"), &subtitles);
    write(&input.join("b.mp4"), "video");

    let mut config = fast_config();
    config.processing.srt2txt.extract_text_only = false;
    let text_only = StepSelection::only([Step::Srt2Txt]);
    let units = discover_units(&input, &text_only, Some(&output)).unwrap();
    let harness = Harness::new(&config, &output, false, spoken());
    let report = harness.pipeline.run(&units, &text_only).await;

    assert!(!report.has_failures());
    assert_eq!(std::fs::read_to_string(output.join("a.txt")).unwrap(), subtitles);
    assert_eq!(
        std::fs::read_to_string(output.join("b.txt")).unwrap(),
        std::fs::read_to_string(output.join("b.srt")).unwrap()
    );
    assert!(
        std::fs::read_to_string(output.join("b.txt"))
            .unwrap()
            .contains("00:00:01,500 --> 00:00:03,000")
    );
}
