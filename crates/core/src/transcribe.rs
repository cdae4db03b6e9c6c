//! Speech to subtitle cues.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{fs, process::Command};
use uuid::Uuid;

use crate::{
    config::{TranscriptionConfig, TranscriptionEngine},
    error::{Result, StudydocError},
    subtitle::clean_cue_text,
    types::{SubtitleCue, Transcript},
};

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, video_path: &Path) -> Result<Transcript>;
}

/// Build the transcriber selected in configuration.
pub fn from_config(config: &TranscriptionConfig) -> Result<Arc<dyn Transcriber>> {
    match config.engine {
        TranscriptionEngine::WhisperCli => Ok(Arc::new(WhisperCliTranscriber::new(config))),
        #[cfg(feature = "whisper-rs")]
        TranscriptionEngine::WhisperRs => Ok(Arc::new(WhisperRsTranscriber::new(config)?)),
        #[cfg(not(feature = "whisper-rs"))]
        TranscriptionEngine::WhisperRs => Err(StudydocError::Config {
            reason: "transcription.engine = \"whisper-rs\" needs the `whisper-rs` feature"
                .to_string(),
        }),
    }
}

#[derive(Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

#[derive(Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

/// Shortest cue written for a segment whisper reports with no duration.
const MIN_CUE_SECONDS: f64 = 0.01;

fn cues_from_segments(segments: impl IntoIterator<Item = (f64, f64, String)>) -> Transcript {
    let cues = segments
        .into_iter()
        .map(|(start, end, text)| (start, end, clean_cue_text(&text)))
        .filter(|(_, _, text)| !text.is_empty())
        .enumerate()
        .map(|(i, (start, end, text))| SubtitleCue {
            index: i as u32 + 1,
            start,
            end: if end > start { end } else { start + MIN_CUE_SECONDS },
            text,
        })
        .collect();
    Transcript::new(cues)
}

/// Parse the JSON document `whisper --output_format json` writes.
pub fn parse_whisper_json(content: &str) -> Result<Transcript> {
    let output: WhisperOutput = serde_json::from_str(content)?;
    Ok(cues_from_segments(
        output
            .segments
            .into_iter()
            .map(|s| (s.start, s.end, s.text)),
    ))
}

/// Runs the `whisper` command line tool.
pub struct WhisperCliTranscriber {
    whisper_path: PathBuf,
    model: String,
    language: Option<String>,
    timeout: Duration,
}

impl WhisperCliTranscriber {
    pub fn new(config: &TranscriptionConfig) -> Self {
        Self {
            whisper_path: config.whisper_path.clone(),
            model: config.model.clone(),
            language: config.language.clone(),
            timeout: config.timeout(),
        }
    }

    async fn run(&self, video_path: &Path, output_dir: &Path) -> Result<Transcript> {
        let failed = |reason: String| StudydocError::Transcription {
            video_path: video_path.to_path_buf(),
            reason,
        };

        let mut command = Command::new(&self.whisper_path);
        command
            .arg(video_path)
            .arg("--model")
            .arg(&self.model)
            .arg("--output_format")
            .arg("json")
            .arg("--output_dir")
            .arg(output_dir);
        if let Some(language) = &self.language {
            command.arg("--language").arg(language);
        }
        command.kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| failed(format!("whisper gave no result within {}s", self.timeout.as_secs())))?
            .map_err(|e| {
                failed(format!(
                    "could not start {}: {}",
                    self.whisper_path.display(),
                    e
                ))
            })?;
        if !output.status.success() {
            return Err(failed(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }

        // Whisper names its output after the input file
        let stem = video_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let json_path = output_dir.join(format!("{stem}.json"));
        let content = fs::read_to_string(&json_path)
            .await
            .map_err(|e| failed(format!("no output at {}: {}", json_path.display(), e)))?;
        parse_whisper_json(&content).map_err(|e| failed(e.to_string()))
    }
}

#[async_trait]
impl Transcriber for WhisperCliTranscriber {
    async fn transcribe(&self, video_path: &Path) -> Result<Transcript> {
        let output_dir = std::env::temp_dir().join(format!("studydoc-{}", Uuid::new_v4()));
        fs::create_dir_all(&output_dir)
            .await
            .map_err(|e| StudydocError::io(&output_dir, e))?;

        tracing::info!(video = %video_path.display(), model = %self.model, "Transcribing with whisper");
        let result = self.run(video_path, &output_dir).await;
        let _ = fs::remove_dir_all(&output_dir).await;
        result
    }
}

/// Runs Whisper in-process. Audio is extracted to 16 kHz mono WAV with ffmpeg first.
#[cfg(feature = "whisper-rs")]
pub struct WhisperRsTranscriber {
    model_path: PathBuf,
    ffmpeg_path: PathBuf,
    language: Option<String>,
    timeout: Duration,
}

#[cfg(feature = "whisper-rs")]
impl WhisperRsTranscriber {
    pub fn new(config: &TranscriptionConfig) -> Result<Self> {
        let model_path = config
            .model_path
            .clone()
            .ok_or_else(|| StudydocError::Config {
                reason: "transcription.model_path is required for the whisper-rs engine"
                    .to_string(),
            })?;
        Ok(Self {
            model_path,
            ffmpeg_path: config.ffmpeg_path.clone(),
            language: config.language.clone(),
            timeout: config.timeout(),
        })
    }

    async fn extract_audio(&self, video_path: &Path, audio_path: &Path) -> Result<()> {
        let failed = |reason: String| StudydocError::Transcription {
            video_path: video_path.to_path_buf(),
            reason,
        };
        let mut command = Command::new(&self.ffmpeg_path);
        command
            .arg("-y")
            .arg("-i")
            .arg(video_path)
            .arg("-vn")
            .arg("-acodec")
            .arg("pcm_s16le")
            .arg("-ar")
            .arg("16000")
            .arg("-ac")
            .arg("1")
            .arg(audio_path)
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| failed(format!("ffmpeg gave no result within {}s", self.timeout.as_secs())))?
            .map_err(|e| failed(format!("could not start ffmpeg: {e}")))?;

        if !output.status.success() {
            return Err(failed(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }
        Ok(())
    }
}

#[cfg(feature = "whisper-rs")]
fn run_whisper(
    model_path: &Path,
    audio_path: &Path,
    language: Option<&str>,
) -> std::result::Result<Transcript, String> {
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    let mut reader = hound::WavReader::open(audio_path).map_err(|e| e.to_string())?;
    let samples: Vec<f32> = reader
        .samples::<i16>()
        .map(|s| s.map(|v| v as f32 / i16::MAX as f32))
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| e.to_string())?;

    let ctx_params = WhisperContextParameters {
        use_gpu: true,
        flash_attn: true,
        ..Default::default()
    };
    let model = model_path
        .to_str()
        .ok_or_else(|| format!("model path {} is not UTF-8", model_path.display()))?;
    let ctx = WhisperContext::new_with_params(model, ctx_params)
        .map_err(|e| format!("failed to load model: {e}"))?;

    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 5 });
    params.set_language(language);

    let mut state = ctx
        .create_state()
        .map_err(|e| format!("failed to create state: {e}"))?;
    state
        .full(params, &samples)
        .map_err(|e| format!("failed to run model: {e}"))?;

    let segments = state.as_iter().filter_map(|segment| {
        let text = segment.to_str().ok()?.to_string();
        Some((
            segment.start_timestamp() as f64 / 100.0,
            segment.end_timestamp() as f64 / 100.0,
            text,
        ))
    });
    Ok(cues_from_segments(segments.collect::<Vec<_>>()))
}

#[cfg(feature = "whisper-rs")]
#[async_trait]
impl Transcriber for WhisperRsTranscriber {
    async fn transcribe(&self, video_path: &Path) -> Result<Transcript> {
        let audio_path = std::env::temp_dir().join(format!("studydoc-{}.wav", Uuid::new_v4()));
        self.extract_audio(video_path, &audio_path).await?;

        tracing::info!(video = %video_path.display(), model = %self.model_path.display(), "Transcribing in-process");
        let model_path = self.model_path.clone();
        let language = self.language.clone();
        let audio = audio_path.clone();
        // The blocking task cannot be cancelled; on timeout it is abandoned.
        let result = tokio::time::timeout(
            self.timeout,
            tokio::task::spawn_blocking(move || {
                run_whisper(&model_path, &audio, language.as_deref())
            }),
        )
        .await;
        let _ = fs::remove_file(&audio_path).await;

        result
            .map_err(|_| format!("whisper gave no result within {}s", self.timeout.as_secs()))
            .and_then(|joined| joined.map_err(|e| e.to_string()))
            .and_then(|r| r)
            .map_err(|reason| StudydocError::Transcription {
                video_path: video_path.to_path_buf(),
                reason,
            })
    }
}
