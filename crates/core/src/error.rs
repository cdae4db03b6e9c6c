use std::path::PathBuf;
use thiserror::Error;

use crate::types::Stage;

/// Failure reported by a completion backend. The variant decides retry eligibility.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("transient backend failure: {0}")]
    Transient(String),

    #[error("permanent backend failure: {0}")]
    Permanent(String),

    /// The backend answered with text that does not parse into the requested
    /// shape. Carries the raw text.
    #[error("unstructured backend answer")]
    Unstructured(String),
}

impl BackendError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Transient(_) | BackendError::Unstructured(_))
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            return BackendError::Transient(err.to_string());
        }
        match err.status() {
            Some(status) if is_transient_status(status.as_u16()) => {
                BackendError::Transient(err.to_string())
            }
            Some(_) => BackendError::Permanent(err.to_string()),
            None => BackendError::Transient(err.to_string()),
        }
    }
}

/// 408, 429 and every 5xx are worth another attempt.
pub fn is_transient_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

#[derive(Error, Debug)]
pub enum StudydocError {
    #[error("Transcript is empty, transcription most likely failed upstream")]
    EmptyTranscript,

    #[error("Transcription failed for {video_path}: {reason}")]
    Transcription { video_path: PathBuf, reason: String },

    #[error("Summarization of chunk {chunk} failed: {reason}")]
    Summarization { chunk: usize, reason: String },

    #[error("Rendering failed: {reason}")]
    Render { reason: String },

    #[error("IO error on {path}: {source}")]
    ArtifactIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Required input artifact {path} does not exist")]
    MissingInput { path: PathBuf },

    #[error("Could not parse subtitle file {path}: {reason}")]
    SubtitleParse { path: PathBuf, reason: String },

    #[error("Unsupported input {path}: expected a video, .srt, .txt or .md file, or a directory")]
    UnsupportedInput { path: PathBuf },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Missing API key for {provider_name}: set {env_var} or backend.api_key")]
    MissingApiKey {
        provider_name: String,
        env_var: String,
    },

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl StudydocError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StudydocError::ArtifactIo {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, StudydocError>;

/// A unit that stopped in a given stage, with the error that stopped it.
#[derive(Error, Debug)]
#[error("{stage} failed: {source}")]
pub struct StageFailure {
    pub stage: Stage,
    #[source]
    pub source: StudydocError,
}
