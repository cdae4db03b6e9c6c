pub mod backend;
pub mod config;
pub mod error;
pub mod extract;
pub mod format;
pub mod pipeline;
pub mod provider;
pub mod render;
pub mod retry;
pub mod stage_io;
pub mod subtitle;
pub mod summarize;
pub mod transcribe;
pub mod types;

pub use backend::{CompletionBackend, CompletionClient, OpenAiCompatibleBackend, Prompt};
pub use config::Config;
pub use error::{BackendError, Result, StageFailure, StudydocError};
pub use pipeline::{BatchReport, Pipeline, Services, UnitOutcome};
pub use provider::{Provider, ProviderConfig};
pub use render::{PandocRenderer, RenderOptions, Renderer};
pub use retry::RetryPolicy;
pub use stage_io::{StageIo, StageStatus, Unit, discover_units};
pub use summarize::Summarizer;
pub use transcribe::Transcriber;
pub use types::{ArtifactKind, Stage, Step, StepSelection, StructuredDocument, Transcript, UnitState};
