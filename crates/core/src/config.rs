//! Configuration for the whole pipeline.
//!
//! Built once at startup and handed to each component by reference.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, StudydocError},
    provider::Provider,
};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub backend: BackendConfig,
    pub transcription: TranscriptionConfig,
    pub paths: PathsConfig,
    pub processing: ProcessingConfig,
    pub logging: LoggingConfig,
    pub ui: UiConfig,
}

/// Chat completion backend used for summarization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendConfig {
    pub provider: Provider,
    /// Overrides the provider's base URL, e.g. `http://10.0.0.5:1234/v1`.
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub temperature: f32,
    /// Upper bound on tokens the backend may generate per request.
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// Requests allowed in flight at once.
    pub max_concurrency: usize,
    /// Character budget per request, before prompt headroom is reserved.
    pub chunk_chars: usize,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_total_wait_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TranscriptionEngine {
    /// Shell out to the `whisper` executable.
    WhisperCli,
    /// Run whisper.cpp in-process. Needs the `whisper-rs` feature.
    WhisperRs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TranscriptionConfig {
    pub engine: TranscriptionEngine,
    /// Model name for the CLI engine (`base`, `small`, ...).
    pub model: String,
    /// ggml model file for the in-process engine.
    pub model_path: Option<PathBuf>,
    pub language: Option<String>,
    pub whisper_path: PathBuf,
    pub ffmpeg_path: PathBuf,
    /// Wall-clock limit per video for the recognizer, and separately for audio extraction.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Used when no output directory is passed. Empty means "next to the input".
    pub default_output_dir: PathBuf,
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    pub srt2txt: Srt2TxtConfig,
    pub txt2md: Txt2MdConfig,
    pub md2docx: Md2DocxConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Srt2TxtConfig {
    pub extract_text_only: bool,
    pub remove_timestamps: bool,
    pub combine_sentences: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Txt2MdConfig {
    pub include_timestamps: bool,
    pub include_summary: bool,
    pub include_key_points: bool,
    /// Ask the backend to reword the summary when the text fit in one chunk.
    pub reword_single_chunk: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Md2DocxConfig {
    pub add_table_of_contents: bool,
    pub add_page_numbers: bool,
    pub template_file: Option<PathBuf>,
    pub pandoc_path: PathBuf,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    pub log_to_file: bool,
    pub log_to_console: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UiConfig {
    pub show_progress_bars: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Local,
            base_url: None,
            model: None,
            api_key: None,
            temperature: 0.7,
            max_tokens: 4000,
            timeout_secs: 60,
            max_concurrency: 2,
            chunk_chars: 12_000,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            max_total_wait_ms: 30_000,
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            engine: TranscriptionEngine::WhisperCli,
            model: "base".to_string(),
            model_path: None,
            language: None,
            whisper_path: PathBuf::from("whisper"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            timeout_secs: 3_600,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            default_output_dir: PathBuf::from("output"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl Default for Srt2TxtConfig {
    fn default() -> Self {
        Self {
            extract_text_only: true,
            remove_timestamps: true,
            combine_sentences: true,
        }
    }
}

impl Default for Txt2MdConfig {
    fn default() -> Self {
        Self {
            include_timestamps: false,
            include_summary: true,
            include_key_points: true,
            reword_single_chunk: false,
        }
    }
}

impl Default for Md2DocxConfig {
    fn default() -> Self {
        Self {
            add_table_of_contents: true,
            add_page_numbers: true,
            template_file: None,
            pandoc_path: PathBuf::from("pandoc"),
            timeout_secs: 120,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_file: true,
            log_to_console: true,
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            show_progress_bars: true,
        }
    }
}

impl BackendConfig {
    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| self.provider.config().base_url.to_string())
    }

    pub fn model(&self) -> String {
        self.model
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.provider.config().model.to_string())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl TranscriptionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Md2DocxConfig {
    /// The reference document, if one is configured and present on disk.
    pub fn template(&self) -> Option<&Path> {
        self.template_file
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty() && p.exists())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Parse configuration from TOML text. Missing fields take defaults.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| StudydocError::Config {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| StudydocError::io(path, e))?;
        Self::from_toml(&content)
    }

    /// Load a file, falling back to defaults only when it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// `~/.config/studydoc/config.toml` on Linux.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("studydoc").join("config.toml"))
    }

    /// Apply environment variable overrides
    ///
    /// - STUDYDOC_BASE_URL → backend.base_url
    /// - STUDYDOC_MODEL → backend.model
    /// - STUDYDOC_API_KEY → backend.api_key
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("STUDYDOC_BASE_URL")
            && !url.is_empty()
        {
            self.backend.base_url = Some(url);
        }
        if let Ok(model) = std::env::var("STUDYDOC_MODEL")
            && !model.is_empty()
        {
            self.backend.model = Some(model);
        }
        if let Ok(key) = std::env::var("STUDYDOC_API_KEY")
            && !key.is_empty()
        {
            self.backend.api_key = Some(key);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |reason: &str| {
            Err(StudydocError::Config {
                reason: reason.to_string(),
            })
        };
        if self.backend.max_tokens == 0 {
            return fail("backend.max_tokens must be > 0");
        }
        if self.backend.chunk_chars == 0 {
            return fail("backend.chunk_chars must be > 0");
        }
        if self.backend.timeout_secs == 0 {
            return fail("backend.timeout_secs must be > 0");
        }
        if self.backend.max_concurrency == 0 {
            return fail("backend.max_concurrency must be > 0");
        }
        if self.transcription.timeout_secs == 0 {
            return fail("transcription.timeout_secs must be > 0");
        }
        if self.processing.md2docx.timeout_secs == 0 {
            return fail("processing.md2docx.timeout_secs must be > 0");
        }
        if self.backend.retry.max_attempts == 0 {
            return fail("backend.retry.max_attempts must be > 0");
        }
        if !(0.0..=2.0).contains(&self.backend.temperature) {
            return fail("backend.temperature must be between 0.0 and 2.0");
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(StudydocError::Config {
                reason: format!(
                    "logging.level '{}' is not one of {}",
                    self.logging.level,
                    LOG_LEVELS.join(", ")
                ),
            });
        }
        Ok(())
    }

    /// Where artifacts go when the caller did not pass an output directory.
    pub fn default_output_root(&self) -> Option<PathBuf> {
        let dir = &self.paths.default_output_dir;
        (!dir.as_os_str().is_empty()).then(|| dir.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();

        assert_eq!(config.backend.provider, Provider::Local);
        assert_eq!(config.backend.max_tokens, 4000);
        assert_eq!(config.backend.timeout_secs, 60);
        assert_eq!(config.backend.base_url(), "http://localhost:1234/v1");
        assert_eq!(config.backend.model(), "qwen2.5-7b-instruct-1m");

        assert!(config.processing.srt2txt.extract_text_only);
        assert!(config.processing.srt2txt.remove_timestamps);
        assert!(config.processing.srt2txt.combine_sentences);

        assert!(!config.processing.txt2md.include_timestamps);
        assert!(config.processing.txt2md.include_summary);
        assert!(config.processing.txt2md.include_key_points);

        assert!(config.processing.md2docx.add_table_of_contents);
        assert!(config.processing.md2docx.add_page_numbers);
        assert_eq!(config.processing.md2docx.template(), None);
        assert_eq!(config.processing.md2docx.timeout(), Duration::from_secs(120));
        assert_eq!(config.transcription.timeout(), Duration::from_secs(3_600));

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.default_output_root(), Some(PathBuf::from("output")));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            [backend]
            provider = "openai"
            model = "gpt-4o-mini"
            max_tokens = 2000

            [backend.retry]
            max_attempts = 5

            [processing.srt2txt]
            combine_sentences = false
            "#,
        )
        .unwrap();

        assert_eq!(config.backend.provider, Provider::Openai);
        assert_eq!(config.backend.model(), "gpt-4o-mini");
        assert_eq!(config.backend.base_url(), "https://api.openai.com/v1");
        assert_eq!(config.backend.max_tokens, 2000);
        assert_eq!(config.backend.retry.max_attempts, 5);
        assert_eq!(config.backend.retry.initial_backoff_ms, 500);
        assert!(!config.processing.srt2txt.combine_sentences);
        assert!(config.processing.srt2txt.remove_timestamps);
    }

    #[test]
    fn unknown_option_is_rejected() {
        let err = Config::from_toml("[processing.srt2txt]\ncombine_sentence = true\n").unwrap_err();
        assert!(matches!(err, StudydocError::Config { .. }));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Config::from_toml("[backend]\nmax_tokens = 0\n").is_err());
        assert!(Config::from_toml("[backend.retry]\nmax_attempts = 0\n").is_err());
        assert!(Config::from_toml("[logging]\nlevel = \"loud\"\n").is_err());
        assert!(Config::from_toml("[transcription]\ntimeout_secs = 0\n").is_err());
        assert!(Config::from_toml("[processing.md2docx]\ntimeout_secs = 0\n").is_err());
    }

    #[test]
    fn empty_output_dir_means_next_to_input() {
        let config = Config::from_toml("[paths]\ndefault_output_dir = \"\"\n").unwrap();
        assert_eq!(config.default_output_root(), None);
    }

    #[test]
    fn load_or_default_reads_file_and_tolerates_absence() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[ui]\nshow_progress_bars = false").unwrap();
        let config = Config::load_or_default(file.path()).unwrap();
        assert!(!config.ui.show_progress_bars);

        let missing = file.path().with_extension("missing");
        assert_eq!(Config::load_or_default(&missing).unwrap(), Config::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[backend\nmodel = ").unwrap();
        assert!(Config::load_or_default(file.path()).is_err());
    }
}
