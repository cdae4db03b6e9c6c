use serde::{Deserialize, Serialize};

use crate::error::StudydocError;

/// Known OpenAI-compatible chat completion services.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// A local server such as LM Studio or llama.cpp.
    #[default]
    Local,
    Openai,
    Grok,
    Gemini,
}

pub struct ProviderConfig {
    pub base_url: &'static str,
    pub model: &'static str,
    pub env_var: &'static str,
}

impl Provider {
    pub fn config(&self) -> ProviderConfig {
        match self {
            Provider::Local => ProviderConfig {
                base_url: "http://localhost:1234/v1",
                model: "qwen2.5-7b-instruct-1m",
                env_var: "LOCAL_LLM_API_KEY",
            },
            Provider::Openai => ProviderConfig {
                base_url: "https://api.openai.com/v1",
                model: "gpt-5.1",
                env_var: "OPENAI_API_KEY",
            },
            Provider::Grok => ProviderConfig {
                base_url: "https://api.x.ai/v1",
                model: "grok-4-fast",
                env_var: "XAI_API_KEY",
            },
            Provider::Gemini => ProviderConfig {
                base_url: "https://generativelanguage.googleapis.com/v1beta/openai",
                model: "gemini-3-pro",
                env_var: "GEMINI_API_KEY",
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Local => "Local",
            Provider::Openai => "OpenAI",
            Provider::Grok => "Grok",
            Provider::Gemini => "Gemini",
        }
    }

    /// Resolve the API key: explicit value first, then the provider's env var.
    ///
    /// Local servers usually ignore the key, so a missing one is not an error there.
    pub fn resolve_api_key(&self, explicit: Option<&str>) -> Result<Option<String>, StudydocError> {
        if let Some(key) = explicit.filter(|k| !k.is_empty()) {
            return Ok(Some(key.to_string()));
        }
        let config = self.config();
        match std::env::var(config.env_var) {
            Ok(key) if !key.is_empty() => Ok(Some(key)),
            _ if *self == Provider::Local => Ok(None),
            _ => Err(StudydocError::MissingApiKey {
                provider_name: self.name().to_string(),
                env_var: config.env_var.to_string(),
            }),
        }
    }
}
