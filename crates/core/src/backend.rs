//! Chat completion backends and the retrying client the summarizer talks to.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::{
    config::BackendConfig,
    error::{BackendError, Result, StudydocError, is_transient_status},
    retry::RetryPolicy,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Something that turns a prompt into text.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        prompt: &Prompt,
        max_tokens: u32,
        timeout: Duration,
    ) -> std::result::Result<String, BackendError>;
}

/// Any server speaking the OpenAI `chat/completions` dialect.
pub struct OpenAiCompatibleBackend {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
}

impl OpenAiCompatibleBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let api_key = config.provider.resolve_api_key(config.api_key.as_deref())?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| StudydocError::Config {
                reason: format!("could not build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url().trim_end_matches('/')),
            model: config.model(),
            api_key,
            temperature: config.temperature,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Pull `choices[0].message.content` out of a chat completion response.
///
/// A body without it (an error object sent with a 200, a half-loaded model)
/// is a transient protocol failure, never answer text.
pub fn extract_message_content(
    response: &serde_json::Value,
) -> std::result::Result<String, BackendError> {
    response["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.trim().to_string())
        .ok_or_else(|| {
            BackendError::Transient(format!("response has no message content: {response}"))
        })
}

#[async_trait]
impl CompletionBackend for OpenAiCompatibleBackend {
    async fn complete(
        &self,
        prompt: &Prompt,
        max_tokens: u32,
        timeout: Duration,
    ) -> std::result::Result<String, BackendError> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .timeout(timeout)
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [
                    {
                        "role": "system",
                        "content": prompt.system,
                    },
                    {
                        "role": "user",
                        "content": prompt.user,
                    },
                ],
                "temperature": self.temperature,
                "max_tokens": max_tokens,
            }));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = format!("HTTP {}: {}", status.as_u16(), body.trim());
            return Err(if is_transient_status(status.as_u16()) {
                BackendError::Transient(reason)
            } else {
                BackendError::Permanent(reason)
            });
        }

        let body = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| BackendError::Transient(format!("unreadable response body: {e}")))?;
        extract_message_content(&body)
    }
}

/// Outcome of a parsed completion.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion<T> {
    Parsed(T),
    /// Every attempt came back in a shape the parser rejected. Holds the last raw text.
    Unparsed(String),
}

/// Wraps a backend with a retry policy, a per-call timeout and a concurrency cap.
#[derive(Clone)]
pub struct CompletionClient {
    backend: Arc<dyn CompletionBackend>,
    policy: RetryPolicy,
    limiter: Arc<Semaphore>,
    max_tokens: u32,
    timeout: Duration,
}

impl CompletionClient {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: &BackendConfig) -> Self {
        Self {
            backend,
            policy: RetryPolicy::from(&config.retry),
            limiter: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            max_tokens: config.max_tokens,
            timeout: config.timeout(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn attempt(&self, prompt: &Prompt) -> std::result::Result<String, BackendError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| BackendError::Permanent("backend limiter closed".to_string()))?;
        match tokio::time::timeout(
            self.timeout,
            self.backend.complete(prompt, self.max_tokens, self.timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(BackendError::Transient(format!(
                "no response within {}s",
                self.timeout.as_secs()
            ))),
        }
    }

    /// Complete and return the raw text.
    pub async fn complete(
        &self,
        operation: &str,
        prompt: &Prompt,
    ) -> std::result::Result<String, BackendError> {
        self.policy
            .run(operation, BackendError::is_retryable, |_| self.attempt(prompt))
            .await
    }

    /// Complete and parse. Unparseable answers are retried like transient
    /// failures; if they persist the last raw text comes back as
    /// [`Completion::Unparsed`] instead of an error.
    pub async fn complete_parsed<T, P>(
        &self,
        operation: &str,
        prompt: &Prompt,
        parse: P,
    ) -> std::result::Result<Completion<T>, BackendError>
    where
        P: Fn(&str) -> Option<T>,
    {
        let parse = &parse;
        let result = self
            .policy
            .run(operation, BackendError::is_retryable, |_| async move {
                let raw = self.attempt(prompt).await?;
                parse(&raw).ok_or(BackendError::Unstructured(raw))
            })
            .await;
        match result {
            Ok(value) => Ok(Completion::Parsed(value)),
            Err(BackendError::Unstructured(raw)) => Ok(Completion::Unparsed(raw)),
            Err(err) => Err(err),
        }
    }
}
