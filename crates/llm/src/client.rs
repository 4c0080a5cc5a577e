use std::sync::Arc;
use std::time::Duration;

use super::backend::{CompletionBackend, HttpBackend};
use super::error::{GenerationResult, UnavailableSnafu};
use super::types::{ChatMessage, CompletionRequest, Role};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-5";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_attempts: u32,
    pub request_timeout: Duration,
    pub max_output_tokens: Option<u64>,
    pub temperature: Option<f64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_output_tokens: None,
            temperature: None,
        }
    }
}

impl GenerationConfig {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into().trim().to_string(),
            ..Self::default()
        }
    }
}

/// Retrying request/response shim over one [`CompletionBackend`]. Holds no
/// other state; everything durable lives with the caller.
pub struct GenerationClient {
    config: GenerationConfig,
    backend: Arc<dyn CompletionBackend>,
}

impl GenerationClient {
    pub fn new(config: GenerationConfig) -> GenerationResult<Self> {
        let backend = Arc::new(HttpBackend::new(
            config.base_url.clone(),
            config.api_key.clone(),
            config.request_timeout,
        )?);
        Ok(Self::with_backend(config, backend))
    }

    /// Backend injection point for tests and alternative transports.
    pub fn with_backend(config: GenerationConfig, backend: Arc<dyn CompletionBackend>) -> Self {
        Self { config, backend }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Runs one generation call with bounded retry.
    ///
    /// A non-empty `system_prompt` becomes a single system entry ahead of all
    /// other entries. Transient failures are retried up to
    /// `config.max_attempts` with exponential backoff; anything else fails the
    /// call immediately.
    pub async fn generate(
        &self,
        messages: &[ChatMessage],
        system_prompt: Option<&str>,
    ) -> GenerationResult<String> {
        if self.config.api_key.is_empty() {
            return UnavailableSnafu {
                stage: "generate-check-credential",
            }
            .fail();
        }

        let request = self.build_request(messages, system_prompt);
        let max_attempts = self.config.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            match self.backend.complete(&request).await {
                Ok(content) => return Ok(content),
                Err(failure) if !failure.is_transient() => return Err(failure),
                Err(failure) if attempt >= max_attempts => {
                    return Err(super::error::GenerationError::Exhausted {
                        stage: "generate-attempts-spent",
                        attempts: max_attempts,
                        source: Box::new(failure),
                    });
                }
                Err(failure) => {
                    let delay = backoff_delay(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_secs = delay.as_secs(),
                        error = %failure,
                        "transient generation failure, backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn build_request(
        &self,
        messages: &[ChatMessage],
        system_prompt: Option<&str>,
    ) -> CompletionRequest {
        let mut window = Vec::with_capacity(messages.len() + 1);
        if let Some(system_prompt) = system_prompt
            && !system_prompt.trim().is_empty()
        {
            window.push(ChatMessage::new(Role::System, system_prompt));
        }
        window.extend_from_slice(messages);

        CompletionRequest {
            model: self.config.model.clone(),
            messages: window,
            max_output_tokens: self.config.max_output_tokens,
            temperature: self.config.temperature,
        }
    }
}

/// Backoff schedule between transient attempts: `2^attempt + 1` seconds.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(2_u64.saturating_pow(attempt).saturating_add(1))
}
