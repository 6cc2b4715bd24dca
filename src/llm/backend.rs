//! Generation backends and the shared retry/fallback wrapper.
//!
//! Steps never talk to an [`LlmProvider`] directly. They call
//! [`ResilientBackend::generate`], which retries transient failures and, once
//! attempts run out, substitutes the step's deterministic fallback text.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::endpoint::BackendEndpoints;
use super::litellm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};
use crate::error::LlmError;
use crate::pipeline::config::GenerationConfig;

/// Sampling temperature used for every step.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Suffix that marks a simulated reply produced while the backend was down.
pub const UNAVAILABLE_MARKER: &str = "(LLM Unavailable)";

/// Produces text from a system prompt and a user prompt.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        config: &GenerationConfig,
    ) -> Result<String, LlmError>;
}

/// OpenAI-compatible chat backend that picks its endpoint per run.
pub struct ChatBackend {
    endpoints: BackendEndpoints,
    http_client: reqwest::Client,
    temperature: f64,
}

impl ChatBackend {
    /// Creates a backend sharing one HTTP connection pool across calls.
    pub fn new(endpoints: BackendEndpoints) -> Result<Self, LlmError> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| LlmError::RequestFailed(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            endpoints,
            http_client,
            temperature: DEFAULT_TEMPERATURE,
        })
    }

    /// Overrides the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Returns the endpoint settings.
    pub fn endpoints(&self) -> &BackendEndpoints {
        &self.endpoints
    }
}

#[async_trait]
impl GenerationBackend for ChatBackend {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        config: &GenerationConfig,
    ) -> Result<String, LlmError> {
        let endpoint = self
            .endpoints
            .resolve(config.backend_mode, config.api_key.as_deref())?;
        tracing::debug!(
            mode = %config.backend_mode,
            base_url = %endpoint.base_url,
            model = %endpoint.model,
            "Calling generation backend"
        );

        let client = LiteLlmClient::with_http_client(
            self.http_client.clone(),
            endpoint.base_url,
            Some(endpoint.api_key),
            endpoint.model.clone(),
            endpoint.timeout,
        );
        let request = GenerationRequest::new(
            endpoint.model,
            vec![Message::system(system), Message::user(user)],
        )
        .with_temperature(self.temperature);

        let response = client.generate(request).await?;
        response
            .first_content()
            .map(str::to_string)
            .ok_or_else(|| LlmError::ParseError("response contained no choices".to_string()))
    }
}

/// How often and how patiently a call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Text returned to a step, and whether it is a fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendReply {
    pub text: String,
    /// True when every attempt failed and `text` is the fallback.
    pub degraded: bool,
}

/// Retries a backend and substitutes a fallback when it stays unavailable.
#[derive(Clone)]
pub struct ResilientBackend {
    inner: Arc<dyn GenerationBackend>,
    policy: RetryPolicy,
}

impl ResilientBackend {
    pub fn new(inner: Arc<dyn GenerationBackend>) -> Self {
        Self {
            inner,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Calls the backend, retrying per policy. Never fails.
    ///
    /// Credential errors are not retried. When no attempt succeeds, `fallback`
    /// builds the reply and it is marked `degraded`.
    pub async fn generate<F>(
        &self,
        system: &str,
        user: &str,
        config: &GenerationConfig,
        fallback: F,
    ) -> BackendReply
    where
        F: FnOnce() -> String + Send,
    {
        let attempts = self.policy.attempts.max(1);

        for attempt in 0..attempts {
            match self.inner.generate(system, user, config).await {
                Ok(text) => {
                    return BackendReply {
                        text,
                        degraded: false,
                    }
                }
                Err(e) if e.is_permanent() => {
                    tracing::warn!(error = %e, "Generation failed permanently, using fallback");
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        error = %e,
                        "Generation attempt failed"
                    );
                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.policy.delay).await;
                    }
                }
            }
        }

        BackendReply {
            text: fallback(),
            degraded: true,
        }
    }
}

/// The generic fallback reply: names the prompt and marks the backend unavailable.
pub fn simulated_reply(prompt: &str) -> String {
    let preview: String = prompt.chars().take(80).collect();
    let ellipsis = if prompt.chars().count() > 80 { "..." } else { "" };
    format!(
        "Simulation: Processed '{}{}' {}",
        preview, ellipsis, UNAVAILABLE_MARKER
    )
}

/// Returns true if `text` is a simulated reply rather than generated output.
pub fn is_unavailable_reply(text: &str) -> bool {
    let text = text.trim();
    text.starts_with("Simulation: Processed") && text.ends_with(UNAVAILABLE_MARKER)
}
