use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A chat message for the generation oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Sampling/decoding knobs passed through to the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self { temperature: 0.1, max_tokens: 4096 }
    }
}

/// The external text-generation capability. Stochastic and fallible; every
/// suspension point in the engine goes through this trait.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Send a prompt and return the raw response text.
    async fn generate(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<String, OracleError>;

    /// Backend name for logging ("openai", "anthropic", "ollama", "mock").
    fn name(&self) -> &str;
}

#[async_trait]
impl<G: Generator + ?Sized> Generator for Box<G> {
    async fn generate(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<String, OracleError> {
        (**self).generate(messages, params).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait]
impl<G: Generator + ?Sized> Generator for Arc<G> {
    async fn generate(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<String, OracleError> {
        (**self).generate(messages, params).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out")]
    Timeout,

    #[error("API error: {status} — {body}")]
    Api { status: u16, body: String },

    /// Empty or structurally unusable response text.
    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("provider not configured: {0}")]
    NotConfigured(String),

    /// The bounded retry wrapper gave up.
    #[error("oracle exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl OracleError {
    /// Transient failures are retried with backoff and never surfaced past
    /// the component boundary; everything else is terminal for the call.
    pub fn is_transient(&self) -> bool {
        match self {
            OracleError::Timeout | OracleError::Malformed(_) => true,
            OracleError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            OracleError::Api { status, .. } => {
                matches!(status, 408 | 429) || *status >= 500
            }
            OracleError::NotConfigured(_) | OracleError::Exhausted { .. } => false,
        }
    }
}
