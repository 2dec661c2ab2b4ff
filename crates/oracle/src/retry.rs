use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::generator::{GenerationParams, Generator, Message, OracleError};

const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Bounded retry with exponential backoff for transient oracle failures.
///
/// Only transport-level and malformed-format failures are retried here;
/// diagnosed content failures go through the generator-retry repair
/// operation instead, never raw resubmission. An empty response body counts
/// as malformed: no caller can use it.
pub struct Retrying<G> {
    inner: G,
    max_retries: u32,
}

impl<G: Generator> Retrying<G> {
    pub fn new(inner: G, max_retries: u32) -> Self {
        Self { inner, max_retries }
    }
}

#[async_trait]
impl<G: Generator> Generator for Retrying<G> {
    async fn generate(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<String, OracleError> {
        let attempts = self.max_retries + 1;
        let mut last = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = BACKOFF_BASE * 2u32.saturating_pow(attempt - 1);
                tokio::time::sleep(backoff.min(BACKOFF_CAP)).await;
            }

            let result = match self.inner.generate(messages, params).await {
                Ok(text) if text.trim().is_empty() => {
                    Err(OracleError::Malformed("empty response".into()))
                }
                other => other,
            };

            match result {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() => {
                    warn!(
                        provider = self.inner.name(),
                        attempt = attempt + 1,
                        attempts,
                        error = %e,
                        "transient oracle failure"
                    );
                    last = e.to_string();
                }
                Err(e) => return Err(e),
            }
        }

        Err(OracleError::Exhausted { attempts, last })
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Global in-flight cap on oracle calls, shared across every component and
/// every concurrently running case.
pub struct Limited<G> {
    inner: G,
    semaphore: Arc<Semaphore>,
}

impl<G: Generator> Limited<G> {
    pub fn new(inner: G, permits: usize) -> Self {
        Self {
            inner,
            semaphore: Arc::new(Semaphore::new(permits.max(1))),
        }
    }

    /// Share an existing semaphore, e.g. one limit across several backends.
    pub fn with_semaphore(inner: G, semaphore: Arc<Semaphore>) -> Self {
        Self { inner, semaphore }
    }
}

#[async_trait]
impl<G: Generator> Generator for Limited<G> {
    async fn generate(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<String, OracleError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| OracleError::Malformed("oracle limiter closed".into()))?;
        self.inner.generate(messages, params).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
