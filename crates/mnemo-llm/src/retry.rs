use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::provider::{LlmProvider, LlmRequest, LlmResponse};
use mnemo_core::{MnemoError, Result};

/// Exponential backoff schedule: `base * 2^attempt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl Backoff {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before retrying after the zero-based `attempt` failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or attempts run out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = e
                        .retry_after()
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| self.delay_for(attempt));
                    warn!(
                        op = label,
                        attempt = attempt + 1,
                        max = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Wraps a provider with retry on transient errors (429, 5xx, timeouts).
pub struct RetryingProvider {
    inner: Arc<dyn LlmProvider>,
    backoff: Backoff,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, backoff: Backoff) -> Self {
        Self { inner, backoff }
    }
}

#[async_trait]
impl LlmProvider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let inner = &self.inner;
        self.backoff
            .run(inner.name(), || inner.complete(request))
            .await
            .map_err(|e| match e {
                MnemoError::RateLimited { .. } => e,
                other => MnemoError::LlmProvider(format!("{}: {}", inner.name(), other)),
            })
    }

    async fn health_check(&self) -> Result<()> {
        self.inner.health_check().await
    }
}
