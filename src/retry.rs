use std::time::Duration;

use log::warn;

use crate::errors::ProviderError;
use crate::providers::{InferenceRequest, InferenceResponse, VisionProvider};
use crate::types::ModelId;

/// Bounded attempts with exponential backoff. `max_attempts == 1` disables
/// retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }

    pub fn none() -> Self {
        Self::new(1)
    }

    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 1
    }

    /// Delay before attempt `attempt + 1`, where `attempt` counts from 1.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Provider decorator that retries transient failures. Sits outside the
/// gateway, which never retries on its own.
pub struct RetryingProvider {
    inner: Box<dyn VisionProvider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Box<dyn VisionProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait::async_trait]
impl VisionProvider for RetryingProvider {
    async fn infer(&self, req: &InferenceRequest) -> Result<InferenceResponse, ProviderError> {
        let mut attempt = 1;
        loop {
            match self.inner.infer(req).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff_for(attempt);
                    warn!(
                        "{} call failed (attempt {attempt}/{}): {err}; retrying in {delay:?}",
                        self.inner.name(),
                        self.policy.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &ModelId {
        self.inner.model()
    }

    fn validate_config(&self) -> Result<(), ProviderError> {
        self.inner.validate_config()
    }
}
