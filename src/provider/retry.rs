// src/provider/retry.rs — Retry with exponential backoff for language models
//
// Wraps any LanguageModel and retries calls that fail with a retriable
// provider error (rate limits, server errors, timeouts). A stream is only
// retried while opening; errors after the first chunk reach the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{ChatRequest, ChatResponse, ChatStream, LanguageModel};
use crate::infra::errors::OptimizerError;

const BACKOFF_FACTOR: f64 = 2.0;
const MAX_DELAY_MS: u64 = 30_000;
const JITTER_FRACTION: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub jitter_fraction: f64,
}

impl RetryConfig {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            backoff_factor: BACKOFF_FACTOR,
            max_delay: Duration::from_millis(MAX_DELAY_MS),
            jitter_fraction: JITTER_FRACTION,
        }
    }

    /// Delay before retry `attempt` (0-indexed).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(attempt as i32);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);
        let final_ms = capped_ms * deterministic_jitter(attempt, self.jitter_fraction);
        Duration::from_millis(final_ms as u64)
    }
}

/// Multiplier in [1 - fraction, 1 + fraction], reproducible per attempt.
fn deterministic_jitter(attempt: u32, fraction: f64) -> f64 {
    let hash = attempt.wrapping_mul(2654435761) as f64 / u32::MAX as f64;
    1.0 + fraction * (2.0 * hash - 1.0)
}

pub struct RetryModel {
    inner: Arc<dyn LanguageModel>,
    config: RetryConfig,
}

impl RetryModel {
    pub fn new(inner: Arc<dyn LanguageModel>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    async fn backoff(&self, attempt: u32, error: &OptimizerError, what: &str) {
        let delay = self.config.delay_for_attempt(attempt);
        tracing::warn!(
            model = self.inner.id(),
            attempt = attempt + 1,
            max_retries = self.config.max_retries,
            delay_ms = delay.as_millis() as u64,
            "Retrying {} after error: {}",
            what,
            error
        );
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl LanguageModel for RetryModel {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn supports_reasoning(&self) -> bool {
        self.inner.supports_reasoning()
    }

    async fn generate(&self, request: ChatRequest) -> Result<ChatResponse, OptimizerError> {
        let mut attempt = 0;
        loop {
            match self.inner.generate(request.clone()).await {
                Err(e) if e.is_retriable() && attempt < self.config.max_retries => {
                    self.backoff(attempt, &e, "call").await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn generate_stream(&self, request: ChatRequest) -> Result<ChatStream, OptimizerError> {
        let mut attempt = 0;
        loop {
            match self.inner.generate_stream(request.clone()).await {
                Err(e) if e.is_retriable() && attempt < self.config.max_retries => {
                    self.backoff(attempt, &e, "stream").await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::TokenUsage;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails `failures` times with the given retriability, then succeeds.
    struct Flaky {
        failures: u32,
        retriable: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LanguageModel for Flaky {
        fn id(&self) -> &str {
            "flaky"
        }

        async fn generate(&self, _request: ChatRequest) -> Result<ChatResponse, OptimizerError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(OptimizerError::Provider {
                    provider: "flaky".into(),
                    message: "HTTP 503".into(),
                    retriable: self.retriable,
                });
            }
            Ok(ChatResponse {
                answer: "ok".into(),
                thought: String::new(),
                usage: TokenUsage::new(1, 1),
            })
        }

        async fn generate_stream(&self, _request: ChatRequest) -> Result<ChatStream, OptimizerError> {
            Err(OptimizerError::Provider {
                provider: "flaky".into(),
                message: "HTTP 400".into(),
                retriable: false,
            })
        }
    }

    fn flaky(failures: u32, retriable: bool) -> Arc<Flaky> {
        Arc::new(Flaky {
            failures,
            retriable,
            calls: AtomicU32::new(0),
        })
    }

    fn instant(max_retries: u32) -> RetryConfig {
        RetryConfig::new(max_retries, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let inner = flaky(2, true);
        let model = RetryModel::new(inner.clone(), instant(3));
        let resp = model.generate(ChatRequest::default()).await.unwrap();
        assert_eq!(resp.answer, "ok");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let inner = flaky(5, true);
        let model = RetryModel::new(inner.clone(), instant(2));
        assert!(model.generate(ChatRequest::default()).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let inner = flaky(1, false);
        let model = RetryModel::new(inner.clone(), instant(3));
        assert!(model.generate(ChatRequest::default()).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert!(model.generate_stream(ChatRequest::default()).await.is_err());
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let config = RetryConfig::new(8, Duration::from_millis(1000));
        let first = config.delay_for_attempt(0).as_millis();
        let third = config.delay_for_attempt(2).as_millis();
        assert!((800..=1200).contains(&first));
        assert!((3200..=4800).contains(&third));
        assert!(config.delay_for_attempt(20).as_millis() <= 36_000);
    }

    #[test]
    fn test_jitter_within_bounds() {
        for attempt in 0..10 {
            let j = deterministic_jitter(attempt, 0.2);
            assert!((0.8..=1.2).contains(&j));
        }
    }
}
