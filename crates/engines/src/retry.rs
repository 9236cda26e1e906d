//! Engine retry wrapper — per-call timeouts with bounded backoff.
//!
//! Transient failures (rate limits, timeouts, 5xx, network drops) are
//! retried with exponential backoff. Fatal failures (auth, unknown model)
//! surface immediately.

use async_trait::async_trait;
use forgeloop_core::engine::{Engine, EngineRequest, EngineResponse, StreamChunk};
use forgeloop_core::error::EngineError;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Wraps an engine with a per-call timeout and a bounded retry budget.
pub struct RetryEngine {
    inner: Arc<dyn Engine>,
    max_retries: u32,
    base_delay: Duration,
    timeout: Duration,
}

impl RetryEngine {
    /// Create a retry wrapper around an engine.
    ///
    /// `max_retries` counts retries, not calls: a value of 2 allows up to
    /// three attempts.
    pub fn new(
        inner: Arc<dyn Engine>,
        max_retries: u32,
        base_delay: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            timeout,
        }
    }

    /// Backoff before retry `attempt` (0-based): base * 2^attempt.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    /// How long to wait after a given transient error.
    fn wait_for(&self, error: &EngineError, attempt: u32) -> Duration {
        let backoff = self.backoff_delay(attempt);
        match error {
            EngineError::RateLimited { retry_after_secs } => {
                backoff.max(Duration::from_secs(*retry_after_secs))
            }
            _ => backoff,
        }
    }
}

#[async_trait]
impl Engine for RetryEngine {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: EngineRequest,
    ) -> std::result::Result<EngineResponse, EngineError> {
        let mut last_error = EngineError::NotConfigured("Retry wrapper never attempted".into());

        for attempt in 0..=self.max_retries {
            let result =
                tokio::time::timeout(self.timeout, self.inner.complete(request.clone())).await;

            let error = match result {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) => e,
                Err(_) => EngineError::Timeout(format!(
                    "Engine '{}' timed out after {}s",
                    self.inner.name(),
                    self.timeout.as_secs()
                )),
            };

            if !error.is_transient() {
                return Err(error);
            }

            warn!(
                engine = %self.inner.name(),
                attempt = attempt + 1,
                max_attempts = self.max_retries + 1,
                error = %error,
                "Engine call failed, will retry"
            );

            if attempt < self.max_retries {
                tokio::time::sleep(self.wait_for(&error, attempt)).await;
            }
            last_error = error;
        }

        Err(last_error)
    }

    async fn stream(
        &self,
        request: EngineRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, EngineError>>,
        EngineError,
    > {
        // Retries cover stream establishment only; an interrupted stream
        // surfaces to the caller, who restarts from its own state.
        let mut last_error = EngineError::NotConfigured("Retry wrapper never attempted".into());

        for attempt in 0..=self.max_retries {
            let result =
                tokio::time::timeout(self.timeout, self.inner.stream(request.clone())).await;

            let error = match result {
                Ok(Ok(rx)) => return Ok(rx),
                Ok(Err(e)) => e,
                Err(_) => EngineError::Timeout(format!(
                    "Engine '{}' stream timed out after {}s",
                    self.inner.name(),
                    self.timeout.as_secs()
                )),
            };

            if !error.is_transient() {
                return Err(error);
            }

            warn!(
                engine = %self.inner.name(),
                attempt = attempt + 1,
                error = %error,
                "Engine stream failed, will retry"
            );

            if attempt < self.max_retries {
                tokio::time::sleep(self.wait_for(&error, attempt)).await;
            }
            last_error = error;
        }

        Err(last_error)
    }

    async fn health_check(&self) -> std::result::Result<bool, EngineError> {
        self.inner.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeloop_core::engine::EngineMessage;
    use std::sync::Mutex;

    /// An engine that fails a fixed number of times before succeeding.
    struct FlakyEngine {
        failures: Mutex<u32>,
        error: EngineError,
        call_count: Mutex<u32>,
    }

    impl FlakyEngine {
        fn new(failures: u32, error: EngineError) -> Self {
            Self {
                failures: Mutex::new(failures),
                error,
                call_count: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl Engine for FlakyEngine {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(
            &self,
            _request: EngineRequest,
        ) -> std::result::Result<EngineResponse, EngineError> {
            *self.call_count.lock().unwrap() += 1;
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(self.error.clone());
            }
            Ok(EngineResponse {
                content: "recovered".into(),
                usage: None,
                model: "test-model".into(),
            })
        }
    }

    /// An engine that hangs forever (for timeout testing).
    struct HangingEngine {
        call_count: Mutex<u32>,
    }

    #[async_trait]
    impl Engine for HangingEngine {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn complete(
            &self,
            _request: EngineRequest,
        ) -> std::result::Result<EngineResponse, EngineError> {
            *self.call_count.lock().unwrap() += 1;
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!()
        }
    }

    fn test_request() -> EngineRequest {
        EngineRequest {
            model: "test".into(),
            messages: vec![EngineMessage::user("hello")],
            temperature: 0.7,
            max_tokens: None,
            stream: false,
            stop: vec![],
        }
    }

    #[tokio::test]
    async fn first_attempt_succeeds() {
        let inner = Arc::new(FlakyEngine::new(0, EngineError::Network("down".into())));
        let retry = RetryEngine::new(
            inner.clone(),
            2,
            Duration::from_millis(1),
            Duration::from_secs(5),
        );

        let result = retry.complete(test_request()).await;
        assert_eq!(result.unwrap().content, "recovered");
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let inner = Arc::new(FlakyEngine::new(
            2,
            EngineError::Network("conn refused".into()),
        ));
        let retry = RetryEngine::new(
            inner.clone(),
            2,
            Duration::from_millis(1),
            Duration::from_secs(5),
        );

        let result = retry.complete(test_request()).await;
        assert!(result.is_ok());
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let inner = Arc::new(FlakyEngine::new(
            5,
            EngineError::AuthenticationFailed("bad key".into()),
        ));
        let retry = RetryEngine::new(
            inner.clone(),
            3,
            Duration::from_millis(1),
            Duration::from_secs(5),
        );

        let result = retry.complete(test_request()).await;
        assert!(matches!(
            result.unwrap_err(),
            EngineError::AuthenticationFailed(_)
        ));
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn exhausted_budget_returns_last_error() {
        let inner = Arc::new(FlakyEngine::new(
            10,
            EngineError::ApiError {
                status_code: 503,
                message: "overloaded".into(),
            },
        ));
        let retry = RetryEngine::new(
            inner.clone(),
            1,
            Duration::from_millis(1),
            Duration::from_secs(5),
        );

        let result = retry.complete(test_request()).await;
        assert!(matches!(
            result.unwrap_err(),
            EngineError::ApiError {
                status_code: 503,
                ..
            }
        ));
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn hung_call_times_out_and_retries() {
        let inner = Arc::new(HangingEngine {
            call_count: Mutex::new(0),
        });
        let retry = RetryEngine::new(
            inner.clone(),
            1,
            Duration::from_millis(1),
            Duration::from_millis(20),
        );

        let result = retry.complete(test_request()).await;
        assert!(matches!(result.unwrap_err(), EngineError::Timeout(_)));
        assert_eq!(*inner.call_count.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_at_least_retry_after() {
        let inner = Arc::new(FlakyEngine::new(
            1,
            EngineError::RateLimited {
                retry_after_secs: 5,
            },
        ));
        let retry = RetryEngine::new(
            inner.clone(),
            1,
            Duration::from_millis(1),
            Duration::from_secs(30),
        );

        let start = tokio::time::Instant::now();
        let result = retry.complete(test_request()).await;
        assert!(result.is_ok());
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert_eq!(inner.calls(), 2);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let inner = Arc::new(FlakyEngine::new(0, EngineError::Network("x".into())));
        let retry = RetryEngine::new(
            inner,
            3,
            Duration::from_millis(100),
            Duration::from_secs(5),
        );

        assert_eq!(retry.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(retry.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(retry.backoff_delay(2), Duration::from_millis(400));
    }
}
