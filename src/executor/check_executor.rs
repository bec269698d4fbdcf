use super::retry_policy::RetryPolicy;
use crate::check_client::{AdCheckClient, CheckError, CheckRequest, CheckResult};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// A check that completed.
#[derive(Debug, Clone)]
pub struct CheckSuccess {
    pub result: CheckResult,
    pub attempts: u32,
}

/// A check that ended without a result: permanent on the first attempt, or
/// transient until the attempts ran out.
#[derive(Debug, Clone, Error)]
#[error("check failed after {attempts} attempt(s): {error}")]
pub struct CheckFailure {
    pub attempts: u32,
    pub error: CheckError,
}

/// Runs one check with a per-attempt timeout and bounded retries.
pub struct CheckExecutor {
    client: Arc<dyn AdCheckClient>,
    retry_policy: RetryPolicy,
    timeout: Duration,
}

impl CheckExecutor {
    pub fn new(client: Arc<dyn AdCheckClient>, retry_policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            client,
            retry_policy,
            timeout,
        }
    }

    pub async fn execute(&self, request: &CheckRequest) -> Result<CheckSuccess, CheckFailure> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(self.timeout, self.client.check(request)).await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(CheckError::timeout(self.timeout)),
            };

            match outcome {
                Ok(result) => {
                    debug!(
                        "Check for '{}' succeeded on attempt {} with {} ads",
                        request.query, attempt, result.ads_count
                    );
                    return Ok(CheckSuccess {
                        result,
                        attempts: attempt,
                    });
                }
                Err(error) if self.retry_policy.should_retry(&error, attempt) => {
                    let backoff = self.retry_policy.backoff(attempt - 1);
                    warn!(
                        "Check for '{}' failed (attempt {}/{}): {}. Retrying in {:?}",
                        request.query, attempt, self.retry_policy.max_attempts, error, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(error) => {
                    return Err(CheckFailure {
                        attempts: attempt,
                        error,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check_client::{Device, TransientKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Returns the scripted outcomes in order, then succeeds.
    struct ScriptedClient {
        script: Mutex<Vec<Result<CheckResult, CheckError>>>,
        calls: AtomicU32,
    }

    impl ScriptedClient {
        fn new(mut script: Vec<Result<CheckResult, CheckError>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl AdCheckClient for ScriptedClient {
        async fn check(&self, request: &CheckRequest) -> Result<CheckResult, CheckError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(CheckResult::from_ads(request.query.clone(), vec![])))
        }
    }

    struct HangingClient {
        calls: AtomicU32,
    }

    #[async_trait]
    impl AdCheckClient for HangingClient {
        async fn check(&self, _request: &CheckRequest) -> Result<CheckResult, CheckError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(CheckError::permanent("unreachable"))
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    fn request() -> CheckRequest {
        CheckRequest::new("shoes", None, Device::Desktop)
    }

    fn transient() -> Result<CheckResult, CheckError> {
        Err(CheckError::transient(TransientKind::RateLimited, "429"))
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let client = Arc::new(ScriptedClient::new(vec![]));
        let executor = CheckExecutor::new(client.clone(), fast_policy(3), Duration::from_secs(1));

        let success = executor.execute(&request()).await.unwrap();
        assert_eq!(success.attempts, 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let client = Arc::new(ScriptedClient::new(vec![transient(), transient()]));
        let executor = CheckExecutor::new(client.clone(), fast_policy(3), Duration::from_secs(1));

        let success = executor.execute(&request()).await.unwrap();
        assert_eq!(success.attempts, 3);
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_retries_exactly_up_to_bound() {
        let client = Arc::new(ScriptedClient::new(vec![
            transient(),
            transient(),
            transient(),
            transient(),
        ]));
        let executor = CheckExecutor::new(client.clone(), fast_policy(3), Duration::from_secs(1));

        let failure = executor.execute(&request()).await.unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert!(failure.error.is_retryable());
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_never_retries() {
        let client = Arc::new(ScriptedClient::new(vec![Err(CheckError::permanent(
            "invalid query",
        ))]));
        let executor = CheckExecutor::new(client.clone(), fast_policy(3), Duration::from_secs(1));

        let failure = executor.execute(&request()).await.unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert_eq!(failure.error, CheckError::permanent("invalid query"));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let client = Arc::new(HangingClient {
            calls: AtomicU32::new(0),
        });
        let executor =
            CheckExecutor::new(client.clone(), fast_policy(2), Duration::from_millis(20));

        let failure = executor.execute(&request()).await.unwrap_err();
        assert_eq!(failure.attempts, 2);
        assert!(matches!(
            failure.error,
            CheckError::Transient {
                kind: TransientKind::Timeout,
                ..
            }
        ));
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }
}
