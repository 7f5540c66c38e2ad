use connectors::error::ApiError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Indicates whether an error should be retried or treated as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retry,
    /// Retry, but not before the server-requested delay.
    RetryAfter(Duration),
    Stop,
}

/// Result of running an operation under the retry policy.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The error was considered fatal and should bubble up immediately.
    Fatal(E),
    /// The error was retryable, but the configured attempts were exhausted.
    AttemptsExceeded { attempts: usize, error: E },
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: if max_delay.is_zero() {
                base_delay
            } else {
                max_delay
            },
        }
    }

    /// Preset for API calls: one second doubling up to a minute.
    pub fn for_http(max_attempts: usize) -> Self {
        Self::new(max_attempts, Duration::from_secs(1), Duration::from_secs(60))
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: usize) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Executes the operation with the configured retry policy.
    pub async fn run<F, Fut, T, E, Classifier>(
        &self,
        mut op: F,
        classify: Classifier,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        Classifier: Fn(&E) -> RetryDisposition,
    {
        let mut attempt = 0;

        loop {
            match op().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    let delay = match classify(&err) {
                        RetryDisposition::Stop => return Err(RetryError::Fatal(err)),
                        RetryDisposition::Retry => self.backoff_delay(attempt),
                        RetryDisposition::RetryAfter(wait) => wait.max(self.backoff_delay(attempt)),
                    };

                    if attempt + 1 >= self.max_attempts {
                        return Err(RetryError::AttemptsExceeded {
                            attempts: attempt + 1,
                            error: err,
                        });
                    }

                    warn!(
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after error: {err}"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: usize) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::from_millis(0);
        }

        let factor = 1u128 << attempt.min(6);
        let base_ms = self.base_delay.as_millis();
        let delay_ms = base_ms.saturating_mul(factor);
        let capped = delay_ms.min(self.max_delay.as_millis());
        Duration::from_millis(capped as u64)
    }
}

/// Transient: timeouts, connection failures, 5xx and 429. Everything else
/// is terminal.
pub fn classify_api_error(err: &ApiError) -> RetryDisposition {
    match err {
        ApiError::Transport(e) if e.is_builder() || e.is_decode() || e.is_redirect() => {
            RetryDisposition::Stop
        }
        ApiError::Transport(_) => RetryDisposition::Retry,
        ApiError::RateLimited {
            retry_after: Some(wait),
        } => RetryDisposition::RetryAfter(*wait),
        ApiError::RateLimited { retry_after: None } => RetryDisposition::Retry,
        ApiError::Server { .. } => RetryDisposition::Retry,
        ApiError::InvalidUrl(_)
        | ApiError::Auth { .. }
        | ApiError::NotFound(_)
        | ApiError::Client { .. }
        | ApiError::Malformed(_)
        | ApiError::BatchFailed { .. }
        | ApiError::BatchTimeout { .. }
        | ApiError::Io(_) => RetryDisposition::Stop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::immediate(3);

        let result = policy
            .run(
                || async {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(ApiError::Server {
                            status: 503,
                            detail: "busy".into(),
                        })
                    } else {
                        Ok(n)
                    }
                },
                classify_api_error,
            )
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_on_auth_errors() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(5)
            .run(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::Auth {
                        status: 401,
                        detail: "bad key".into(),
                    })
                },
                classify_api_error,
            )
            .await;

        assert!(matches!(result, Err(RetryError::Fatal(ApiError::Auth { .. }))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reports_exhausted_attempts() {
        let result: Result<(), _> = RetryPolicy::immediate(2)
            .run(
                || async { Err(ApiError::RateLimited { retry_after: None }) },
                classify_api_error,
            )
            .await;

        assert!(matches!(
            result,
            Err(RetryError::AttemptsExceeded { attempts: 2, .. })
        ));
    }

    #[test]
    fn honours_retry_after() {
        let err = ApiError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(
            classify_api_error(&err),
            RetryDisposition::RetryAfter(Duration::from_secs(3))
        );
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(5), Duration::from_millis(500));
    }
}
