use std::time::Duration;

use crate::error::BridgeError;

/// Explicit retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            max_retries: config.mt4_max_retries,
            base_delay: config.mt4_retry_base_delay(),
        }
    }

    /// Linear backoff: `base_delay * attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Outcome of a single attempt, as classified by the caller. The driver
/// itself knows nothing about broker error codes -- it only reacts to
/// `Retry`/`Fatal`/`Ok`, keeping the broker-code matrix (`BridgeError`)
/// decoupled from the backoff mechanics.
pub enum AttemptOutcome<T> {
    Done(T),
    Retry(BridgeError),
    Fatal(BridgeError),
}

/// Drive `attempt_fn` up to `policy.max_retries` times with linear backoff
/// between attempts. The retry loop is local to this invocation -- it never
/// observes another caller's state, matching the caller-driven-requests
/// concurrency domain.
pub async fn run_with_retry<T, F, Fut>(policy: &RetryPolicy, mut attempt_fn: F) -> Result<T, BridgeError>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = AttemptOutcome<T>>,
{
    let mut last_err: Option<BridgeError> = None;

    for attempt in 1..=policy.max_retries {
        match attempt_fn(attempt).await {
            AttemptOutcome::Done(value) => return Ok(value),
            AttemptOutcome::Fatal(err) => return Err(err),
            AttemptOutcome::Retry(err) => {
                last_err = Some(err);
                if attempt < policy.max_retries {
                    tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                }
            }
        }
    }

    Err(last_err.unwrap_or(BridgeError::RetriesExhausted(policy.max_retries)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn linear_backoff_scales_with_attempt() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn succeeds_on_second_attempt() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);

        let result = run_with_retry(&policy, |attempt| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt < 2 {
                    AttemptOutcome::Retry(BridgeError::OrderFailed {
                        code: 146,
                        message: "Trade context busy (error code: 146)".into(),
                    })
                } else {
                    AttemptOutcome::Done(n)
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fatal_short_circuits() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);

        let result: Result<(), BridgeError> = run_with_retry(&policy, |_attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { AttemptOutcome::Fatal(BridgeError::PositionAlreadyClosed(1001)) }
        })
        .await;

        assert!(matches!(result, Err(BridgeError::PositionAlreadyClosed(1001))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_after_max_retries() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);

        let result: Result<(), BridgeError> = run_with_retry(&policy, |_attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                AttemptOutcome::Retry(BridgeError::OrderFailed {
                    code: 146,
                    message: "busy".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
