//! Retry policy for activities: per-attempt timeout plus exponential backoff.

use cms_core::config::EngineConfig;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: u32,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            backoff_multiplier: 2,
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.activity_max_attempts.max(1),
            initial_delay: config.activity_initial_backoff(),
            backoff_multiplier: 2,
            attempt_timeout: config.activity_timeout(),
        }
    }

    /// Delay to wait after the failed `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 1..attempt {
            delay = delay.saturating_mul(self.backoff_multiplier);
        }
        delay
    }
}

/// Last failure once every attempt was used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError<E> {
    Failed(E),
    TimedOut(Duration),
}

/// Runs `operation` until it succeeds or the policy gives up. Each attempt
/// is bounded by `attempt_timeout`.
pub async fn retry_with_policy<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, RetryExhausted<AttemptError<E>>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let error = match tokio::time::timeout(policy.attempt_timeout, operation(attempt)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => AttemptError::Failed(err),
            Err(_) => AttemptError::TimedOut(policy.attempt_timeout),
        };

        if attempt >= max_attempts {
            return Err(RetryExhausted {
                attempts: attempt,
                last_error: error,
            });
        }

        let delay = policy.delay_after(attempt);
        tracing::debug!(
            attempt = attempt + 1,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            "retrying activity"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2,
            attempt_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn backoff_doubles_each_attempt() {
        let policy = policy();
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
    }

    #[test]
    fn default_matches_engine_config_defaults() {
        assert_eq!(
            RetryPolicy::from_config(&EngineConfig::default()),
            RetryPolicy::default()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = tokio::time::Instant::now();
        let result = retry_with_policy(&policy(), |attempt| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err("transient")
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let result: Result<(), _> =
            retry_with_policy(&policy(), |_| async { Err::<(), _>("down") }).await;
        assert_eq!(
            result,
            Err(RetryExhausted {
                attempts: 3,
                last_error: AttemptError::Failed("down"),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out() {
        let mut policy = policy();
        policy.max_attempts = 1;
        let result: Result<(), RetryExhausted<AttemptError<&str>>> =
            retry_with_policy(&policy, |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert_eq!(
            result,
            Err(RetryExhausted {
                attempts: 1,
                last_error: AttemptError::TimedOut(Duration::from_secs(1)),
            })
        );
    }
}
