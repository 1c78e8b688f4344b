use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{Error, Result};

/// Bounded retry with exponential backoff.
///
/// After failed attempt `n` (zero-based) the controller waits
/// `base_delay * 2^n`; there is no wait after the final attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Error::InvalidArgument(
                "max attempts must be at least 1".into(),
            ));
        }
        Ok(Self {
            max_attempts,
            ..Self::default()
        })
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Wait after failed attempt `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Run `operation` until it succeeds or the attempt budget is spent.
///
/// The closure receives the zero-based attempt number. Non-retryable errors
/// (see [`Error::is_retryable`]) are returned immediately; otherwise the final
/// failure is wrapped in [`Error::ExhaustedRetries`].
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..policy.max_attempts {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    info!(attempt = attempt + 1, "transcription succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "transcription attempt failed"
                );
                if attempt + 1 < policy.max_attempts {
                    let delay = policy.delay_for(attempt);
                    info!(delay_ms = delay.as_millis() as u64, "backing off");
                    tokio::time::sleep(delay).await;
                }
                last_error = Some(e);
            }
        }
    }

    Err(Error::ExhaustedRetries {
        attempts: policy.max_attempts,
        source: Box::new(
            last_error.unwrap_or_else(|| Error::Backend("no attempts were made".into())),
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_saturates() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(64), Duration::from_secs(u32::MAX as u64));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        assert!(matches!(
            RetryPolicy::new(0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt_after_two_backoffs() {
        let policy = RetryPolicy::default();
        let mut call_times = Vec::new();

        let result = with_retry(&policy, |attempt| {
            call_times.push(Instant::now());
            async move {
                if attempt < 2 {
                    Err(Error::Backend(format!("flaky {attempt}")))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(call_times.len(), 3);
        let first_wait = call_times[1] - call_times[0];
        let second_wait = call_times[2] - call_times[1];
        assert_eq!(first_wait, Duration::from_secs(1));
        assert_eq!(second_wait, Duration::from_secs(2));
        assert!(second_wait > first_wait);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_exhausts_budget() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let started = Instant::now();

        let result: Result<()> = with_retry(&policy, |attempt| {
            calls += 1;
            async move { Err(Error::Backend(format!("down {attempt}"))) }
        })
        .await;

        assert_eq!(calls, 3);
        match result {
            Err(Error::ExhaustedRetries { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert_eq!(source.to_string(), "backend error: down 2");
            }
            other => panic!("expected ExhaustedRetries, got {other:?}"),
        }
        // 1s + 2s, nothing after the last attempt
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_argument_is_not_retried() {
        let policy = RetryPolicy::default();
        let mut calls = 0;

        let result: Result<()> = with_retry(&policy, |_| {
            calls += 1;
            async { Err(Error::InvalidArgument("max_seg_seconds above ceiling".into())) }
        })
        .await;

        assert_eq!(calls, 1);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_single_attempt_policy() {
        let policy = RetryPolicy::new(1).unwrap();
        let result: Result<()> =
            with_retry(&policy, |_| async { Err(Error::Backend("nope".into())) }).await;
        assert!(matches!(
            result,
            Err(Error::ExhaustedRetries { attempts: 1, .. })
        ));
    }
}
