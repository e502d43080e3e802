//! Retry with fixed, optionally jittered, backoff
//!
//! Used by lock acquisition and by anything else that is contended inside
//! the server. The only suspension point is the sleep between attempts.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// How often and how long to retry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt
    pub retries: u32,
    /// Wait between attempts
    pub wait: Duration,
    /// Relative spread applied to `wait`, between 0.0 and 1.0
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 13,
            wait: Duration::from_millis(150),
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, wait: Duration) -> Self {
        Self {
            retries,
            wait,
            jitter: 0.0,
        }
    }

    /// One attempt, no waiting
    pub fn once() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Total number of attempts
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Wait before the next attempt, jitter applied
    pub fn delay(&self) -> Duration {
        if self.jitter <= 0.0 || self.wait.is_zero() {
            return self.wait;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        self.wait.mul_f64(factor.max(0.0))
    }
}

/// A successful result and how many attempts it took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

impl<T> Attempted<T> {
    /// Succeeded only after waiting
    pub fn was_delayed(&self) -> bool {
        self.attempts > 1
    }
}

/// Final failure of a retried operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error
    Exhausted { attempts: u32, last: E },
    /// An attempt failed with an error that waiting cannot fix
    Permanent { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::Permanent { attempts, .. } => *attempts,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::Permanent { error, .. } => error,
        }
    }
}

/// Retry `op` on every error
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, op: F) -> Result<Attempted<T>, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_if(policy, op, |_| true).await
}

/// Retry `op` while `should_retry` accepts the error
pub async fn retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    mut op: F,
    should_retry: P,
) -> Result<Attempted<T>, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                });
            }
            Err(error) if !should_retry(&error) => {
                return Err(RetryError::Permanent {
                    attempts: attempt,
                    error,
                });
            }
            Err(last) if attempt >= attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last,
                });
            }
            Err(_) => {
                let delay = policy.delay();
                if !delay.is_zero() {
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_delay() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        let start = Instant::now();

        let result = retry(&policy, || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("busy")
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result.value, 42);
        assert_eq!(result.attempts, 3);
        assert!(result.was_delayed());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200) && elapsed < Duration::from_millis(210));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_is_distinct() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let start = Instant::now();

        let err = retry(&policy, || async { Err::<(), _>("busy") })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            RetryError::Exhausted {
                attempts: 4,
                last: "busy"
            }
        );
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300) && elapsed < Duration::from_millis(310));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(10, Duration::from_secs(1));

        let err = retry_if(
            &policy,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("unknown") }
            },
            |e| *e != "unknown",
        )
        .await
        .unwrap_err();

        assert_eq!(err.attempts(), 1);
        assert_eq!(err.into_inner(), "unknown");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy::new(1, Duration::from_millis(100)).with_jitter(0.5);
        for _ in 0..100 {
            let d = policy.delay();
            assert!(d >= Duration::from_millis(49) && d <= Duration::from_millis(151));
        }
        assert_eq!(RetryPolicy::once().attempts(), 1);
    }
}
