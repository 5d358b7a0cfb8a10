use std::{fmt::Display, future::Future, time::Duration};

use log::*;
use rand::Rng;
use thiserror::Error;

/// A reusable exponential-backoff-with-jitter policy.
///
/// The policy is stateless; each call to [`RetryPolicy::retry`] runs the given operation up to `max_attempts` times,
/// sleeping `base_delay * 2^(attempt-1)` (capped at `max_delay`, with ±10% jitter when enabled) between attempts.
/// The catalog sync client uses it for per-page fetches.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay, max_delay: Duration::from_secs(60), jitter: true }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The backoff delay that follows the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exp).min(self.max_delay);
        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.9..=1.1);
            delay.mul_f64(factor)
        } else {
            delay
        }
    }

    /// Run `f` until it succeeds, or until `max_attempts` attempts have failed. The closure receives the 1-based
    /// attempt number. Intermediate failures are logged at `warn` level; the final failure is returned to the caller.
    pub async fn retry<T, E, F, Fut>(&self, op: &str, mut f: F) -> Result<T, RetryError<E>>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match f(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => {
                    error!("⏳️ {op}: giving up after {attempt} attempt(s). {e}");
                    return Err(RetryError { op: op.to_string(), attempts: attempt, last: e });
                },
                Err(e) => {
                    let backoff = self.delay_for(attempt);
                    warn!("⏳️ {op}: attempt {attempt}/{} failed ({e}). Retrying in {backoff:?}", self.max_attempts);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                },
            }
        }
    }
}

#[derive(Debug, Error)]
#[error("{op} failed after {attempts} attempt(s). {last}")]
pub struct RetryError<E: Display> {
    pub op: String,
    pub attempts: u32,
    pub last: E,
}

#[cfg(test)]
mod test {
    use std::{
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    use super::RetryPolicy;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_secs(2)).with_max_delay(Duration::from_secs(10)).without_jitter();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for(10), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(10)).without_jitter();
        let result = policy
            .retry("flaky op", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err("not yet")
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_last_error() {
        let policy = RetryPolicy::new(3, Duration::from_millis(5)).without_jitter();
        let err = policy.retry("doomed op", |_| async { Err::<(), _>("boom") }).await.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last, "boom");
        assert!(err.to_string().contains("doomed op"));
    }
}
