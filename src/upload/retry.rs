//! Bounded retry with configurable backoff
//!
//! Shared by the chunk writer (exponential backoff) and the rename steps of
//! the finalize pipeline (fixed delay).

use std::future::Future;
use std::time::Duration;

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Exponential,
}

/// Outcome of a single attempt that did not succeed
#[derive(Debug)]
pub enum Attempt<E> {
    /// Worth trying again
    Transient(E),
    /// Retrying will not help
    Permanent(E),
}

/// Why a retried operation gave up
#[derive(Debug)]
pub enum RetryError<E> {
    Permanent(E),
    Exhausted { attempts: u32, last: E },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            backoff: Backoff::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            backoff: Backoff::Exponential,
        }
    }

    /// Chunk writes: 3 attempts, 1s doubling
    pub fn chunk_write() -> Self {
        Self::exponential(3, Duration::from_secs(1))
    }

    /// Artifact renames: 3 attempts, 5s apart
    pub fn rename() -> Self {
        Self::fixed(3, Duration::from_secs(5))
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.initial_delay,
            Backoff::Exponential => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                self.initial_delay.saturating_mul(factor)
            }
        }
    }

    /// Run `op` until it succeeds, fails permanently or attempts run out.
    /// The closure receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        E: std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, Attempt<E>>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(Attempt::Permanent(e)) => return Err(RetryError::Permanent(e)),
                Err(Attempt::Transient(e)) => {
                    if attempt >= max_attempts {
                        tracing::error!(
                            operation = operation,
                            attempts = attempt,
                            error = %e,
                            "Retries exhausted"
                        );
                        return Err(RetryError::Exhausted { attempts: attempt, last: e });
                    }

                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        operation = operation,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delays() {
        let exp = RetryPolicy::chunk_write();
        assert_eq!(exp.delay_after(1), Duration::from_secs(1));
        assert_eq!(exp.delay_after(2), Duration::from_secs(2));
        assert_eq!(exp.delay_after(3), Duration::from_secs(4));

        let fixed = RetryPolicy::rename();
        assert_eq!(fixed.delay_after(1), Duration::from_secs(5));
        assert_eq!(fixed.delay_after(3), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::exponential(3, Duration::ZERO);

        let result: Result<u32, RetryError<String>> = policy
            .run("flaky", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(Attempt::Transient("busy".to_string()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        let policy = RetryPolicy::fixed(3, Duration::ZERO);
        let result: Result<(), RetryError<String>> = policy
            .run("always", |_| async { Err(Attempt::Transient("nope".to_string())) })
            .await;

        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last, "nope");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_permanent_stops_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(3, Duration::ZERO);
        let result: Result<(), RetryError<String>> = policy
            .run("collide", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Attempt::Permanent("exists".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
