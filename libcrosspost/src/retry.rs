//! Bounded retry with exponential backoff
//!
//! The orchestrator is generic over the error type: whether a failure is worth
//! another attempt is decided by the caller-supplied predicate, and a
//! server-provided `retry_after` hint replaces the computed delay when larger.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::CrosspostError;

/// How many times to attempt an operation and how long to wait in between
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    /// Cap for a single computed backoff delay
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay: None,
        }
    }

    /// Backoff before attempt `attempt + 1`: `initial_delay * 2^(attempt-1)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.initial_delay.saturating_mul(1u32 << exponent);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

/// Errors that know their own retry classification
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for CrosspostError {
    fn is_retryable(&self) -> bool {
        CrosspostError::is_retryable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        CrosspostError::retry_after(self)
    }
}

/// State of one logical operation across its attempts
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
    /// Attempt currently running, starting at 1
    pub attempt: u32,
    /// Delay that preceded the current attempt
    pub next_delay: Duration,
    pub last_error: Option<String>,
    /// Every failed attempt, in order
    pub failures: Vec<String>,
}

/// Successful value together with the number of attempts it took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Final error together with the number of attempts made
#[derive(Debug)]
pub struct Exhausted<E> {
    pub error: E,
    pub attempts: u32,
}

/// Invoke `operation` until it succeeds, fails permanently, or runs out of attempts
///
/// `label` names the operation in log output.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    operation: F,
) -> Result<Attempted<T>, Exhausted<E>>
where
    E: Retryable + std::fmt::Display,
    F: FnMut(RetryContext) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    with_retry_if(policy, label, |e: &E| e.is_retryable(), |e: &E| e.retry_after(), operation)
        .await
}

/// Like [`with_retry`] with explicit classification closures
pub async fn with_retry_if<T, E, F, Fut, R, H>(
    policy: &RetryPolicy,
    label: &str,
    is_retryable: R,
    retry_after: H,
    mut operation: F,
) -> Result<Attempted<T>, Exhausted<E>>
where
    E: std::fmt::Display,
    F: FnMut(RetryContext) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    H: Fn(&E) -> Option<Duration>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut ctx = RetryContext {
        attempt: 1,
        ..Default::default()
    };

    loop {
        match operation(ctx.clone()).await {
            Ok(value) => {
                if ctx.attempt > 1 {
                    info!("{} succeeded on attempt {}", label, ctx.attempt);
                }
                return Ok(Attempted {
                    value,
                    attempts: ctx.attempt,
                });
            }
            Err(error) => {
                let message = error.to_string();
                ctx.failures.push(message.clone());
                ctx.last_error = Some(message);

                if !is_retryable(&error) {
                    warn!(
                        "{} failed permanently on attempt {}/{}: {}",
                        label, ctx.attempt, max_attempts, error
                    );
                    return Err(Exhausted {
                        error,
                        attempts: ctx.attempt,
                    });
                }

                if ctx.attempt >= max_attempts {
                    warn!(
                        "{} failed after {} attempts: {}",
                        label, max_attempts, error
                    );
                    return Err(Exhausted {
                        error,
                        attempts: ctx.attempt,
                    });
                }

                let computed = policy.backoff(ctx.attempt);
                let delay = match retry_after(&error) {
                    Some(hint) if hint > computed => hint,
                    _ => computed,
                };
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {}ms...",
                    label,
                    ctx.attempt,
                    max_attempts,
                    error,
                    delay.as_millis()
                );
                sleep(delay).await;
                ctx.attempt += 1;
                ctx.next_delay = delay;
            }
        }
    }
}
