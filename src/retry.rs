//! Shared retry-with-backoff utility.
//!
//! Every retried upstream call goes through [`retry`] with an explicit
//! [`RetryPolicy`]. The caller classifies each failure as retryable or fatal.

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::debug;

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep and try again (budget permitting).
    Retry,
    /// Stop immediately and surface the error.
    Abort,
}

/// Backoff parameters for a retried operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
    /// Wall-clock cap across all attempts and sleeps.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            max_elapsed: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Policy with no sleeping between attempts (for tests).
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_elapsed: Duration::from_secs(30),
        }
    }

    /// Capped exponential delay for a 0-indexed retry, before jitter.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let multiplier = 2f64.powi(retry.min(30) as i32);
        let delay = self.base_delay.as_secs_f64() * multiplier;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// "Equal jitter": half the backoff fixed, half random.
    fn jittered_delay(&self, retry: u32) -> Duration {
        let delay = self.backoff_delay(retry);
        if delay.is_zero() {
            return delay;
        }
        let half = delay / 2;
        let spread = rand::thread_rng().gen_range(0..=half.as_millis() as u64);
        half + Duration::from_millis(spread)
    }
}

/// Why [`retry`] gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The classifier returned [`RetryDecision::Abort`].
    Aborted { error: E, attempts: u32 },
    /// Attempt budget or wall-clock cap ran out.
    Exhausted {
        error: E,
        attempts: u32,
        elapsed: Duration,
    },
}

#[cfg(test)]
impl<E> RetryError<E> {
    /// The last error observed.
    fn into_inner(self) -> E {
        match self {
            Self::Aborted { error, .. } | Self::Exhausted { error, .. } => error,
        }
    }

    /// Number of attempts made.
    fn attempts(&self) -> u32 {
        match self {
            Self::Aborted { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Run `op` until it succeeds, the classifier aborts, or the policy runs out.
///
/// `op` receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    mut op: F,
    mut classify: C,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: FnMut(&E, u32) -> RetryDecision,
{
    let started = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if classify(&error, attempt) == RetryDecision::Abort {
            return Err(RetryError::Aborted {
                error,
                attempts: attempt,
            });
        }

        let delay = policy.jittered_delay(attempt - 1);
        let elapsed = started.elapsed();
        if attempt >= max_attempts || elapsed + delay > policy.max_elapsed {
            return Err(RetryError::Exhausted {
                error,
                attempts: attempt,
                elapsed,
            });
        }

        debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying after failure");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
