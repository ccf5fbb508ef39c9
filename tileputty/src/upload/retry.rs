//! Retry policy for storage requests.
//!
//! Only the network call is retried, never the whole work item. Errors are
//! retried when [`StorageError::is_retryable`] says so; everything else
//! surfaces on the first attempt.
//!
//! # Example
//!
//! ```ignore
//! use tileputty::upload::{with_retry, RetryPolicy};
//!
//! // Standard mode: 10 attempts, 100ms doubling to a 20s cap
//! let policy = RetryPolicy::standard(10);
//!
//! let outcome = with_retry(&policy, "upload", || store.put_file(bucket, key, path, &meta)).await;
//! println!("finished after {} attempts", outcome.attempts);
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::storage::StorageError;

// =============================================================================
// Retry Policy Constants
// =============================================================================

/// Default initial delay for exponential backoff (100ms).
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;

/// Default maximum delay for exponential backoff (20 seconds).
pub const DEFAULT_MAX_DELAY_SECS: u64 = 20;

/// Default multiplier for exponential backoff.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// How a storage request handles transient failures.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryPolicy {
    /// No retries - fail immediately on error.
    None,

    /// Fixed number of attempts with constant delay between them.
    Fixed {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Delay between retry attempts.
        delay: Duration,
    },

    /// Exponential backoff with configurable parameters.
    ///
    /// The delay grows by `multiplier` after each failed attempt, up to
    /// `max_delay`.
    ExponentialBackoff {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Initial delay after the first failure.
        initial_delay: Duration,
        /// Maximum delay cap (delay won't exceed this).
        max_delay: Duration,
        /// Multiplier applied to delay after each failure (typically 2.0).
        multiplier: f64,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard(crate::config::DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// Standard backoff mode.
    ///
    /// Uses:
    /// - Initial delay: 100ms ([`DEFAULT_INITIAL_DELAY_MS`])
    /// - Max delay: 20 seconds ([`DEFAULT_MAX_DELAY_SECS`])
    /// - Multiplier: 2.0 ([`DEFAULT_BACKOFF_MULTIPLIER`])
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Maximum number of attempts (including initial)
    pub fn standard(max_attempts: u32) -> Self {
        Self::ExponentialBackoff {
            max_attempts,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    /// Creates a fixed retry policy.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed {
            max_attempts,
            delay,
        }
    }

    /// Calculates the delay before the next attempt.
    ///
    /// # Arguments
    ///
    /// * `attempt` - Number of attempts made so far (1 after the first failure)
    ///
    /// # Returns
    ///
    /// The delay to wait before retrying, or `None` if the attempt budget is spent.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed {
                max_attempts,
                delay,
            } => (attempt < *max_attempts).then_some(*delay),
            Self::ExponentialBackoff {
                max_attempts,
                initial_delay,
                max_delay,
                multiplier,
            } => {
                if attempt >= *max_attempts {
                    return None;
                }
                // initial_delay * multiplier^(attempt-1), capped
                let factor = multiplier.powi(attempt.saturating_sub(1) as i32);
                let delay_ms = (initial_delay.as_millis() as f64 * factor)
                    .min(max_delay.as_millis() as f64);
                Some(Duration::from_millis(delay_ms as u64).min(*max_delay))
            }
        }
    }

    /// Delay actually slept before the next attempt.
    ///
    /// Exponential backoff uses equal jitter: the nominal delay from
    /// [`delay_for_attempt`](Self::delay_for_attempt) is spread over
    /// `[delay / 2, delay]` so throttled workers do not retry in lockstep.
    /// Fixed delays are used as is.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Option<Duration> {
        let delay = self.delay_for_attempt(attempt)?;
        match self {
            Self::ExponentialBackoff { .. } => Some(equal_jitter(delay)),
            _ => Some(delay),
        }
    }

    /// Returns the maximum number of attempts for this policy.
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } => *max_attempts,
            Self::ExponentialBackoff { max_attempts, .. } => *max_attempts,
        }
    }
}

/// Pick a delay uniformly from `[delay / 2, delay]`.
pub fn equal_jitter(delay: Duration) -> Duration {
    let half = delay / 2;
    let spread = (delay - half).as_nanos() as u64;
    if spread == 0 {
        return delay;
    }
    half + Duration::from_nanos(rand::rng().random_range(0..=spread))
}

/// Result of a retried operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Final result: the first success, or the last error.
    pub result: Result<T, StorageError>,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

/// Run `operation` until it succeeds, fails permanently, or the policy gives up.
///
/// `label` names the operation in retry log lines.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        let error = match operation().await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                }
            }
            Err(e) => e,
        };

        let delay = if error.is_retryable() {
            policy.backoff_for_attempt(attempts)
        } else {
            None
        };

        match delay {
            Some(delay) => {
                warn!(
                    operation = label,
                    attempt = attempts,
                    max_attempts = policy.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient storage error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            None => {
                return RetryOutcome {
                    result: Err(error),
                    attempts,
                }
            }
        }
    }
}
