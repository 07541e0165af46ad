//! Retry with exponential backoff.
//!
//! [`retry_with_backoff`] re-invokes an async operation until it succeeds or
//! the [`RetryPolicy`] runs out of attempts, sleeping
//! `base_delay * 2^attempt_index` between attempts. It knows nothing about
//! task records; [`Retrying`](crate::handler::Retrying) is the adapter that
//! applies it to a [`TaskHandler`](crate::handler::TaskHandler).
//!
//! The loop holds its caller for the whole backoff: a task in backoff keeps
//! its worker slot until the last attempt finishes.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use task_engine::retry::{retry_with_backoff, RetryPolicy, TokioSleeper};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::new(3, Duration::from_millis(1));
//! let mut calls = 0;
//! let outcome: Result<u32, String> = retry_with_backoff(&policy, &TokioSleeper, |attempt| {
//!     calls += 1;
//!     async move {
//!         if attempt < 2 { Err(format!("flaky #{attempt}")) } else { Ok(attempt) }
//!     }
//! })
//! .await;
//! assert_eq!(outcome, Ok(2));
//! assert_eq!(calls, 3);
//! # });
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::constants::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_RETRIES};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// How many times to try and how long to wait in between.
///
/// `max_retries` is the total number of attempts; `0` is treated as `1`.
///
/// ```
/// use std::time::Duration;
/// use task_engine::retry::RetryPolicy;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.max_retries, 3);
/// assert_eq!(policy.delay_for(0), Duration::from_secs(1));
/// assert_eq!(policy.delay_for(2), Duration::from_secs(4));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_retries: u32,
    /// Delay after the first failed attempt; doubles after each further one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with an explicit attempt count and base delay.
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Sets the base delay from fractional seconds. Negative or non-finite
    /// values become zero.
    ///
    /// ```
    /// use std::time::Duration;
    /// use task_engine::retry::RetryPolicy;
    ///
    /// let policy = RetryPolicy::default().with_base_delay_secs(0.5);
    /// assert_eq!(policy.base_delay, Duration::from_millis(500));
    /// assert_eq!(RetryPolicy::default().with_base_delay_secs(-1.0).base_delay, Duration::ZERO);
    /// ```
    pub fn with_base_delay_secs(mut self, secs: f64) -> Self {
        self.base_delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO);
        self
    }

    /// Effective number of attempts (never zero).
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Backoff after the zero-based `attempt_index`: `base_delay * 2^attempt_index`,
    /// saturating at [`Duration::MAX`] instead of overflowing.
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        1u128
            .checked_shl(attempt_index)
            .and_then(|factor| self.base_delay.as_nanos().checked_mul(factor))
            .and_then(|nanos| {
                let secs = u64::try_from(nanos / NANOS_PER_SEC).ok()?;
                let subsec = u32::try_from(nanos % NANOS_PER_SEC).ok()?;
                Some(Duration::new(secs, subsec))
            })
            .unwrap_or(Duration::MAX)
    }
}

/// Suspends the current task. Swappable so tests can observe delays
/// without waiting for them.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Waits for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Runs `op` until it succeeds or `policy` is exhausted.
///
/// `op` receives the zero-based attempt index. Intermediate failures are
/// logged at `warn` and swallowed; the last error is returned as-is.
pub async fn retry_with_backoff<T, E, Op, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    op: Op,
) -> Result<T, E>
where
    E: Display,
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with_backoff_notify(policy, sleeper, |_| async {}, op).await
}

/// Like [`retry_with_backoff`], but awaits `on_retry(attempt_index)` after
/// each backoff sleep, right before the retried attempt starts.
pub async fn retry_with_backoff_notify<T, E, Op, Fut, OnRetry, RFut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut on_retry: OnRetry,
    mut op: Op,
) -> Result<T, E>
where
    E: Display,
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    OnRetry: FnMut(u32) -> RFut,
    RFut: Future<Output = ()>,
{
    let attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "attempt failed, backing off"
                );
                sleeper.sleep(delay).await;
                attempt += 1;
                on_retry(attempt).await;
            },
            Err(err) => {
                tracing::warn!(
                    attempts = attempts,
                    error = %err,
                    "all attempts failed"
                );
                return Err(err);
            },
        }
    }
}
