//! Bounded retry for single store calls.
//!
//! [`RetryExecutor`] wraps one logical store operation with a per-attempt
//! deadline and a bounded number of retries. Only failures classified as
//! [`Transient`] (and attempts that run past their deadline) are retried.
//! Everything else, concurrency conflicts in particular, is handed straight
//! back to the caller on the first occurrence.

use std::{fmt, future::Future, io, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Classification of errors that may succeed if the same call is repeated.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for io::Error {
    fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            io::ErrorKind::TimedOut
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::ConnectionRefused
                | io::ErrorKind::NotConnected
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::Interrupted
                | io::ErrorKind::WouldBlock
        )
    }
}

impl Transient for std::convert::Infallible {
    fn is_transient(&self) -> bool {
        match *self {}
    }
}

/// Delay between consecutive attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed {
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },
    /// Delay doubles with each retry, capped at `max`.
    Exponential {
        #[serde(with = "humantime_serde")]
        initial: Duration,
        #[serde(with = "humantime_serde")]
        max: Duration,
    },
}

impl Backoff {
    /// Delay to wait before retry number `retry` (starting at 1).
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        match *self {
            Self::Fixed { delay } => delay,
            Self::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(retry.saturating_sub(1));
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            initial: Duration::from_millis(50),
            max: Duration::from_secs(1),
        }
    }
}

/// Configuration for retrying transient store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = single attempt).
    pub max_retries: u32,
    pub backoff: Backoff,
    /// Deadline for each individual attempt.
    #[serde(with = "humantime_serde")]
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 7,
            backoff: Backoff::default(),
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub const fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Failure of a retried operation.
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// The cancellation signal fired before the operation succeeded.
    #[error("operation cancelled")]
    Cancelled,
    /// The final attempt ran past its deadline.
    #[error("operation timed out after {attempts} attempts")]
    TimedOut { attempts: u32 },
    /// The final attempt failed with a transient error.
    #[error("operation failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },
    /// The operation failed with an error that is not retried.
    #[error(transparent)]
    Rejected(E),
}

enum Failure<E> {
    Error(E),
    TimedOut,
}

impl<E: fmt::Display> fmt::Display for Failure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(e) => e.fmt(f),
            Self::TimedOut => f.write_str("attempt timed out"),
        }
    }
}

/// Runs store calls under a [`RetryPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation`, retrying transient failures and per-attempt timeouts.
    ///
    /// `operation` is invoked once per attempt and must build a fresh future
    /// each time. An attempt abandoned at its deadline is dropped, so the
    /// wrapped call must be all-or-nothing.
    ///
    /// # Errors
    ///
    /// - [`RetryError::Rejected`] for the first non-transient error
    /// - [`RetryError::Exhausted`] / [`RetryError::TimedOut`] once the retry
    ///   budget is spent
    /// - [`RetryError::Cancelled`] as soon as `cancel` fires, even mid-attempt
    pub async fn run<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Transient + 'static,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                tracing::debug!(attempt, "operation cancelled before attempt");
                return Err(RetryError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!(attempt, "operation cancelled mid-attempt");
                    return Err(RetryError::Cancelled);
                }
                outcome = tokio::time::timeout(self.policy.attempt_timeout, operation()) => outcome,
            };

            let failure = match outcome {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        tracing::debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(error)) if !error.is_transient() => return Err(RetryError::Rejected(error)),
                Ok(Err(error)) => Failure::Error(error),
                Err(_elapsed) => Failure::TimedOut,
            };

            if attempt >= max_attempts {
                tracing::warn!(attempt, error = %failure, "retry budget exhausted");
                return Err(match failure {
                    Failure::Error(source) => RetryError::Exhausted {
                        attempts: attempt,
                        source,
                    },
                    Failure::TimedOut => RetryError::TimedOut { attempts: attempt },
                });
            }

            let delay = self.policy.backoff.delay_for_retry(attempt);
            tracing::warn!(
                attempt,
                max_attempts,
                ?delay,
                error = %failure,
                "transient store failure, retrying"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!(attempt, "operation cancelled during backoff");
                    return Err(RetryError::Cancelled);
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
