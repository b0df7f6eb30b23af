use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

/// Bounded exponential backoff.
///
/// Attempt `n` (1-based) that fails with a retriable error is followed by a delay of
/// `base_delay_ms * 2^(n-1)` milliseconds. No jitter is applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay_ms: u64,
}

/// The two retry profiles used by backends: one for data-path operations (chunk writes,
/// session updates, notifications) and one for readiness probes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryProfiles {
    pub data: RetryPolicy,
    pub probe: RetryPolicy,
}

impl Default for RetryProfiles {
    fn default() -> Self {
        Self {
            data: RetryPolicy::data_path(),
            probe: RetryPolicy::probe(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RetryError<E> {
    #[error("operation cancelled")]
    Cancelled,
    #[error("{error} (after {attempts} attempt(s))")]
    Failed {
        attempts: u32,
        #[source]
        error: E,
    },
}

impl RetryPolicy {
    pub const fn new(attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            attempts,
            base_delay_ms,
        }
    }

    pub const fn data_path() -> Self {
        Self::new(5, 100)
    }

    pub const fn probe() -> Self {
        Self::new(2, 50)
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// Run `operation` until it succeeds, fails with an error `is_retriable` rejects, or the
    /// attempt budget runs out.
    ///
    /// `cancel` is checked before every attempt and raced against both the attempt itself and
    /// the backoff sleep; once it fires the retry loop returns [`RetryError::Cancelled`] without
    /// waiting for the in-flight attempt.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
        is_retriable: P,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                result = operation() => result,
            };

            match result {
                Ok(v) => return Ok(v),
                Err(error) if attempt < attempts && is_retriable(&error) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "transient error, retrying: {error}"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(error) => {
                    return Err(RetryError::Failed {
                        attempts: attempt,
                        error,
                    })
                }
            }
        }
    }
}
