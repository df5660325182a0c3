//! Retry policies and the generic "poll until" primitive.
//!
//! Every wait in the workspace (operation completion, phase convergence,
//! deletion verification, transient-error retries) goes through these
//! functions, so a paused tokio clock drives all of them in tests.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    Fixed {
        delay_ms: u64,
    },
    Exponential {
        initial_ms: u64,
        max_ms: u64,
        factor: u32,
    },
}

impl Backoff {
    /// Delay before retry number `retry` (0 = first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Self::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Self::Exponential {
                initial_ms,
                max_ms,
                factor,
            } => {
                let scaled = u64::from(factor)
                    .checked_pow(retry)
                    .and_then(|m| initial_ms.checked_mul(m))
                    .unwrap_or(u64::MAX);
                Duration::from_millis(scaled.min(max_ms))
            }
        }
    }
}

/// Bounds on a polling or retry loop. At least one of `max_attempts` and
/// `timeout_ms` should be set, otherwise only cancellation stops the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl RetryPolicy {
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff: Backoff::Fixed {
                delay_ms: delay.as_millis() as u64,
            },
            timeout_ms: None,
        }
    }

    pub fn exponential(initial: Duration, max: Duration, timeout: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff: Backoff::Exponential {
                initial_ms: initial.as_millis() as u64,
                max_ms: max.as_millis() as u64,
                factor: 2,
            },
            timeout_ms: Some(timeout.as_millis() as u64),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    Ready(T),
    /// Not there yet; the reason is kept for the final error.
    Pending(String),
}

#[derive(Debug, Error)]
pub enum PollError<E> {
    #[error("gave up after {attempts} attempts in {elapsed:?}: {last}")]
    Exhausted {
        attempts: u32,
        elapsed: Duration,
        last: String,
    },

    #[error("timed out after {elapsed:?} ({attempts} attempts): {last}")]
    TimedOut {
        attempts: u32,
        elapsed: Duration,
        last: String,
    },

    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },

    #[error("{0}")]
    Probe(E),
}

/// Call `probe` until it reports `Ready`, fails, or the policy runs out.
///
/// The probe receives the 1-based attempt number. A probe error stops the
/// loop immediately; probes decide themselves which errors are "not yet".
/// Cancellation is checked before every probe and interrupts the sleep.
pub async fn poll_until<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T, PollError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Poll<T>, E>>,
{
    let start = Instant::now();
    let deadline = policy.timeout().map(|t| start + t);
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled { attempts: attempt });
        }
        attempt += 1;

        let last = match probe(attempt).await.map_err(PollError::Probe)? {
            Poll::Ready(value) => return Ok(value),
            Poll::Pending(reason) => reason,
        };

        if policy.max_attempts.is_some_and(|max| attempt >= max) {
            return Err(PollError::Exhausted {
                attempts: attempt,
                elapsed: start.elapsed(),
                last,
            });
        }

        let now = Instant::now();
        if deadline.is_some_and(|d| now >= d) {
            return Err(PollError::TimedOut {
                attempts: attempt,
                elapsed: start.elapsed(),
                last,
            });
        }

        let mut wake = now + policy.backoff.delay(attempt - 1);
        if let Some(d) = deadline {
            wake = wake.min(d);
        }
        tracing::debug!(attempt, reason = %last, "not converged yet, waiting");

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(PollError::Cancelled { attempts: attempt });
            }
            _ = tokio::time::sleep_until(wake) => {}
        }
    }
}

/// Run `op` again while it fails with an error `retryable` accepts and the
/// policy still has budget. Any other error is returned as is.
pub async fn retry_if<T, E, F, Fut, R>(policy: &RetryPolicy, mut op: F, retryable: R) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: fmt::Display,
{
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let delay = policy.backoff.delay(attempt - 1);
        let attempts_left = policy.max_attempts.is_none_or(|max| attempt < max);
        let time_left = policy
            .timeout()
            .is_none_or(|t| start.elapsed() + delay <= t);

        if !retryable(&err) || !attempts_left || !time_left {
            return Err(err);
        }

        tracing::warn!(attempt, error = %err, delay_ms = delay.as_millis() as u64, "retrying");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_is_capped() {
        let backoff = Backoff::Exponential {
            initial_ms: 500,
            max_ms: 4_000,
            factor: 2,
        };
        assert_eq!(backoff.delay(0), Duration::from_millis(500));
        assert_eq!(backoff.delay(2), Duration::from_millis(2_000));
        assert_eq!(backoff.delay(3), Duration::from_millis(4_000));
        assert_eq!(backoff.delay(60), Duration::from_millis(4_000));
    }

    #[test]
    fn policy_round_trips_through_config_json() {
        let policy = RetryPolicy::fixed(Duration::from_secs(3), 10);
        let json = serde_json::to_value(policy).unwrap();
        assert_eq!(json["backoff"]["kind"], "fixed");
        assert_eq!(json["backoff"]["delay_ms"], 3_000);
        let back: RetryPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(back, policy);
    }
}
