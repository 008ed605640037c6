#![forbid(unsafe_code)]

//! Retry with deterministic back-off for storage writes.
//!
//! Delays use fixed formulas with no jitter, so tests can reason about
//! exact timing.
//!
//! ```
//! use fogmask_runtime::retry::{BackoffStrategy, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::default();
//! assert_eq!(policy.max_retries, 2);
//! assert_eq!(policy.delay(0), Duration::from_millis(50));
//! assert_eq!(policy.delay(1), Duration::from_millis(100));
//! assert_eq!(policy.delay(9), Duration::from_millis(400));
//! ```

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use web_time::Duration;

use crate::cancellation::CancellationToken;

/// How long to wait before each retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed { delay_ms: u64 },
    /// `base_ms * 2^attempt`, capped at `max_ms`.
    Exponential { base_ms: u64, max_ms: u64 },
}

/// Attempts and back-off for one logical write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = try once).
    pub max_retries: u32,
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            2,
            BackoffStrategy::Exponential {
                base_ms: 50,
                max_ms: 400,
            },
        )
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, backoff: BackoffStrategy) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Try once, never wait.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new(0, BackoffStrategy::Fixed { delay_ms: 0 })
    }

    /// Delay before retry number `attempt` (0-indexed).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.backoff {
            BackoffStrategy::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            BackoffStrategy::Exponential { base_ms, max_ms } => {
                let multiplier = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
                Duration::from_millis(base_ms.saturating_mul(multiplier).min(max_ms))
            }
        }
    }

    /// Upper bound on time spent waiting across all retries.
    #[must_use]
    pub fn total_max_delay(&self) -> Duration {
        (0..self.max_retries).map(|i| self.delay(i)).sum()
    }

    /// Run `op` until it succeeds, retries run out, or `token` is cancelled
    /// during a back-off. The last error is returned on failure.
    pub fn run<T, E: Display>(
        &self,
        token: &CancellationToken,
        what: &str,
        mut op: impl FnMut() -> Result<T, E>,
    ) -> Result<T, E> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(v) => {
                    if attempt > 0 {
                        tracing::debug!(what, attempt, "succeeded after retry");
                    }
                    return Ok(v);
                }
                Err(e) if attempt < self.max_retries => {
                    let delay = self.delay(attempt);
                    tracing::warn!(
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "attempt failed, backing off"
                    );
                    if token.wait_timeout(delay) {
                        tracing::debug!(what, "retry cancelled");
                        return Err(e);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationSource;
    use std::cell::Cell;

    #[test]
    fn exponential_doubles_then_caps() {
        let p = RetryPolicy::new(
            5,
            BackoffStrategy::Exponential {
                base_ms: 50,
                max_ms: 400,
            },
        );
        let delays: Vec<u64> = (0..5).map(|i| p.delay(i).as_millis() as u64).collect();
        assert_eq!(delays, vec![50, 100, 200, 400, 400]);
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay(200), Duration::from_millis(400));
    }

    #[test]
    fn total_delay_of_default() {
        assert_eq!(
            RetryPolicy::default().total_max_delay(),
            Duration::from_millis(150)
        );
        assert_eq!(RetryPolicy::no_retry().total_max_delay(), Duration::ZERO);
    }

    #[test]
    fn run_retries_until_success() {
        let p = RetryPolicy::new(3, BackoffStrategy::Fixed { delay_ms: 0 });
        let calls = Cell::new(0);
        let out: Result<u32, String> = p.run(&CancellationToken::never(), "test", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err("nope".into())
            } else {
                Ok(7)
            }
        });
        assert_eq!(out, Ok(7));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn run_gives_up_after_max_retries() {
        let p = RetryPolicy::new(2, BackoffStrategy::Fixed { delay_ms: 0 });
        let calls = Cell::new(0);
        let out: Result<(), String> = p.run(&CancellationToken::never(), "test", || {
            calls.set(calls.get() + 1);
            Err(format!("fail {}", calls.get()))
        });
        assert_eq!(out, Err("fail 3".to_string()));
    }

    #[test]
    fn cancellation_stops_back_off() {
        let p = RetryPolicy::new(5, BackoffStrategy::Fixed { delay_ms: 60_000 });
        let source = CancellationSource::new();
        source.cancel();
        let calls = Cell::new(0);
        let out: Result<(), &str> = p.run(&source.token(), "test", || {
            calls.set(calls.get() + 1);
            Err("down")
        });
        assert_eq!(out, Err("down"));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn policy_deserializes_from_json() {
        let p: RetryPolicy = serde_json::from_str(
            r#"{"max_retries": 1, "backoff": {"kind": "fixed", "delay_ms": 10}}"#,
        )
        .unwrap();
        assert_eq!(p, RetryPolicy::new(1, BackoffStrategy::Fixed { delay_ms: 10 }));
    }
}
