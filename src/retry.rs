use std::time::Duration;

use tracing::warn;

use crate::error::Result;

/// Capped exponential backoff for transient service failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `op`, retrying it while it fails with a transient error.
///
/// Terminal errors and the error of the final attempt are returned as-is.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    what: &str,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    what,
                    attempt,
                    max_attempts = policy.max_attempts,
                    ?delay,
                    error = %err,
                    "transient failure, retrying"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::error::{Error, FailureKind};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn transient() -> Error {
        Error::EmbeddingService {
            kind: FailureKind::Transient,
            message: "503 Service Unavailable".into(),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(2));
        assert_eq!(policy.backoff(10), Duration::from_secs(8));
        assert_eq!(policy.backoff(64), Duration::from_secs(8));
    }

    #[test]
    fn recovers_from_transient_failure() {
        let calls = Cell::new(0);
        let value = with_retry(&fast(3), "embed", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 { Err(transient()) } else { Ok(42) }
        })
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let err = with_retry(&fast(2), "embed", || -> Result<()> {
            calls.set(calls.get() + 1);
            Err(transient())
        })
        .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn terminal_errors_are_not_retried() {
        let calls = Cell::new(0);
        let err = with_retry(&fast(5), "embed", || -> Result<()> {
            calls.set(calls.get() + 1);
            Err(Error::EmbeddingService {
                kind: FailureKind::Terminal,
                message: "401 Unauthorized".into(),
            })
        })
        .unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn none_makes_a_single_attempt() {
        let calls = Cell::new(0);
        let _ = with_retry(&RetryPolicy::none(), "embed", || -> Result<()> {
            calls.set(calls.get() + 1);
            Err(transient())
        });
        assert_eq!(calls.get(), 1);
    }
}
