//! Retry of arbiter calls that failed in transit.

use std::{thread, time::Duration};

use crate::error::{ArbiterError, ArbiterResult, DisputeError, Result};

/// How transport failures are retried. Reverts are never retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub attempts: u32,
    /// Delay before the second attempt. It doubles after every failure.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff_ms: u64) -> Self {
        RetryPolicy {
            attempts: attempts.max(1),
            backoff: Duration::from_millis(backoff_ms),
        }
    }

    /// Run `call` until it succeeds, reverts or runs out of attempts
    pub fn run<T, F>(&self, action: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut() -> ArbiterResult<T>,
    {
        let mut delay = self.backoff;
        let mut attempt = 1;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(ArbiterError::Reverted(reason)) => {
                    log::warn!("Arbiter rejected {}: {}", action, reason);
                    return Err(DisputeError::Reverted { action, reason });
                }
                Err(ArbiterError::Transport(msg)) if attempt < self.attempts => {
                    log::debug!(
                        "Attempt {}/{} of {} failed: {}. Retrying in {:?}",
                        attempt,
                        self.attempts,
                        action,
                        msg,
                        delay
                    );
                    thread::sleep(delay);
                    delay *= 2;
                    attempt += 1;
                }
                Err(ArbiterError::Transport(msg)) => {
                    log::error!("{} failed after {} attempts: {}", action, attempt, msg);
                    return Err(DisputeError::Transport {
                        action,
                        attempts: attempt,
                        msg,
                    });
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(5, 500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn transport_failures_are_retried() {
        let calls = Cell::new(0);
        let result = RetryPolicy::new(3, 0).run("test", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(ArbiterError::Transport("timeout".to_string()))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn attempts_run_out() {
        let calls = Cell::new(0);
        let result: Result<()> = RetryPolicy::new(2, 0).run("test", || {
            calls.set(calls.get() + 1);
            Err(ArbiterError::Transport("timeout".to_string()))
        });
        assert!(matches!(
            result,
            Err(DisputeError::Transport { attempts: 2, .. })
        ));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn reverts_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<()> = RetryPolicy::new(5, 0).run("test", || {
            calls.set(calls.get() + 1);
            Err(ArbiterError::Reverted("challenge-not-active".to_string()))
        });
        match result {
            Err(DisputeError::Reverted { reason, .. }) => assert_eq!(reason, "challenge-not-active"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0, 0).attempts, 1);
    }
}
