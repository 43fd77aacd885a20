//! Consecutive buffer-commit failure tracking.

use crate::kafka::RetryConfig;
use std::time::Duration;

/// What the engine should do after a failed buffer commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Rewind and wait this long before consuming again
    Retry { backoff: Duration },
    /// Too many failures in a row; stop consuming
    Halt { consecutive_failures: u32 },
}

/// Counts failed commits in a row and decides between retry and halt.
#[derive(Debug, Clone)]
pub struct FailureBudget {
    retry: RetryConfig,
    consecutive_failures: u32,
}

impl FailureBudget {
    /// Halt once `retry.max_retries` commits have failed in a row.
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            retry,
            consecutive_failures: 0,
        }
    }

    pub fn record_failure(&mut self) -> FailureAction {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.consecutive_failures >= self.retry.max_retries {
            FailureAction::Halt {
                consecutive_failures: self.consecutive_failures,
            }
        } else {
            FailureAction::Retry {
                backoff: self.retry.calculate_delay(self.consecutive_failures - 1),
            }
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(max: u32) -> FailureBudget {
        FailureBudget::new(RetryConfig::for_buffer_commit(max).without_jitter())
    }

    #[test]
    fn test_backoff_grows_then_halts() {
        let mut budget = budget(4);

        assert_eq!(
            budget.record_failure(),
            FailureAction::Retry {
                backoff: Duration::from_secs(1)
            }
        );
        assert_eq!(
            budget.record_failure(),
            FailureAction::Retry {
                backoff: Duration::from_secs(2)
            }
        );
        assert_eq!(
            budget.record_failure(),
            FailureAction::Retry {
                backoff: Duration::from_secs(4)
            }
        );
        assert_eq!(
            budget.record_failure(),
            FailureAction::Halt {
                consecutive_failures: 4
            }
        );
    }

    #[test]
    fn test_success_resets_budget() {
        let mut budget = budget(2);

        budget.record_failure();
        assert_eq!(budget.consecutive_failures(), 1);
        budget.record_success();
        assert_eq!(budget.consecutive_failures(), 0);

        assert!(matches!(
            budget.record_failure(),
            FailureAction::Retry { .. }
        ));
    }

    #[test]
    fn test_single_failure_budget_halts_immediately() {
        let mut budget = budget(1);
        assert_eq!(
            budget.record_failure(),
            FailureAction::Halt {
                consecutive_failures: 1
            }
        );
    }
}
