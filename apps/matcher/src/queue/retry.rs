use std::time::Duration;

use crate::ingestion::FailureKind;

const MAX_BACKOFF_EXPONENT: u32 = 16;

/// What to do with a job whose latest attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Put the job back on the queue after `delay`.
    Retry { delay: Duration },
    /// Retry budget exhausted, or the failure can never succeed.
    DeadLetter,
    /// The payload is unusable; there is nothing to dead-letter.
    Drop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed for transient failures (missing file, index outage).
    pub max_attempts: u32,
    /// Attempts allowed for documents that failed to parse.
    pub extraction_max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            extraction_max_attempts: 2,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// `attempts_made` counts the attempt that just failed, so it is 1 after
    /// the first failure.
    pub fn decide(&self, kind: FailureKind, attempts_made: u32) -> Disposition {
        let cap = match kind {
            FailureKind::Malformed => return Disposition::Drop,
            FailureKind::Unsupported => return Disposition::DeadLetter,
            FailureKind::Extraction => self.extraction_max_attempts,
            FailureKind::Transient => self.max_attempts,
        };

        if attempts_made >= cap {
            Disposition::DeadLetter
        } else {
            Disposition::Retry {
                delay: self.backoff(attempts_made),
            }
        }
    }

    /// `base * 2^(attempt - 1)`, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let factor = 1_u32.checked_shl(shift).unwrap_or(u32::MAX);
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(10), Duration::from_secs(30));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_transient_failures_retry_until_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(FailureKind::Transient, 1),
            Disposition::Retry {
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(
            policy.decide(FailureKind::Transient, 2),
            Disposition::Retry {
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(
            policy.decide(FailureKind::Transient, 3),
            Disposition::DeadLetter
        );
    }

    #[test]
    fn test_corrupt_documents_get_a_smaller_budget() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.decide(FailureKind::Extraction, 1),
            Disposition::Retry { .. }
        ));
        assert_eq!(
            policy.decide(FailureKind::Extraction, 2),
            Disposition::DeadLetter
        );
    }

    #[test]
    fn test_permanent_failures_never_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(FailureKind::Malformed, 1), Disposition::Drop);
        assert_eq!(
            policy.decide(FailureKind::Unsupported, 1),
            Disposition::DeadLetter
        );
    }
}
