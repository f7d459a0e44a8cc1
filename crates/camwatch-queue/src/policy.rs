//! Per-kind retry policies.

use std::time::Duration;

use rand::Rng;

use crate::job::JobKind;

/// How the delay before a retry grows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay before every retry
    Fixed(Duration),
    /// `base * 2^attempt`, capped at `max`, optionally jittered into `[d/2, d]`
    Exponential {
        base: Duration,
        max: Duration,
        jitter: bool,
    },
}

/// Retry policy for one job kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum retries after the first attempt
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Recording: a failed capture is retried after a fixed 5s, at most 3 times.
    pub const RECORD: RetryPolicy = RetryPolicy {
        max_retries: 3,
        backoff: Backoff::Fixed(Duration::from_secs(5)),
    };

    /// Detection: exponential backoff with jitter, capped at 10 minutes.
    pub const DETECT: RetryPolicy = RetryPolicy {
        max_retries: 3,
        backoff: Backoff::Exponential {
            base: Duration::from_secs(2),
            max: Duration::from_secs(600),
            jitter: true,
        },
    };

    /// Captioning: same shape as detection.
    pub const CAPTION: RetryPolicy = RetryPolicy {
        max_retries: 3,
        backoff: Backoff::Exponential {
            base: Duration::from_secs(2),
            max: Duration::from_secs(600),
            jitter: true,
        },
    };

    pub fn for_kind(kind: JobKind) -> Self {
        match kind {
            JobKind::Record => Self::RECORD,
            JobKind::Detect => Self::DETECT,
            JobKind::Caption => Self::CAPTION,
        }
    }

    /// Whether a job that just failed on `attempt` (zero-based) may run again.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Upper bound of the delay before retrying after `attempt` failed.
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max, .. } => {
                let factor = 2u32.saturating_pow(attempt.min(31));
                base.saturating_mul(factor).min(max)
            }
        }
    }

    /// Delay before retrying after `attempt` failed, jitter applied.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for_attempt(attempt);
        match self.backoff {
            Backoff::Exponential { jitter: true, .. } => {
                let millis = delay.as_millis() as u64;
                let half = millis / 2;
                let jittered = half + rand::rng().random_range(0..=millis - half);
                Duration::from_millis(jittered)
            }
            _ => delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_policy_is_fixed_five_seconds() {
        let policy = RetryPolicy::for_kind(JobKind::Record);
        for attempt in 0..3 {
            assert_eq!(policy.delay_for_attempt(attempt), Duration::from_secs(5));
            assert!(policy.allows_retry(attempt));
        }
        assert!(!policy.allows_retry(3));
    }

    #[test]
    fn exponential_delay_doubles_and_caps() {
        let policy = RetryPolicy::DETECT;
        assert_eq!(policy.base_delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(policy.base_delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(policy.base_delay_for_attempt(2), Duration::from_secs(8));
        assert_eq!(policy.base_delay_for_attempt(20), Duration::from_secs(600));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::CAPTION;
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(3);
            assert!(delay >= Duration::from_secs(8));
            assert!(delay <= Duration::from_secs(16));
        }
    }
}
