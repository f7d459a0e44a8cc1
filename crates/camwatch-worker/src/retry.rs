//! Queue bookkeeping retries and background loop health.
//!
//! Settling a job (ack, dead-letter, scheduling its retry) talks to Redis
//! after the job itself already ran, so a blip there is retried in place
//! rather than re-running the job. Job-level retries go through the
//! queue's delayed set instead.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use camwatch_queue::{Backoff, QueueError, QueueResult, RetryPolicy};

/// Short in-place retries for settling a job on the queue.
pub const BOOKKEEPING_POLICY: RetryPolicy = RetryPolicy {
    max_retries: 3,
    backoff: Backoff::Exponential {
        base: Duration::from_millis(100),
        max: Duration::from_secs(2),
        jitter: false,
    },
};

/// Queue call made while settling a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bookkeeping {
    Ack,
    DeadLetter,
    ScheduleRetry,
}

impl Bookkeeping {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bookkeeping::Ack => "ack",
            Bookkeeping::DeadLetter => "dead_letter",
            Bookkeeping::ScheduleRetry => "schedule_retry",
        }
    }
}

/// Connection trouble is worth another try; a duplicate or a payload that
/// does not serialize fails the same way every time.
pub fn is_transient(err: &QueueError) -> bool {
    matches!(err, QueueError::ConnectionFailed(_) | QueueError::Redis(_))
}

/// Run one bookkeeping call under `policy`, retrying transient queue errors.
pub async fn settle_with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    op: Bookkeeping,
    call: F,
) -> QueueResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = QueueResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if is_transient(&e) && policy.allows_retry(attempt) => {
                let delay = policy.delay_for_attempt(attempt);
                attempt += 1;
                debug!(op = op.as_str(), attempt, "Queue call failed, retrying in {:?}: {}", delay, e);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Consecutive-failure bookkeeping for a loop that runs until shutdown.
///
/// The first `loud_failures` failures in a row are logged as warnings,
/// later ones only at debug until the loop succeeds again.
#[derive(Debug)]
pub struct LoopHealth {
    name: &'static str,
    loud_failures: u32,
    consecutive_failures: u32,
}

impl LoopHealth {
    pub fn new(name: &'static str, loud_failures: u32) -> Self {
        Self {
            name,
            loud_failures,
            consecutive_failures: 0,
        }
    }

    pub fn succeeded(&mut self) {
        if self.consecutive_failures > self.loud_failures {
            info!(
                loop_name = self.name,
                "Recovered after {} consecutive failures", self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
    }

    /// Record and log one failed tick.
    pub fn failed(&mut self, reason: impl Display) {
        self.consecutive_failures += 1;
        let n = self.consecutive_failures;
        if n < self.loud_failures {
            warn!(loop_name = self.name, failures = n, "{}", reason);
        } else if n == self.loud_failures {
            warn!(
                loop_name = self.name,
                failures = n,
                "{} (further failures logged at debug until recovery)",
                reason
            );
        } else {
            debug!(loop_name = self.name, failures = n, "{}", reason);
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether failures are currently being logged at warn level.
    pub fn is_loud(&self) -> bool {
        self.consecutive_failures <= self.loud_failures
    }
}
