//! Handoff seam between pipeline stages.
//!
//! Stages never call each other; they submit the next job through a
//! [`JobSink`]. Production wires the Redis [`JobQueue`], tests use
//! [`CollectingSink`].

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{QueueError, QueueResult};
use crate::job::QueueJob;
use crate::queue::JobQueue;

#[async_trait]
pub trait JobSink: Send + Sync {
    /// Submit a job for asynchronous execution. Delivery is at-least-once.
    async fn submit(&self, job: QueueJob) -> QueueResult<()>;
}

#[async_trait]
impl JobSink for JobQueue {
    async fn submit(&self, job: QueueJob) -> QueueResult<()> {
        self.enqueue(job).await.map(|_| ())
    }
}

/// In-memory sink that records submitted jobs.
#[derive(Debug, Default)]
pub struct CollectingSink {
    jobs: Mutex<Vec<QueueJob>>,
    failing: AtomicBool,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following submission fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn submitted(&self) -> Vec<QueueJob> {
        self.jobs.lock().await.clone()
    }
}

#[async_trait]
impl JobSink for CollectingSink {
    async fn submit(&self, job: QueueJob) -> QueueResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(QueueError::enqueue_failed("sink unavailable"));
        }
        self.jobs.lock().await.push(job);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::DetectPersonsJob;
    use camwatch_models::SegmentId;

    #[tokio::test]
    async fn collecting_sink_records_and_fails_on_demand() {
        let sink = CollectingSink::new();
        sink.submit(DetectPersonsJob::new(SegmentId(1)).into()).await.unwrap();

        sink.set_failing(true);
        assert!(sink.submit(DetectPersonsJob::new(SegmentId(2)).into()).await.is_err());

        assert_eq!(sink.submitted().await.len(), 1);
    }
}
