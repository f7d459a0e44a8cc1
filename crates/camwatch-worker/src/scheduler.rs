//! Periodic recording trigger: one recording job per camera per cycle.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use camwatch_queue::{JobSink, RecordCameraJob};

use crate::config::SchedulerConfig;

/// Counts for one scheduling cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub enqueued: usize,
    /// Camera already has a recording queued or running this minute
    pub skipped: usize,
    pub failed: usize,
}

pub struct CaptureScheduler {
    config: SchedulerConfig,
    sink: Arc<dyn JobSink>,
}

impl CaptureScheduler {
    pub fn new(config: SchedulerConfig, sink: Arc<dyn JobSink>) -> Self {
        Self { config, sink }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Enqueue one recording per configured camera.
    ///
    /// A failure for one camera never stops the others.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        for camera in &self.config.cameras {
            let mut job = RecordCameraJob::new(camera.clone());
            if let Some(base) = &self.config.base_dir {
                job = job.with_base_dir(base.clone());
            }
            let job_id = job.job_id.clone();

            match self.sink.submit(job.into()).await {
                Ok(()) => {
                    debug!(camera_id = %camera.id, job_id = %job_id, "Recording enqueued");
                    report.enqueued += 1;
                }
                Err(e) if e.is_duplicate() => {
                    debug!(camera_id = %camera.id, "Recording already queued, skipping");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(camera_id = %camera.id, "Failed to enqueue recording: {}", e);
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Run a cycle every interval until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            cameras = self.config.cameras.len(),
            "Scheduling recordings every {:?}", self.config.interval
        );
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    let report = self.run_cycle().await;
                    info!(
                        enqueued = report.enqueued,
                        skipped = report.skipped,
                        failed = report.failed,
                        "Scheduling cycle finished"
                    );
                }
            }
        }
        info!("Scheduler stopped");
    }
}
