//! Job executor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use camwatch_queue::{JobKind, JobQueue, QueueJob, RetryPolicy};

use crate::captioning::caption_detections;
use crate::config::WorkerConfig;
use crate::context::ProcessingContext;
use crate::detection::detect_persons;
use crate::error::{WorkerError, WorkerResult};
use crate::gpu::GpuMonitor;
use crate::logging::JobLogger;
use crate::metrics;
use crate::recording::record_camera;
use crate::retry::{settle_with_retries, Bookkeeping, LoopHealth, BOOKKEEPING_POLICY};

/// Delayed retries promoted per tick
const PROMOTE_BATCH: usize = 50;

/// Jobs reclaimed from crashed workers per tick
const CLAIM_BATCH: usize = 5;

/// What the executor does with a job after it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Completed,
    /// Re-run after the delay as the next attempt
    Retry(Duration),
    DeadLetter,
}

/// Decide how to settle a job given its outcome.
///
/// A failure is retried only when the error is transient for the job's
/// kind and the kind's policy still has attempts left.
pub fn settle(job: &QueueJob, result: &WorkerResult<()>) -> Settlement {
    let Err(err) = result else {
        return Settlement::Completed;
    };
    let kind = job.kind();
    let policy = RetryPolicy::for_kind(kind);
    if err.is_retryable_for(kind) && policy.allows_retry(job.attempt()) {
        Settlement::Retry(policy.delay_for_attempt(job.attempt()))
    } else {
        Settlement::DeadLetter
    }
}

/// Run one job to completion under its kind's hard time limit.
///
/// Detection and captioning first wait for an inference slot; the limit
/// starts once the slot is held.
pub async fn run_job(
    ctx: &ProcessingContext,
    inference: &Semaphore,
    job: &QueueJob,
) -> WorkerResult<()> {
    let kind = job.kind();
    let _slot = match kind {
        JobKind::Record => None,
        JobKind::Detect | JobKind::Caption => Some(
            inference
                .acquire()
                .await
                .map_err(|_| WorkerError::invalid_job("inference semaphore closed"))?,
        ),
    };

    let limit = ctx.pipeline.limits.for_kind(kind);
    match tokio::time::timeout(limit, dispatch(ctx, job)).await {
        Ok(result) => result,
        Err(_) => Err(WorkerError::Timeout(limit)),
    }
}

async fn dispatch(ctx: &ProcessingContext, job: &QueueJob) -> WorkerResult<()> {
    match job {
        QueueJob::RecordCamera(j) => record_camera(ctx, j).await.map(|_| ()),
        QueueJob::DetectPersons(j) => detect_persons(ctx, j).await.map(|_| ()),
        QueueJob::CaptionDetections(j) => caption_detections(ctx, j).await.map(|_| ()),
    }
}

/// State shared by every spawned job.
struct JobRunner {
    ctx: ProcessingContext,
    queue: Arc<JobQueue>,
    inference: Semaphore,
}

impl JobRunner {
    /// Execute a single job and settle it on the queue.
    async fn execute(&self, message_id: String, job: QueueJob) {
        let logger = JobLogger::for_job(&job);
        let span = logger.create_span();

        async {
            logger.log_start("executing");
            let started = Instant::now();
            let result = run_job(&self.ctx, &self.inference, &job).await;
            let kind = job.kind();

            match settle(&job, &result) {
                Settlement::Completed => {
                    metrics::record_job_completed(kind, started.elapsed().as_secs_f64());
                    logger.log_completion(&format!("done in {:.1}s", started.elapsed().as_secs_f64()));
                    self.ack(&message_id).await;
                    self.clear_dedup(&job).await;
                }
                Settlement::Retry(delay) => {
                    let err = result.err().map(|e| e.to_string()).unwrap_or_default();
                    logger.log_warning(&format!("failed, retrying in {:?}: {}", delay, err));
                    let next = job.next_attempt();
                    match settle_with_retries(&BOOKKEEPING_POLICY, Bookkeeping::ScheduleRetry, || {
                        self.queue.schedule_retry(&next, delay)
                    })
                    .await
                    {
                        Ok(()) => {
                            metrics::record_job_retried(kind);
                            self.ack(&message_id).await;
                        }
                        // Left pending; crash recovery redelivers it
                        Err(e) => logger.log_error(&format!("could not schedule retry: {}", e)),
                    }
                }
                Settlement::DeadLetter => {
                    let err = result.err().map(|e| e.to_string()).unwrap_or_default();
                    logger.log_error(&format!("failed permanently: {}", err));
                    metrics::record_job_failed(kind);
                    if let Err(e) = settle_with_retries(&BOOKKEEPING_POLICY, Bookkeeping::DeadLetter, || {
                        self.queue.dlq(&message_id, &job, &err)
                    })
                    .await
                    {
                        error!("Failed to move job {} to DLQ: {}", job.job_id(), e);
                    }
                    self.clear_dedup(&job).await;
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn ack(&self, message_id: &str) {
        if let Err(e) =
            settle_with_retries(&BOOKKEEPING_POLICY, Bookkeeping::Ack, || self.queue.ack(message_id))
                .await
        {
            error!("Failed to ack message {}: {}", message_id, e);
        }
    }

    async fn clear_dedup(&self, job: &QueueJob) {
        if let Err(e) = self.queue.clear_dedup(job).await {
            warn!("Failed to clear dedup key for job {}: {}", job.job_id(), e);
        }
    }
}

/// Job executor that processes jobs from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    runner: Arc<JobRunner>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, queue: Arc<JobQueue>, ctx: ProcessingContext) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());
        let runner = Arc::new(JobRunner {
            ctx,
            queue,
            inference: Semaphore::new(config.max_inference_jobs),
        });

        Self {
            config,
            runner,
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    /// Start the executor.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs, {} inference slots",
            self.consumer_name, self.config.max_concurrent_jobs, self.config.max_inference_jobs
        );

        self.runner.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let claim_task = tokio::spawn(Self::claim_loop(
            Arc::clone(&self.runner),
            Arc::clone(&self.job_semaphore),
            self.consumer_name.clone(),
            self.config.clone(),
            self.shutdown.subscribe(),
        ));
        let promote_task = tokio::spawn(Self::promote_loop(
            Arc::clone(&self.runner.queue),
            self.config.promote_interval,
            self.shutdown.subscribe(),
        ));
        let monitor_task = self.config.gpu_monitor_interval.map(|interval| {
            let monitor = GpuMonitor::new(
                Arc::clone(&self.runner.ctx.gpu),
                Arc::clone(&self.runner.ctx.store),
                interval,
            );
            tokio::spawn(monitor.run(self.shutdown.subscribe()))
        });

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();
        promote_task.abort();
        if let Some(task) = monitor_task {
            task.abort();
        }

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "In-flight jobs still running after {:?}, they will be reclaimed",
                self.config.shutdown_timeout
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Consume and process jobs from the queue.
    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self
            .runner
            .queue
            .consume(&self.consumer_name, 1000, available.min(5))
            .await?;

        if jobs.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} jobs from queue", jobs.len());

        for (message_id, job) in jobs {
            let permit = self
                .job_semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::invalid_job("job semaphore closed"))?;
            let runner = Arc::clone(&self.runner);

            tokio::spawn(async move {
                let _permit = permit;
                runner.execute(message_id, job).await;
            });
        }

        Ok(())
    }

    /// Periodically take over jobs left pending by crashed workers.
    async fn claim_loop(
        runner: Arc<JobRunner>,
        semaphore: Arc<Semaphore>,
        consumer_name: String,
        config: WorkerConfig,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(config.claim_interval);
        let min_idle_ms = config.claim_min_idle.as_millis() as u64;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    match runner.queue.claim_pending(&consumer_name, min_idle_ms, CLAIM_BATCH).await {
                        Ok(jobs) if !jobs.is_empty() => {
                            info!("Claimed {} pending jobs", jobs.len());
                            for (message_id, job) in jobs {
                                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                                    break;
                                };
                                let runner = Arc::clone(&runner);
                                tokio::spawn(async move {
                                    let _permit = permit;
                                    runner.execute(message_id, job).await;
                                });
                            }
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Failed to claim pending jobs: {}", e),
                    }
                }
            }
        }
    }

    /// Move due delayed retries back into the stream.
    async fn promote_loop(
        queue: Arc<JobQueue>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut health = LoopHealth::new("promote_delayed", 3);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    match queue.promote_due(PROMOTE_BATCH).await {
                        Ok(n) => {
                            health.succeeded();
                            if n > 0 {
                                debug!("Promoted {} delayed jobs", n);
                            }
                        }
                        Err(e) => health.failed(format!("Failed to promote delayed jobs: {}", e)),
                    }
                }
            }
        }
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        while self.job_semaphore.available_permits() < self.config.max_concurrent_jobs {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JobLimits, PipelineConfig};
    use crate::testing::{CaptureScript, Harness, ScriptedModels, ScriptedVideoSource};
    use camwatch_models::{CameraConfig, SegmentId};
    use camwatch_queue::{CaptionDetectionsJob, DetectPersonsJob, RecordCameraJob};
    use std::sync::atomic::Ordering;

    fn record() -> QueueJob {
        RecordCameraJob::new(CameraConfig::new("10.0.0.7", 554, "admin", "pw", "live")).into()
    }

    fn detect() -> QueueJob {
        DetectPersonsJob::new(SegmentId(1)).into()
    }

    fn nth_attempt(job: QueueJob, n: u32) -> QueueJob {
        (0..n).fold(job, |j, _| j.next_attempt())
    }

    #[test]
    fn test_success_completes() {
        assert_eq!(settle(&record(), &Ok(())), Settlement::Completed);
    }

    #[test]
    fn test_record_retries_only_nonzero_exit() {
        let nonzero = Err(WorkerError::capture_failed("exit 1"));
        assert_eq!(
            settle(&record(), &nonzero),
            Settlement::Retry(Duration::from_secs(5))
        );
        assert_eq!(
            settle(&nth_attempt(record(), 2), &nonzero),
            Settlement::Retry(Duration::from_secs(5))
        );
        assert_eq!(settle(&nth_attempt(record(), 3), &nonzero), Settlement::DeadLetter);

        let db = Err(WorkerError::Db(camwatch_db::DbError::not_found("segment", 1)));
        assert_eq!(settle(&record(), &db), Settlement::DeadLetter);
    }

    #[test]
    fn test_detect_backs_off_exponentially() {
        let err = Err(WorkerError::detection_failed("cuda oom"));
        match settle(&detect(), &err) {
            Settlement::Retry(d) => assert!(d >= Duration::from_secs(1) && d <= Duration::from_secs(2)),
            other => panic!("expected retry, got {:?}", other),
        }
        match settle(&nth_attempt(detect(), 2), &err) {
            Settlement::Retry(d) => assert!(d >= Duration::from_secs(4) && d <= Duration::from_secs(8)),
            other => panic!("expected retry, got {:?}", other),
        }
        assert_eq!(settle(&nth_attempt(detect(), 3), &err), Settlement::DeadLetter);
    }

    #[test]
    fn test_permanent_errors_dead_letter() {
        for err in [
            WorkerError::input_missing("gone"),
            WorkerError::invalid_job("no such segment"),
            WorkerError::Timeout(Duration::from_secs(1800)),
        ] {
            assert_eq!(settle(&detect(), &Err(err)), Settlement::DeadLetter);
        }
        let caption: QueueJob = CaptionDetectionsJob::pending_backlog().into();
        assert_eq!(
            settle(&caption, &Err(WorkerError::Timeout(Duration::from_secs(1800)))),
            Settlement::DeadLetter
        );
    }

    #[tokio::test]
    async fn test_run_job_dispatches_by_kind() {
        let h = Harness::new(
            ScriptedVideoSource::new(30.0, 30),
            ScriptedModels::new(),
            CaptureScript::Success(64),
        );
        let inference = Semaphore::new(1);

        run_job(&h.ctx, &inference, &record()).await.unwrap();

        let submitted = h.sink.submitted().await;
        assert!(matches!(submitted.as_slice(), [QueueJob::DetectPersons(_)]));

        // The handed-off detection runs the detector on the new segment
        run_job(&h.ctx, &inference, &submitted[0]).await.unwrap();
        assert_eq!(h.models.detector_loads.load(Ordering::SeqCst), 1);
        assert_eq!(inference.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_run_job_enforces_hard_limit() {
        let pipeline = PipelineConfig {
            limits: JobLimits {
                record: Duration::from_millis(20),
                ..Default::default()
            },
            ..Default::default()
        };
        let h = Harness::with_pipeline(
            ScriptedVideoSource::new(30.0, 30),
            ScriptedModels::new(),
            CaptureScript::Hang,
            pipeline,
        );

        let err = run_job(&h.ctx, &Semaphore::new(1), &record()).await.unwrap_err();

        assert!(matches!(err, WorkerError::Timeout(_)));
        assert_eq!(settle(&record(), &Err(err)), Settlement::DeadLetter);
    }

    #[tokio::test]
    async fn test_timed_out_detection_releases_detector() {
        let pipeline = PipelineConfig {
            limits: JobLimits {
                detect: Duration::from_millis(50),
                ..Default::default()
            },
            ..Default::default()
        };
        let h = Harness::with_pipeline(
            ScriptedVideoSource::new(30.0, 30),
            ScriptedModels::new(),
            CaptureScript::Success(1),
            pipeline,
        );
        h.recorded_segment(1).await;
        h.models.set_hang_detect(true);

        let err = run_job(&h.ctx, &Semaphore::new(1), &detect()).await.unwrap_err();
        assert_eq!(err.to_string(), "Job timed out after 50ms");

        // The abandoned detector is released on a spawned task
        for _ in 0..50 {
            if h.models.releases.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.models.detector_loads.load(Ordering::SeqCst), 1);
        assert_eq!(h.models.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_inference_jobs_wait_for_a_slot() {
        let h = Harness::new(
            ScriptedVideoSource::new(30.0, 30),
            ScriptedModels::new(),
            CaptureScript::Success(1),
        );
        let inference = Semaphore::new(1);
        let held = inference.acquire().await.unwrap();

        let caption: QueueJob = CaptionDetectionsJob::pending_backlog().into();
        let waiting = tokio::time::timeout(
            Duration::from_millis(50),
            run_job(&h.ctx, &inference, &caption),
        )
        .await;
        assert!(waiting.is_err());

        drop(held);
        run_job(&h.ctx, &inference, &caption).await.unwrap();
    }
}
