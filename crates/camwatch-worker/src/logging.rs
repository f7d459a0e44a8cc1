//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for job processing with
//! tracing spans and contextual information, plus subscriber setup shared
//! by the worker binaries.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use camwatch_models::JobId;
use camwatch_queue::QueueJob;

/// Install the global subscriber.
///
/// `LOG_FORMAT=json` selects JSON lines; anything else gets the human
/// formatter. `RUST_LOG` directives are honoured on top of `camwatch=info`.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::WARN.into())
        .from_env_lossy()
        .add_directive("camwatch=info".parse().expect("static directive"))
        .add_directive("camwatch_worker=info".parse().expect("static directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Job logger for structured logging with consistent formatting.
///
/// Every line carries the job id, the operation and the attempt number.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: String,
    attempt: u32,
}

impl JobLogger {
    /// Create a new job logger for a specific job and operation.
    pub fn new(job_id: &JobId, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: operation.to_string(),
            attempt: 0,
        }
    }

    /// Logger for a queued job, named after its kind.
    pub fn for_job(job: &QueueJob) -> Self {
        Self::new(job.job_id(), job.kind().as_str()).with_attempt(job.attempt())
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            attempt = self.attempt,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            attempt = self.attempt,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = %self.operation,
            attempt = self.attempt,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            operation = %self.operation,
            attempt = self.attempt
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camwatch_models::SegmentId;
    use camwatch_queue::DetectPersonsJob;

    #[test]
    fn test_job_logger_creation() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, "record");

        assert_eq!(logger.job_id(), job_id.to_string());
        assert_eq!(logger.operation(), "record");
        assert_eq!(logger.attempt(), 0);
    }

    #[test]
    fn test_job_logger_for_queued_job() {
        let job: QueueJob = DetectPersonsJob::new(SegmentId(7)).into();
        let retry = job.next_attempt();
        let logger = JobLogger::for_job(&retry);

        assert_eq!(logger.job_id(), job.job_id().to_string());
        assert_eq!(logger.operation(), "detect");
        assert_eq!(logger.attempt(), 1);
    }
}
