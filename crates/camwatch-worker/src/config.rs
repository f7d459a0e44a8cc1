//! Worker configuration.

use std::str::FromStr;
use std::time::Duration;

use camwatch_ml_client::CaptionOptions;
use camwatch_models::camera::DEFAULT_RTSP_PORT;
use camwatch_models::CameraConfig;
use camwatch_queue::JobKind;

use crate::error::{WorkerError, WorkerResult};

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_or(key, default))
}

/// Worker process configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Maximum concurrent GPU-bound jobs (detection, captioning)
    pub max_inference_jobs: usize,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// How often the worker should scan for orphaned pending jobs
    pub claim_interval: Duration,
    /// Minimum idle time before a pending job can be claimed (crash recovery).
    /// Must exceed the longest job limit, or running jobs get stolen.
    pub claim_min_idle: Duration,
    /// How often due retries are moved back into the stream
    pub promote_interval: Duration,
    /// Background GPU sampling period; `None` disables the monitor
    pub gpu_monitor_interval: Option<Duration>,
    /// Port for the Prometheus exporter; `None` disables it
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            max_inference_jobs: 1,
            shutdown_timeout: Duration::from_secs(60),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(1_900),
            promote_interval: Duration::from_secs(1),
            gpu_monitor_interval: Some(Duration::from_secs(60)),
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let monitor_secs: u64 = env_or("GPU_MONITOR_INTERVAL_SECS", 60);

        Self {
            max_concurrent_jobs: env_or("WORKER_MAX_JOBS", defaults.max_concurrent_jobs).max(1),
            max_inference_jobs: env_or("WORKER_MAX_INFERENCE_JOBS", defaults.max_inference_jobs)
                .max(1),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT", 60),
            claim_interval: env_secs("WORKER_CLAIM_INTERVAL_SECS", 30),
            claim_min_idle: env_secs("WORKER_CLAIM_MIN_IDLE_SECS", 1_900),
            promote_interval: Duration::from_millis(env_or("WORKER_PROMOTE_INTERVAL_MS", 1_000)),
            gpu_monitor_interval: (monitor_secs > 0).then(|| Duration::from_secs(monitor_secs)),
            metrics_port: std::env::var("WORKER_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }
}

/// Hard wall-clock limit per job kind, enforced by the executor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobLimits {
    pub record: Duration,
    pub detect: Duration,
    pub caption: Duration,
}

impl Default for JobLimits {
    fn default() -> Self {
        Self {
            record: Duration::from_secs(120),
            detect: Duration::from_secs(1_800),
            caption: Duration::from_secs(1_800),
        }
    }
}

impl JobLimits {
    pub fn for_kind(&self, kind: JobKind) -> Duration {
        match kind {
            JobKind::Record => self.record,
            JobKind::Detect => self.detect,
            JobKind::Caption => self.caption,
        }
    }
}

/// Tunables of the three pipeline stages.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Length of one recorded segment
    pub recording_duration: Duration,
    /// Capture process is killed after this long
    pub capture_hard_timeout: Duration,
    /// In-process deadline around the whole capture call
    pub capture_soft_timeout: Duration,
    /// Seconds of video between sampled frames
    pub sampling_interval_secs: f64,
    pub detection_batch_size: usize,
    pub confidence_threshold: f32,
    /// Minimum gap between two accepted detections of one segment
    pub dedup_window_secs: f64,
    pub caption_batch_size: usize,
    /// Cap on backlog captions handled by one run
    pub caption_max_per_run: i64,
    pub caption_options: CaptionOptions,
    pub limits: JobLimits,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            recording_duration: Duration::from_secs(60),
            capture_hard_timeout: Duration::from_secs(75),
            capture_soft_timeout: Duration::from_secs(90),
            sampling_interval_secs: 1.0,
            detection_batch_size: 8,
            confidence_threshold: 0.5,
            dedup_window_secs: 10.0,
            caption_batch_size: 8,
            caption_max_per_run: 100,
            caption_options: CaptionOptions::default(),
            limits: JobLimits::default(),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            recording_duration: env_secs("RECORD_DURATION_SECS", d.recording_duration.as_secs()),
            capture_hard_timeout: env_secs(
                "CAPTURE_HARD_TIMEOUT_SECS",
                d.capture_hard_timeout.as_secs(),
            ),
            capture_soft_timeout: env_secs(
                "CAPTURE_SOFT_TIMEOUT_SECS",
                d.capture_soft_timeout.as_secs(),
            ),
            sampling_interval_secs: env_or("SAMPLE_INTERVAL_SECS", d.sampling_interval_secs),
            detection_batch_size: env_or("DETECTION_BATCH_SIZE", d.detection_batch_size),
            confidence_threshold: env_or("CONFIDENCE_THRESHOLD", d.confidence_threshold),
            dedup_window_secs: env_or("DEDUP_WINDOW_SECS", d.dedup_window_secs),
            caption_batch_size: env_or("CAPTION_BATCH_SIZE", d.caption_batch_size),
            caption_max_per_run: env_or("CAPTION_MAX_PER_RUN", d.caption_max_per_run),
            caption_options: CaptionOptions {
                num_beams: env_or("CAPTION_NUM_BEAMS", d.caption_options.num_beams),
                max_length: env_or("CAPTION_MAX_LENGTH", d.caption_options.max_length),
            },
            limits: JobLimits {
                record: env_secs("RECORD_TASK_TIMEOUT_SECS", d.limits.record.as_secs()),
                detect: env_secs("DETECT_TASK_TIMEOUT_SECS", d.limits.detect.as_secs()),
                caption: env_secs("CAPTION_TASK_TIMEOUT_SECS", d.limits.caption.as_secs()),
            },
        }
    }

    /// Reject settings whose timeouts do not nest or whose sizes are unusable.
    ///
    /// The capture deadlines must fit inside the recording job limit so the
    /// executor never kills a recording whose own cleanup is still running.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.recording_duration >= self.capture_hard_timeout {
            return Err(WorkerError::config_error(format!(
                "recording duration {:?} must be shorter than the hard capture deadline {:?}",
                self.recording_duration, self.capture_hard_timeout
            )));
        }
        if self.capture_hard_timeout >= self.limits.record {
            return Err(WorkerError::config_error(format!(
                "hard capture deadline {:?} must be shorter than the recording job limit {:?}",
                self.capture_hard_timeout, self.limits.record
            )));
        }
        if self.capture_soft_timeout >= self.limits.record {
            return Err(WorkerError::config_error(format!(
                "soft capture deadline {:?} must be shorter than the recording job limit {:?}",
                self.capture_soft_timeout, self.limits.record
            )));
        }
        if !(self.sampling_interval_secs > 0.0) {
            return Err(WorkerError::config_error("sampling interval must be positive"));
        }
        if !(self.dedup_window_secs >= 0.0) {
            return Err(WorkerError::config_error("dedup window must not be negative"));
        }
        if self.detection_batch_size == 0 || self.caption_batch_size == 0 {
            return Err(WorkerError::config_error("batch sizes must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(WorkerError::config_error(format!(
                "confidence threshold {} is outside [0, 1]",
                self.confidence_threshold
            )));
        }
        if self.caption_max_per_run <= 0 {
            return Err(WorkerError::config_error("caption max per run must be positive"));
        }
        Ok(())
    }
}

/// Capture scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between two recording cycles
    pub interval: Duration,
    pub cameras: Vec<CameraConfig>,
    /// Recordings root passed to every job, when overriding the worker's
    pub base_dir: Option<String>,
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        Self {
            interval: env_secs("SCHEDULE_INTERVAL_SECS", 60),
            cameras: cameras_from_lookup(|key| std::env::var(key).ok()),
            base_dir: std::env::var("SCHEDULE_BASE_DIR").ok(),
        }
    }
}

/// Enumerate `CAMERA{N}_*` settings, N = 1.. until the first camera without a host.
pub fn cameras_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Vec<CameraConfig> {
    let mut cameras = Vec::new();
    for n in 1.. {
        let var = |field: &str| {
            lookup(&format!("CAMERA{}_{}", n, field)).filter(|v| !v.trim().is_empty())
        };

        let Some(host) = var("HOST").or_else(|| var("IP")) else {
            break;
        };
        let port = var("PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_RTSP_PORT);

        let mut camera = CameraConfig::new(
            host.trim(),
            port,
            var("USER").unwrap_or_default(),
            var("PASSWORD").unwrap_or_default(),
            var("PATH").unwrap_or_default(),
        );
        if let Some(id) = var("ID") {
            camera = camera.with_id(id);
        }
        cameras.push(camera);
    }
    cameras
}
