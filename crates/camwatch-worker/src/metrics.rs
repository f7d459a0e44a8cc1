//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use camwatch_models::{CaptionStatus, GpuSnapshot, RecordingStatus};
use camwatch_queue::JobKind;

/// Install the Prometheus recorder and serve `/metrics` on `port`.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()
}

/// Metric names as constants for consistency.
pub mod names {
    // Job metrics
    pub const JOBS_COMPLETED_TOTAL: &str = "camwatch_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "camwatch_jobs_failed_total";
    pub const JOBS_RETRIED_TOTAL: &str = "camwatch_jobs_retried_total";
    pub const JOB_DURATION_SECONDS: &str = "camwatch_job_duration_seconds";

    // Pipeline metrics
    pub const RECORDINGS_TOTAL: &str = "camwatch_recordings_total";
    pub const DETECTIONS_CREATED_TOTAL: &str = "camwatch_detections_created_total";
    pub const FRAMES_SAMPLED_TOTAL: &str = "camwatch_frames_sampled_total";
    pub const CAPTIONS_TOTAL: &str = "camwatch_captions_total";

    // GPU metrics
    pub const GPU_UTILIZATION_PERCENT: &str = "camwatch_gpu_utilization_percent";
    pub const GPU_MEMORY_PERCENT: &str = "camwatch_gpu_memory_percent";
    pub const GPU_TEMPERATURE_CELSIUS: &str = "camwatch_gpu_temperature_celsius";
}

pub fn record_job_completed(kind: JobKind, duration_secs: f64) {
    let labels = [("kind", kind.as_str())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_job_failed(kind: JobKind) {
    counter!(names::JOBS_FAILED_TOTAL, "kind" => kind.as_str()).increment(1);
}

pub fn record_job_retried(kind: JobKind) {
    counter!(names::JOBS_RETRIED_TOTAL, "kind" => kind.as_str()).increment(1);
}

pub fn record_recording(status: RecordingStatus) {
    counter!(names::RECORDINGS_TOTAL, "status" => status.as_str()).increment(1);
}

pub fn record_detection_run(frames_sampled: u64, detections: usize) {
    counter!(names::FRAMES_SAMPLED_TOTAL).increment(frames_sampled);
    counter!(names::DETECTIONS_CREATED_TOTAL).increment(detections as u64);
}

pub fn record_captions(status: CaptionStatus, count: usize) {
    if count > 0 {
        counter!(names::CAPTIONS_TOTAL, "status" => status.as_str()).increment(count as u64);
    }
}

pub fn record_gpu_snapshot(snapshot: &GpuSnapshot) {
    gauge!(names::GPU_UTILIZATION_PERCENT).set(snapshot.gpu_utilization as f64);
    gauge!(names::GPU_MEMORY_PERCENT).set(snapshot.memory_percent as f64);
    if let Some(temp) = snapshot.temperature_c {
        gauge!(names::GPU_TEMPERATURE_CELSIUS).set(temp as f64);
    }
}
