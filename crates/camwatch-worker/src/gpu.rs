//! GPU telemetry.
//!
//! Sampling is a side read: a missing `nvidia-smi`, a parse failure or a
//! database error is logged and swallowed, never surfaced to a job.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use camwatch_db::Store;
use camwatch_models::{AlertLevel, GpuReading, GpuSnapshot, GpuTaskType};

use crate::metrics;
use crate::retry::LoopHealth;

/// Reads the current accelerator state.
#[async_trait]
pub trait GpuSampler: Send + Sync {
    /// `None` when no reading is available.
    async fn sample(&self) -> Option<GpuReading>;
}

/// Sampler backed by `nvidia-smi`. Reports the first GPU only.
pub struct NvidiaSmiSampler {
    program: String,
    timeout: Duration,
}

impl Default for NvidiaSmiSampler {
    fn default() -> Self {
        Self {
            program: "nvidia-smi".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

impl NvidiaSmiSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Whether the probe binary can be found at all.
    pub fn is_available(&self) -> bool {
        which::which(&self.program).is_ok()
    }
}

#[async_trait]
impl GpuSampler for NvidiaSmiSampler {
    async fn sample(&self) -> Option<GpuReading> {
        let output = Command::new(&self.program)
            .args([
                "--query-gpu=utilization.gpu,memory.used,memory.total,temperature.gpu",
                "--format=csv,noheader,nounits",
            ])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, output).await {
            Ok(Ok(output)) if output.status.success() => output,
            Ok(Ok(output)) => {
                debug!("{} exited with {:?}", self.program, output.status.code());
                return None;
            }
            Ok(Err(e)) => {
                debug!("Failed to run {}: {}", self.program, e);
                return None;
            }
            Err(_) => {
                debug!("{} timed out", self.program);
                return None;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout.lines().next().and_then(parse_nvidia_smi_line)
    }
}

/// Parse one `utilization, memory.used, memory.total, temperature` CSV line.
pub fn parse_nvidia_smi_line(line: &str) -> Option<GpuReading> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 3 {
        return None;
    }

    Some(GpuReading {
        utilization_pct: fields[0].parse().ok()?,
        memory_used_mb: fields[1].parse().ok()?,
        memory_total_mb: fields[2].parse().ok()?,
        // "[N/A]" on boards without a sensor
        temperature_c: fields.get(3).and_then(|t| t.parse().ok()),
    })
}

/// Take one sample and persist it. Returns the snapshot when one was stored.
pub async fn capture_snapshot(
    sampler: &dyn GpuSampler,
    store: &dyn Store,
    task_type: GpuTaskType,
) -> Option<GpuSnapshot> {
    let reading = sampler.sample().await?;
    let snapshot = GpuSnapshot::from_reading(&reading, task_type, Utc::now());
    metrics::record_gpu_snapshot(&snapshot);

    if snapshot.alert_level != AlertLevel::Normal {
        warn!(
            task_type = %task_type,
            alert_level = %snapshot.alert_level,
            utilization = snapshot.gpu_utilization,
            memory_percent = snapshot.memory_percent,
            temperature = ?snapshot.temperature_c,
            "GPU under pressure"
        );
    }

    if let Err(e) = store.record_snapshot(&snapshot).await {
        warn!(task_type = %task_type, "Failed to store GPU snapshot: {}", e);
        return None;
    }
    Some(snapshot)
}

/// Periodic background sampler.
pub struct GpuMonitor {
    sampler: Arc<dyn GpuSampler>,
    store: Arc<dyn Store>,
    interval: Duration,
}

impl GpuMonitor {
    pub fn new(sampler: Arc<dyn GpuSampler>, store: Arc<dyn Store>, interval: Duration) -> Self {
        Self {
            sampler,
            store,
            interval,
        }
    }

    /// Sample every interval until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting GPU monitor every {:?}", self.interval);
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut health = LoopHealth::new("gpu_monitor", 3);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    let stored = capture_snapshot(
                        self.sampler.as_ref(),
                        self.store.as_ref(),
                        GpuTaskType::Monitor,
                    )
                    .await;

                    match stored {
                        Some(_) => health.succeeded(),
                        None => health.failed("No GPU snapshot this interval"),
                    }
                }
            }
        }
        info!("GPU monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixedGpuSampler;
    use camwatch_db::{GpuMetricsRepository, MemoryStore};

    #[test]
    fn test_parse_line() {
        let reading = parse_nvidia_smi_line("87, 14500, 16384, 79").unwrap();
        assert_eq!(reading.utilization_pct, 87.0);
        assert_eq!(reading.memory_used_mb, 14500);
        assert_eq!(reading.memory_total_mb, 16384);
        assert_eq!(reading.temperature_c, Some(79.0));
    }

    #[test]
    fn test_parse_line_without_temperature() {
        let reading = parse_nvidia_smi_line("3, 100, 8192, [N/A]").unwrap();
        assert_eq!(reading.temperature_c, None);
        assert!(parse_nvidia_smi_line("garbage").is_none());
        assert!(parse_nvidia_smi_line("a, b, c").is_none());
    }

    #[tokio::test]
    async fn test_missing_binary_yields_none() {
        let sampler = NvidiaSmiSampler::new().with_program("camwatch-no-such-smi");
        assert!(!sampler.is_available());
        assert!(sampler.sample().await.is_none());
    }

    #[tokio::test]
    async fn test_capture_snapshot_persists_with_alert_level() {
        let store = MemoryStore::new();
        let sampler = FixedGpuSampler::new(96.0, 4000, 8000, Some(60.0));

        let snapshot = capture_snapshot(&sampler, &store, GpuTaskType::Detection)
            .await
            .unwrap();
        assert_eq!(snapshot.alert_level, AlertLevel::Critical);

        let stored = store
            .snapshots_since(Utc::now() - chrono::Duration::minutes(1), None)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].task_type, GpuTaskType::Detection);
    }

    #[tokio::test]
    async fn test_no_reading_stores_nothing() {
        let store = MemoryStore::new();
        let sampler = FixedGpuSampler::unavailable();

        assert!(capture_snapshot(&sampler, &store, GpuTaskType::Monitor).await.is_none());
        let stored = store
            .snapshots_since(Utc::now() - chrono::Duration::minutes(1), None)
            .await
            .unwrap();
        assert!(stored.is_empty());
    }
}
