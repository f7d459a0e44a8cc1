//! GPU telemetry snapshots.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::status::StatusParseError;

pub const CRITICAL_UTILIZATION_PCT: f32 = 95.0;
pub const CRITICAL_MEMORY_PCT: f32 = 95.0;
pub const CRITICAL_TEMPERATURE_C: f32 = 85.0;
pub const WARNING_UTILIZATION_PCT: f32 = 80.0;
pub const WARNING_MEMORY_PCT: f32 = 85.0;
pub const WARNING_TEMPERATURE_C: f32 = 75.0;

/// Raw accelerator state as reported by the telemetry probe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpuReading {
    pub utilization_pct: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub temperature_c: Option<f32>,
}

impl GpuReading {
    pub fn memory_percent(&self) -> f32 {
        if self.memory_total_mb == 0 {
            return 0.0;
        }
        self.memory_used_mb as f32 / self.memory_total_mb as f32 * 100.0
    }
}

/// What the worker was doing when a snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GpuTaskType {
    Recording,
    Detection,
    Captioning,
    /// Periodic background sample
    Monitor,
}

impl GpuTaskType {
    pub const ALL: [GpuTaskType; 4] = [
        GpuTaskType::Recording,
        GpuTaskType::Detection,
        GpuTaskType::Captioning,
        GpuTaskType::Monitor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GpuTaskType::Recording => "recording",
            GpuTaskType::Detection => "detection",
            GpuTaskType::Captioning => "captioning",
            GpuTaskType::Monitor => "monitor",
        }
    }
}

impl fmt::Display for GpuTaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GpuTaskType {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| StatusParseError {
                kind: "gpu task type",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    #[default]
    Normal,
    Warning,
    Critical,
}

impl AlertLevel {
    pub const ALL: [AlertLevel; 3] = [AlertLevel::Normal, AlertLevel::Warning, AlertLevel::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Normal => "normal",
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
        }
    }

    /// Grade a reading; any single metric over a threshold raises the level.
    pub fn classify(utilization_pct: f32, memory_pct: f32, temperature_c: Option<f32>) -> Self {
        let temp = temperature_c.unwrap_or(0.0);
        if utilization_pct >= CRITICAL_UTILIZATION_PCT
            || memory_pct >= CRITICAL_MEMORY_PCT
            || temp >= CRITICAL_TEMPERATURE_C
        {
            AlertLevel::Critical
        } else if utilization_pct >= WARNING_UTILIZATION_PCT
            || memory_pct >= WARNING_MEMORY_PCT
            || temp >= WARNING_TEMPERATURE_C
        {
            AlertLevel::Warning
        } else {
            AlertLevel::Normal
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertLevel {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| StatusParseError {
                kind: "alert level",
                value: s.to_string(),
            })
    }
}

/// Append-only telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GpuSnapshot {
    pub gpu_utilization: f32,
    pub memory_used_mb: i64,
    pub memory_total_mb: i64,
    pub memory_percent: f32,
    pub temperature_c: Option<f32>,
    pub task_type: GpuTaskType,
    pub alert_level: AlertLevel,
    pub timestamp: DateTime<Utc>,
}

impl GpuSnapshot {
    pub fn from_reading(reading: &GpuReading, task_type: GpuTaskType, timestamp: DateTime<Utc>) -> Self {
        let memory_percent = reading.memory_percent();
        Self {
            gpu_utilization: reading.utilization_pct,
            memory_used_mb: reading.memory_used_mb as i64,
            memory_total_mb: reading.memory_total_mb as i64,
            memory_percent,
            temperature_c: reading.temperature_c,
            task_type,
            alert_level: AlertLevel::classify(reading.utilization_pct, memory_percent, reading.temperature_c),
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_thresholds() {
        assert_eq!(AlertLevel::classify(10.0, 10.0, Some(40.0)), AlertLevel::Normal);
        assert_eq!(AlertLevel::classify(80.0, 10.0, None), AlertLevel::Warning);
        assert_eq!(AlertLevel::classify(10.0, 86.0, None), AlertLevel::Warning);
        assert_eq!(AlertLevel::classify(10.0, 10.0, Some(85.0)), AlertLevel::Critical);
        assert_eq!(AlertLevel::classify(99.0, 10.0, Some(20.0)), AlertLevel::Critical);
    }

    #[test]
    fn snapshot_from_reading_computes_memory_percent() {
        let reading = GpuReading {
            utilization_pct: 42.0,
            memory_used_mb: 12_000,
            memory_total_mb: 16_000,
            temperature_c: Some(61.0),
        };
        let snap = GpuSnapshot::from_reading(&reading, GpuTaskType::Detection, Utc::now());
        assert!((snap.memory_percent - 75.0).abs() < 0.01);
        assert_eq!(snap.alert_level, AlertLevel::Normal);
    }

    #[test]
    fn zero_total_memory_does_not_divide_by_zero() {
        let reading = GpuReading {
            utilization_pct: 0.0,
            memory_used_mb: 0,
            memory_total_mb: 0,
            temperature_c: None,
        };
        assert_eq!(reading.memory_percent(), 0.0);
    }
}
