//! GPU telemetry series.

use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::Json;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use camwatch_models::{AlertLevel, GpuSnapshot, GpuTaskType};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Longest window a caller may ask for
pub const MAX_HOURS: f64 = 30.0 * 24.0;

/// Points returned at most; longer series are thinned by a fixed step
pub const MAX_POINTS: usize = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct GpuMetricsQuery {
    /// Window length, default 1
    pub hours: Option<f64>,
    pub task_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GpuStats {
    pub count: usize,
    pub warning_count: usize,
    pub critical_count: usize,
    pub avg_utilization: f32,
    pub max_utilization: f32,
    pub avg_memory_percent: f32,
    /// `None` when no sample carried a temperature
    pub max_temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct GpuMetricsResponse {
    pub hours: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_type: Option<GpuTaskType>,
    /// Samples in the window before thinning
    pub total_points: usize,
    pub metrics: Vec<GpuSnapshot>,
    pub task_type_counts: BTreeMap<String, usize>,
    pub alert_counts: BTreeMap<String, usize>,
    pub stats: GpuStats,
}

/// Every `step`-th snapshot so that at most `max_points` remain.
pub fn downsample(snapshots: Vec<GpuSnapshot>, max_points: usize) -> Vec<GpuSnapshot> {
    if max_points == 0 || snapshots.len() <= max_points {
        return snapshots;
    }
    let step = snapshots.len().div_ceil(max_points);
    snapshots.into_iter().step_by(step).collect()
}

pub fn summarize(snapshots: &[GpuSnapshot]) -> GpuStats {
    if snapshots.is_empty() {
        return GpuStats::default();
    }
    let n = snapshots.len() as f32;
    let level_count = |level| snapshots.iter().filter(|s| s.alert_level == level).count();

    GpuStats {
        count: snapshots.len(),
        warning_count: level_count(AlertLevel::Warning),
        critical_count: level_count(AlertLevel::Critical),
        avg_utilization: snapshots.iter().map(|s| s.gpu_utilization).sum::<f32>() / n,
        max_utilization: snapshots
            .iter()
            .map(|s| s.gpu_utilization)
            .fold(0.0, f32::max),
        avg_memory_percent: snapshots.iter().map(|s| s.memory_percent).sum::<f32>() / n,
        max_temperature: snapshots
            .iter()
            .filter_map(|s| s.temperature_c)
            .reduce(f32::max),
    }
}

fn counts<K: ToString>(keys: impl Iterator<Item = K>) -> BTreeMap<String, usize> {
    let mut map = BTreeMap::new();
    for key in keys {
        *map.entry(key.to_string()).or_insert(0) += 1;
    }
    map
}

/// Snapshots of the last `hours`, thinned to at most [`MAX_POINTS`].
pub async fn get_gpu_metrics(
    State(state): State<AppState>,
    Query(query): Query<GpuMetricsQuery>,
) -> ApiResult<Json<GpuMetricsResponse>> {
    let hours = query.hours.unwrap_or(1.0);
    if !hours.is_finite() || hours <= 0.0 {
        return Err(ApiError::bad_request("hours must be positive"));
    }
    let hours = hours.min(MAX_HOURS);

    let task_type = query
        .task_type
        .as_deref()
        .map(|t| t.parse::<GpuTaskType>())
        .transpose()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let since = Utc::now() - Duration::seconds((hours * 3600.0) as i64);
    let snapshots = state.store.snapshots_since(since, task_type).await?;

    let stats = summarize(&snapshots);
    let task_type_counts = counts(snapshots.iter().map(|s| s.task_type));
    let alert_counts = counts(snapshots.iter().map(|s| s.alert_level));
    let total_points = snapshots.len();

    Ok(Json(GpuMetricsResponse {
        hours,
        task_type,
        total_points,
        metrics: downsample(snapshots, MAX_POINTS),
        task_type_counts,
        alert_counts,
        stats,
    }))
}
