//! GPU snapshot repository for PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use camwatch_models::{GpuSnapshot, GpuTaskType};

use crate::error::DbResult;
use crate::postgres::{snapshot_from_row, PgStore, GPU_COLUMNS};
use crate::repository::GpuMetricsRepository;

#[async_trait]
impl GpuMetricsRepository for PgStore {
    async fn record_snapshot(&self, snapshot: &GpuSnapshot) -> DbResult<()> {
        sqlx::query(&format!(
            "INSERT INTO gpu_snapshots ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            GPU_COLUMNS
        ))
        .bind(snapshot.gpu_utilization)
        .bind(snapshot.memory_used_mb)
        .bind(snapshot.memory_total_mb)
        .bind(snapshot.memory_percent)
        .bind(snapshot.temperature_c)
        .bind(snapshot.task_type.as_str())
        .bind(snapshot.alert_level.as_str())
        .bind(snapshot.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn snapshots_since(
        &self,
        since: DateTime<Utc>,
        task_type: Option<GpuTaskType>,
    ) -> DbResult<Vec<GpuSnapshot>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM gpu_snapshots
             WHERE timestamp >= $1 AND ($2::text IS NULL OR task_type = $2)
             ORDER BY timestamp, id",
            GPU_COLUMNS
        ))
        .bind(since)
        .bind(task_type.map(|t| t.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(snapshot_from_row).collect()
    }
}
