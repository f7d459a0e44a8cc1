//! PostgreSQL-backed store.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::info;

use camwatch_models::{
    BoundingBox, Detection, DetectionId, GpuSnapshot, RecordingSegment, SegmentId,
};

use crate::error::DbResult;
use crate::pool::{create_pool, PoolConfig};
use crate::repository::Store;

pub(crate) const SEGMENT_COLUMNS: &str = "id, camera_id, camera_user, task_id, start_time, end_time, \
     status, file_path, file_size, error_message, analysis_status, analysis_time";

pub(crate) const DETECTION_COLUMNS: &str = "id, segment_id, frame_index, timestamp_secs, image_path, \
     confidence, bbox, created_at, caption, caption_status, caption_time";

pub(crate) const GPU_COLUMNS: &str = "gpu_utilization, memory_used_mb, memory_total_mb, \
     memory_percent, temperature_c, task_type, alert_level, timestamp";

/// Store backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pub(crate) pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using `config`.
    pub async fn connect(config: &PoolConfig) -> DbResult<Self> {
        Ok(Self::new(create_pool(config).await?))
    }

    /// Apply the embedded migrations.
    pub async fn migrate(&self) -> DbResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub(crate) fn segment_from_row(row: &PgRow) -> DbResult<RecordingSegment> {
    Ok(RecordingSegment {
        id: SegmentId(row.try_get("id")?),
        camera_id: row.try_get("camera_id")?,
        camera_user: row.try_get("camera_user")?,
        task_id: row.try_get("task_id")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        file_path: row.try_get("file_path")?,
        file_size: row.try_get("file_size")?,
        error_message: row.try_get("error_message")?,
        analysis_status: row.try_get::<String, _>("analysis_status")?.parse()?,
        analysis_time: row.try_get("analysis_time")?,
    })
}

pub(crate) fn detection_from_row(row: &PgRow) -> DbResult<Detection> {
    let bbox: Json<BoundingBox> = row.try_get("bbox")?;
    Ok(Detection {
        id: DetectionId(row.try_get("id")?),
        segment_id: SegmentId(row.try_get("segment_id")?),
        frame_index: row.try_get("frame_index")?,
        timestamp_secs: row.try_get("timestamp_secs")?,
        image_path: row.try_get("image_path")?,
        confidence: row.try_get("confidence")?,
        bbox: bbox.0,
        created_at: row.try_get("created_at")?,
        caption: row.try_get("caption")?,
        caption_status: row.try_get::<String, _>("caption_status")?.parse()?,
        caption_time: row.try_get("caption_time")?,
    })
}

pub(crate) fn snapshot_from_row(row: &PgRow) -> DbResult<GpuSnapshot> {
    Ok(GpuSnapshot {
        gpu_utilization: row.try_get("gpu_utilization")?,
        memory_used_mb: row.try_get("memory_used_mb")?,
        memory_total_mb: row.try_get("memory_total_mb")?,
        memory_percent: row.try_get("memory_percent")?,
        temperature_c: row.try_get("temperature_c")?,
        task_type: row.try_get::<String, _>("task_type")?.parse()?,
        alert_level: row.try_get::<String, _>("alert_level")?.parse()?,
        timestamp: row.try_get("timestamp")?,
    })
}

pub(crate) fn ids_to_i64<I: IntoIterator<Item = DetectionId>>(ids: I) -> Vec<i64> {
    ids.into_iter().map(DetectionId::get).collect()
}
