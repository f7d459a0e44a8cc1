//! Detection repository for PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::Row;

use camwatch_models::{CaptionStatus, Detection, DetectionId, NewDetection, SegmentId};

use crate::error::DbResult;
use crate::postgres::{detection_from_row, ids_to_i64, PgStore, DETECTION_COLUMNS};
use crate::repository::DetectionRepository;

#[async_trait]
impl DetectionRepository for PgStore {
    async fn insert_detections(&self, detections: Vec<NewDetection>) -> DbResult<Vec<DetectionId>> {
        if detections.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(detections.len());

        for d in &detections {
            let row = sqlx::query(
                "INSERT INTO detections
                    (segment_id, frame_index, timestamp_secs, image_path, confidence, bbox, caption_status)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 RETURNING id",
            )
            .bind(d.segment_id.get())
            .bind(d.frame_index)
            .bind(d.timestamp_secs)
            .bind(&d.image_path)
            .bind(d.confidence)
            .bind(Json(d.bbox))
            .bind(CaptionStatus::Pending.as_str())
            .fetch_one(&mut *tx)
            .await?;
            ids.push(DetectionId(row.try_get("id")?));
        }

        tx.commit().await?;
        Ok(ids)
    }

    async fn get_detection(&self, id: DetectionId) -> DbResult<Option<Detection>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM detections WHERE id = $1",
            DETECTION_COLUMNS
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(detection_from_row).transpose()
    }

    async fn list_for_segment(&self, segment_id: SegmentId) -> DbResult<Vec<Detection>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM detections WHERE segment_id = $1 ORDER BY timestamp_secs, id",
            DETECTION_COLUMNS
        ))
        .bind(segment_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(detection_from_row).collect()
    }

    async fn delete_for_segment(&self, segment_id: SegmentId) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM detections WHERE segment_id = $1")
            .bind(segment_id.get())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn pending_captions(
        &self,
        ids: Option<&[DetectionId]>,
        limit: i64,
    ) -> DbResult<Vec<Detection>> {
        let ids = ids.map(|ids| ids_to_i64(ids.iter().copied()));

        let rows = sqlx::query(&format!(
            "SELECT {} FROM detections
             WHERE caption_status = $1
               AND ($2::bigint[] IS NULL OR id = ANY($2))
             ORDER BY created_at, id
             LIMIT $3",
            DETECTION_COLUMNS
        ))
        .bind(CaptionStatus::Pending.as_str())
        .bind(ids)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(detection_from_row).collect()
    }

    async fn claim_for_caption(&self, ids: &[DetectionId]) -> DbResult<Vec<DetectionId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // Single statement: two workers can never both claim a row
        let rows = sqlx::query(
            "UPDATE detections SET caption_status = $2
             WHERE id = ANY($1) AND caption_status = $3
             RETURNING id",
        )
        .bind(ids_to_i64(ids.iter().copied()))
        .bind(CaptionStatus::Processing.as_str())
        .bind(CaptionStatus::Pending.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut claimed = rows
            .iter()
            .map(|r| r.try_get::<i64, _>("id").map(DetectionId))
            .collect::<Result<Vec<_>, _>>()?;
        // RETURNING order is unspecified
        claimed.sort_by_key(|id| ids.iter().position(|x| x == id));
        Ok(claimed)
    }

    async fn complete_caption(
        &self,
        id: DetectionId,
        caption: &str,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE detections
             SET caption = $2, caption_status = $3, caption_time = $4
             WHERE id = $1 AND caption_status = $5",
        )
        .bind(id.get())
        .bind(caption)
        .bind(CaptionStatus::Completed.as_str())
        .bind(at)
        .bind(CaptionStatus::Processing.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail_captions(&self, ids: &[DetectionId]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let from: Vec<&str> = CaptionStatus::predecessors_of(CaptionStatus::Failed)
            .iter()
            .map(|s| s.as_str())
            .collect();

        let result = sqlx::query(
            "UPDATE detections SET caption_status = $2
             WHERE id = ANY($1) AND caption_status = ANY($3)",
        )
        .bind(ids_to_i64(ids.iter().copied()))
        .bind(CaptionStatus::Failed.as_str())
        .bind(&from)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
