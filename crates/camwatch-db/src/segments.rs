//! Segment repository for PostgreSQL.

use async_trait::async_trait;
use chrono::Utc;

use camwatch_models::{
    AnalysisStatus, NewSegment, RecordingSegment, RecordingStatus, SegmentId,
};

use crate::error::{DbError, DbResult};
use crate::postgres::{segment_from_row, PgStore, SEGMENT_COLUMNS};
use crate::repository::{RecordingOutcome, SegmentFilter, SegmentRepository};

const FILTER_CLAUSE: &str = "WHERE ($1::text IS NULL OR camera_id = $1) \
       AND ($2::text IS NULL OR status = $2) \
       AND (cardinality($3::text[]) = 0 OR analysis_status = ANY($3)) \
       AND ($4::timestamptz IS NULL OR start_time >= $4) \
       AND ($5::timestamptz IS NULL OR start_time <= $5)";

#[async_trait]
impl SegmentRepository for PgStore {
    async fn create_segment(&self, new: NewSegment) -> DbResult<RecordingSegment> {
        let row = sqlx::query(&format!(
            "INSERT INTO recording_segments (camera_id, camera_user, task_id, start_time, file_path, status, analysis_status)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {}",
            SEGMENT_COLUMNS
        ))
        .bind(&new.camera_id)
        .bind(&new.camera_user)
        .bind(&new.task_id)
        .bind(new.start_time)
        .bind(&new.file_path)
        .bind(RecordingStatus::InProgress.as_str())
        .bind(AnalysisStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await?;

        segment_from_row(&row)
    }

    async fn get_segment(&self, id: SegmentId) -> DbResult<Option<RecordingSegment>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM recording_segments WHERE id = $1",
            SEGMENT_COLUMNS
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(segment_from_row).transpose()
    }

    async fn list_segments(&self, filter: &SegmentFilter) -> DbResult<Vec<RecordingSegment>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM recording_segments {}
             ORDER BY start_time DESC, id DESC
             LIMIT $6 OFFSET $7",
            SEGMENT_COLUMNS, FILTER_CLAUSE
        ))
        .bind(&filter.camera_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.analysis_status_strings())
        .bind(filter.start_from)
        .bind(filter.start_to)
        .bind(filter.limit)
        .bind(filter.offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(segment_from_row).collect()
    }

    async fn count_segments(&self, filter: &SegmentFilter) -> DbResult<i64> {
        let (count,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM recording_segments {}",
            FILTER_CLAUSE
        ))
        .bind(&filter.camera_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.analysis_status_strings())
        .bind(filter.start_from)
        .bind(filter.start_to)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn finish_recording(&self, id: SegmentId, outcome: RecordingOutcome) -> DbResult<bool> {
        let from: Vec<&str> = RecordingStatus::ALL
            .iter()
            .filter(|s| s.can_transition_to(outcome.status))
            .map(|s| s.as_str())
            .collect();

        let result = sqlx::query(
            "UPDATE recording_segments
             SET status = $2, end_time = $3, file_size = $4, error_message = $5
             WHERE id = $1 AND status = ANY($6)",
        )
        .bind(id.get())
        .bind(outcome.status.as_str())
        .bind(outcome.end_time)
        .bind(outcome.file_size)
        .bind(&outcome.error_message)
        .bind(&from)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_analysis_status(&self, id: SegmentId, next: AnalysisStatus) -> DbResult<bool> {
        let from: Vec<&str> = AnalysisStatus::predecessors_of(next)
            .iter()
            .map(|s| s.as_str())
            .collect();
        let analysis_time = (next == AnalysisStatus::Completed).then(Utc::now);
        let require_success = next == AnalysisStatus::Processing;

        let result = sqlx::query(
            "UPDATE recording_segments
             SET analysis_status = $2, analysis_time = $3
             WHERE id = $1
               AND analysis_status = ANY($4)
               AND (NOT $5 OR status = 'success')",
        )
        .bind(id.get())
        .bind(next.as_str())
        .bind(analysis_time)
        .bind(&from)
        .bind(require_success)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reset_analysis(&self, id: SegmentId) -> DbResult<u64> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM detections WHERE segment_id = $1")
            .bind(id.get())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let updated = sqlx::query(
            "UPDATE recording_segments
             SET analysis_status = $2, analysis_time = NULL
             WHERE id = $1",
        )
        .bind(id.get())
        .bind(AnalysisStatus::Pending.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Err(DbError::not_found("segment", id.get()));
        }

        tx.commit().await?;
        Ok(deleted)
    }
}
