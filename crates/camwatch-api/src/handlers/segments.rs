//! Recording segment and detection handlers.

use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use camwatch_db::SegmentFilter;
use camwatch_models::{
    AnalysisStatus, Detection, RecordingSegment, RecordingStatus, SegmentId, StorageLayout,
};
use camwatch_queue::DetectPersonsJob;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 500;

/// A segment with the fields derived for display.
#[derive(Debug, Serialize)]
pub struct SegmentView {
    #[serde(flatten)]
    pub segment: RecordingSegment,
    pub duration_secs: Option<f64>,
    pub video_url: Option<String>,
}

impl SegmentView {
    fn new(segment: RecordingSegment, layout: &StorageLayout) -> Self {
        Self {
            duration_secs: segment.duration_secs(),
            video_url: segment
                .file_path
                .as_deref()
                .and_then(|p| layout.video_url(p)),
            segment,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DetectionView {
    #[serde(flatten)]
    pub detection: Detection,
    pub image_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListSegmentsQuery {
    pub camera_id: Option<String>,
    pub status: Option<String>,
    pub analysis_status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListSegmentsQuery {
    fn filter(&self) -> ApiResult<SegmentFilter> {
        let status = parse_opt::<RecordingStatus>(self.status.as_deref())?;
        let analysis = parse_opt::<AnalysisStatus>(self.analysis_status.as_deref())?;

        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            return Err(ApiError::bad_request(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        let offset = self.offset.unwrap_or(0);
        if offset < 0 {
            return Err(ApiError::bad_request("offset must not be negative"));
        }

        Ok(SegmentFilter {
            camera_id: self.camera_id.clone(),
            status,
            analysis_statuses: analysis.into_iter().collect(),
            limit: Some(limit),
            offset,
            ..Default::default()
        })
    }
}

fn parse_opt<T>(value: Option<&str>) -> ApiResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|v| v.parse::<T>().map_err(|e| ApiError::bad_request(e.to_string())))
        .transpose()
}

#[derive(Debug, Serialize)]
pub struct ListSegmentsResponse {
    pub segments: Vec<SegmentView>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// List segments, newest first.
pub async fn list_segments(
    State(state): State<AppState>,
    Query(query): Query<ListSegmentsQuery>,
) -> ApiResult<Json<ListSegmentsResponse>> {
    let filter = query.filter()?;
    let total = state
        .store
        .count_segments(&SegmentFilter {
            limit: None,
            offset: 0,
            ..filter.clone()
        })
        .await?;
    let segments = state.store.list_segments(&filter).await?;

    Ok(Json(ListSegmentsResponse {
        segments: segments
            .into_iter()
            .map(|s| SegmentView::new(s, &state.layout))
            .collect(),
        total,
        limit: filter.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        offset: filter.offset,
    }))
}

async fn load_segment(state: &AppState, id: i64) -> ApiResult<RecordingSegment> {
    state
        .store
        .get_segment(SegmentId(id))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("segment {}", id)))
}

pub async fn get_segment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<SegmentView>> {
    let segment = load_segment(&state, id).await?;
    Ok(Json(SegmentView::new(segment, &state.layout)))
}

#[derive(Debug, Serialize)]
pub struct SegmentDetectionsResponse {
    pub segment_id: SegmentId,
    pub detections: Vec<DetectionView>,
}

/// Detections of one segment in timestamp order.
pub async fn list_segment_detections(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<SegmentDetectionsResponse>> {
    let segment = load_segment(&state, id).await?;
    let detections = state.store.list_for_segment(segment.id).await?;

    Ok(Json(SegmentDetectionsResponse {
        segment_id: segment.id,
        detections: detections
            .into_iter()
            .map(|d| DetectionView {
                image_url: state.layout.image_url(&d.image_path),
                detection: d,
            })
            .collect(),
    }))
}

#[derive(Debug, Serialize)]
pub struct ReanalyzeResponse {
    pub segment_id: SegmentId,
    pub removed_detections: u64,
    pub status: AnalysisStatus,
}

/// Clear a segment's detections and queue a forced detection run.
///
/// Returns 409 when a detection job for the segment is already queued; that
/// job then runs against the freshly reset segment.
pub async fn reanalyze_segment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<(StatusCode, Json<ReanalyzeResponse>)> {
    let segment = load_segment(&state, id).await?;
    if !segment.is_analyzable() {
        metrics::record_reanalysis("rejected");
        return Err(ApiError::bad_request(format!(
            "segment {} has recording status {}",
            id, segment.status
        )));
    }

    let removed_detections = state.store.reset_analysis(segment.id).await?;
    let job = DetectPersonsJob::new(segment.id).with_force(true);
    if let Err(e) = state.sink.submit(job.into()).await {
        metrics::record_reanalysis(if e.is_duplicate() { "duplicate" } else { "error" });
        return Err(e.into());
    }

    metrics::record_reanalysis("queued");
    info!(segment_id = %segment.id, removed_detections, "Reanalysis queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(ReanalyzeResponse {
            segment_id: segment.id,
            removed_detections,
            status: AnalysisStatus::Pending,
        }),
    ))
}
