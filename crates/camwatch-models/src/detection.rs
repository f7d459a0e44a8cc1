//! Person detections persisted from a segment.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::segment::SegmentId;
use crate::status::CaptionStatus;

/// Database identifier of a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct DetectionId(pub i64);

impl DetectionId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for DetectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Axis-aligned box in source-frame pixels, `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct BoundingBox(pub [f32; 4]);

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self([x1, y1, x2, y2])
    }

    pub fn width(&self) -> f32 {
        (self.0[2] - self.0[0]).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.0[3] - self.0[1]).max(0.0)
    }

    /// Integer crop rectangle `(x, y, w, h)` clipped to a frame.
    ///
    /// Returns `None` when the clipped box is empty.
    pub fn crop_rect(&self, frame_width: u32, frame_height: u32) -> Option<(u32, u32, u32, u32)> {
        let clamp = |v: f32, max: u32| v.max(0.0).min(max as f32);
        let x1 = clamp(self.0[0], frame_width).floor() as u32;
        let y1 = clamp(self.0[1], frame_height).floor() as u32;
        let x2 = clamp(self.0[2], frame_width).ceil() as u32;
        let y2 = clamp(self.0[3], frame_height).ceil() as u32;

        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }
}

/// One deduplicated person sighting inside a segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Detection {
    pub id: DetectionId,
    pub segment_id: SegmentId,
    pub frame_index: i64,
    /// Position inside the video, in seconds
    pub timestamp_secs: f64,
    pub image_path: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub created_at: DateTime<Utc>,
    pub caption: Option<String>,
    pub caption_status: CaptionStatus,
    pub caption_time: Option<DateTime<Utc>>,
}

/// Detection fields produced by the detection stage, before insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDetection {
    pub segment_id: SegmentId,
    pub frame_index: i64,
    pub timestamp_secs: f64,
    pub image_path: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_rect_is_clipped_to_frame() {
        let bbox = BoundingBox::new(-5.0, 10.2, 700.0, 50.0);
        assert_eq!(bbox.crop_rect(640, 480), Some((0, 10, 640, 40)));
    }

    #[test]
    fn empty_crop_rect_is_none() {
        assert_eq!(BoundingBox::new(10.0, 10.0, 10.0, 20.0).crop_rect(640, 480), None);
        assert_eq!(BoundingBox::new(700.0, 0.0, 800.0, 20.0).crop_rect(640, 480), None);
    }

    #[test]
    fn bbox_serializes_as_array() {
        let json = serde_json::to_string(&BoundingBox::new(1.0, 2.0, 3.0, 4.0)).unwrap();
        assert_eq!(json, "[1.0,2.0,3.0,4.0]");
    }
}
