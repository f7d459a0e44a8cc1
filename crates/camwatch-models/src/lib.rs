//! Shared data models for the camwatch backend.
//!
//! This crate provides Serde-serializable types for:
//! - Recording segments and their recording/analysis status machines
//! - Person detections and their caption status machine
//! - GPU telemetry snapshots
//! - Camera connection parameters
//! - The persisted storage layout (recording and crop paths, public URLs)

pub mod camera;
pub mod detection;
pub mod gpu;
pub mod job;
pub mod layout;
pub mod segment;
pub mod status;

// Re-export common types
pub use camera::CameraConfig;
pub use detection::{BoundingBox, Detection, DetectionId, NewDetection};
pub use gpu::{AlertLevel, GpuReading, GpuSnapshot, GpuTaskType};
pub use job::JobId;
pub use layout::StorageLayout;
pub use segment::{NewSegment, RecordingSegment, SegmentId};
pub use status::{AnalysisStatus, CaptionStatus, RecordingStatus, StatusParseError};
