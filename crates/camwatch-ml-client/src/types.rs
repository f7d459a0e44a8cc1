//! ML service request/response types.

use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadModelRequest {
    /// Model reference understood by the service (name or path)
    pub model: String,
    /// Target device, e.g. `cuda` or `cpu`
    pub device: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadModelResponse {
    /// Opaque handle for subsequent calls
    pub handle: String,
}

/// Batched detection request; images are base64 JPEG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectRequest {
    pub handle: String,
    pub images: Vec<String>,
}

/// One predicted box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawBox {
    pub class_id: u32,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` in source pixels
    pub bbox: [f32; 4],
}

/// One entry per request image, in request order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectResponse {
    pub results: Vec<Vec<RawBox>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionRequest {
    pub handle: String,
    pub images: Vec<String>,
    pub num_beams: u32,
    pub max_length: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionResponse {
    pub captions: Vec<String>,
}
