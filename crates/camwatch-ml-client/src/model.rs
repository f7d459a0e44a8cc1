//! Model handles.
//!
//! Stages acquire a handle at the start of a run and hold it in a
//! [`ModelLease`], which releases it on every exit path, including the
//! stage future being dropped by a timeout. There is no process-wide model
//! state. The remote implementations map acquisition to `/models/load` and
//! release to `/models/{handle}/unload`, which frees the service's device
//! memory.

use async_trait::async_trait;
use image::RgbImage;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{info, warn};

use camwatch_models::BoundingBox;

use crate::client::MlClient;
use crate::encode::encode_batch;
use crate::error::MlResult;

/// COCO class id for "person".
pub const PERSON_CLASS_ID: u32 = 0;

/// One predicted box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxPrediction {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl BoxPrediction {
    pub fn is_person(&self) -> bool {
        self.class_id == PERSON_CLASS_ID
    }
}

/// Decoding options for captioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptionOptions {
    pub num_beams: u32,
    pub max_length: u32,
}

impl Default for CaptionOptions {
    fn default() -> Self {
        Self {
            num_beams: 3,
            max_length: 50,
        }
    }
}

/// A loaded model that holds device memory until released.
#[async_trait]
pub trait ModelHandle: Send + Sync {
    /// Free the model. Called exactly once per acquired handle.
    async fn release(&self) -> MlResult<()>;
}

#[async_trait]
pub trait DetectionModel: ModelHandle {
    /// One prediction list per input frame, in input order.
    async fn detect(&self, frames: &[RgbImage]) -> MlResult<Vec<Vec<BoxPrediction>>>;
}

#[async_trait]
pub trait CaptionModel: ModelHandle {
    /// One caption per input image, in input order.
    async fn caption(&self, images: &[RgbImage], options: &CaptionOptions) -> MlResult<Vec<String>>;
}

/// Owns a loaded model for the duration of one stage run.
///
/// [`ModelLease::release`] frees the model and reports the outcome. A lease
/// dropped without it (early return, panic, or the owning future cancelled
/// at a time limit) spawns the release on the current runtime instead.
pub struct ModelLease<M: ?Sized + ModelHandle + 'static> {
    model: Arc<M>,
    released: bool,
}

impl<M: ?Sized + ModelHandle + 'static> ModelLease<M> {
    pub fn new(model: Box<M>) -> Self {
        Self {
            model: Arc::from(model),
            released: false,
        }
    }

    pub async fn release(mut self) -> MlResult<()> {
        self.released = true;
        self.model.release().await
    }
}

impl<M: ?Sized + ModelHandle + 'static> Deref for ModelLease<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.model
    }
}

impl<M: ?Sized + ModelHandle + 'static> Drop for ModelLease<M> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let model = Arc::clone(&self.model);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = model.release().await {
                        warn!("Failed to release abandoned model: {}", e);
                    }
                });
            }
            Err(_) => warn!("Model lease dropped outside a runtime; model not released"),
        }
    }
}

/// Acquires model handles.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn load_detector(&self) -> MlResult<Box<dyn DetectionModel>>;
    async fn load_captioner(&self) -> MlResult<Box<dyn CaptionModel>>;
}

/// Which models to load and where.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub detection_model: String,
    pub caption_model: String,
    pub device: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            detection_model: "yolov8n".to_string(),
            caption_model: "Salesforce/blip-image-captioning-large".to_string(),
            device: "cuda".to_string(),
        }
    }
}

impl ModelConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            detection_model: std::env::var("DETECTION_MODEL").unwrap_or(defaults.detection_model),
            caption_model: std::env::var("CAPTION_MODEL").unwrap_or(defaults.caption_model),
            device: std::env::var("MODEL_DEVICE").unwrap_or(defaults.device),
        }
    }
}

/// [`ModelProvider`] backed by the model service.
pub struct RemoteModelProvider {
    client: Arc<MlClient>,
    config: ModelConfig,
}

impl RemoteModelProvider {
    pub fn new(client: Arc<MlClient>, config: ModelConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ModelProvider for RemoteModelProvider {
    async fn load_detector(&self) -> MlResult<Box<dyn DetectionModel>> {
        let handle = self
            .client
            .load_model(&self.config.detection_model, &self.config.device)
            .await?;
        info!(model = %self.config.detection_model, handle = %handle, "Detection model loaded");
        Ok(Box::new(RemoteDetector {
            client: Arc::clone(&self.client),
            handle,
        }))
    }

    async fn load_captioner(&self) -> MlResult<Box<dyn CaptionModel>> {
        let handle = self
            .client
            .load_model(&self.config.caption_model, &self.config.device)
            .await?;
        info!(model = %self.config.caption_model, handle = %handle, "Caption model loaded");
        Ok(Box::new(RemoteCaptioner {
            client: Arc::clone(&self.client),
            handle,
        }))
    }
}

pub struct RemoteDetector {
    client: Arc<MlClient>,
    handle: String,
}

#[async_trait]
impl DetectionModel for RemoteDetector {
    async fn detect(&self, frames: &[RgbImage]) -> MlResult<Vec<Vec<BoxPrediction>>> {
        let images = encode_batch(frames)?;
        let response = self.client.detect(&self.handle, images).await?;
        Ok(response
            .results
            .into_iter()
            .map(|boxes| {
                boxes
                    .into_iter()
                    .map(|b| BoxPrediction {
                        class_id: b.class_id,
                        confidence: b.confidence,
                        bbox: BoundingBox(b.bbox),
                    })
                    .collect()
            })
            .collect())
    }
}

#[async_trait]
impl ModelHandle for RemoteDetector {
    async fn release(&self) -> MlResult<()> {
        self.client.unload_model(&self.handle).await
    }
}

pub struct RemoteCaptioner {
    client: Arc<MlClient>,
    handle: String,
}

#[async_trait]
impl CaptionModel for RemoteCaptioner {
    async fn caption(&self, images: &[RgbImage], options: &CaptionOptions) -> MlResult<Vec<String>> {
        let encoded = encode_batch(images)?;
        let captions = self
            .client
            .caption(&self.handle, encoded, options.num_beams, options.max_length)
            .await?;
        Ok(captions.into_iter().map(|c| c.trim().to_string()).collect())
    }
}

#[async_trait]
impl ModelHandle for RemoteCaptioner {
    async fn release(&self) -> MlResult<()> {
        self.client.unload_model(&self.handle).await
    }
}
