//! Collaborators shared by every job a worker runs.

use std::sync::Arc;

use tracing::{info, warn};

use camwatch_db::{PgStore, PoolConfig, Store};
use camwatch_media::{Capture, FfmpegCapture, FfmpegVideoSource, VideoSource};
use camwatch_ml_client::{MlClient, ModelConfig, ModelProvider, RemoteModelProvider};
use camwatch_models::StorageLayout;
use camwatch_queue::JobSink;

use crate::config::PipelineConfig;
use crate::error::WorkerResult;
use crate::gpu::{GpuSampler, NvidiaSmiSampler};

/// Everything a pipeline stage talks to.
///
/// Stages only see trait objects, so tests swap in the in-memory store and
/// scripted capture, video and model collaborators.
#[derive(Clone)]
pub struct ProcessingContext {
    pub store: Arc<dyn Store>,
    /// Where stages submit the next stage's job
    pub sink: Arc<dyn JobSink>,
    pub capture: Arc<dyn Capture>,
    pub video: Arc<dyn VideoSource>,
    pub models: Arc<dyn ModelProvider>,
    pub gpu: Arc<dyn GpuSampler>,
    pub layout: StorageLayout,
    pub pipeline: PipelineConfig,
}

impl ProcessingContext {
    /// Production wiring: Postgres, FFmpeg, the model service and `nvidia-smi`.
    pub async fn connect(sink: Arc<dyn JobSink>, pipeline: PipelineConfig) -> WorkerResult<Self> {
        let store = PgStore::connect(&PoolConfig::from_env()).await?;
        store.migrate().await?;
        info!("Database ready");

        let ml_client = Arc::new(MlClient::from_env()?);
        match ml_client.health_check().await {
            Ok(true) => info!("Model service reachable at {}", ml_client.config().base_url),
            Ok(false) | Err(_) => warn!(
                "Model service at {} is not healthy yet; inference jobs will retry",
                ml_client.config().base_url
            ),
        }

        let gpu = NvidiaSmiSampler::new();
        if !gpu.is_available() {
            warn!("nvidia-smi not found, GPU telemetry disabled");
        }

        Ok(Self {
            store: Arc::new(store),
            sink,
            capture: Arc::new(FfmpegCapture::new(pipeline.capture_hard_timeout)),
            video: Arc::new(FfmpegVideoSource::new()),
            models: Arc::new(RemoteModelProvider::new(ml_client, ModelConfig::from_env())),
            gpu: Arc::new(gpu),
            layout: StorageLayout::from_env(),
            pipeline,
        })
    }
}
