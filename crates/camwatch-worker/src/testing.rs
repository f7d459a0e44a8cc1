//! Scripted collaborators for stage tests.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use tempfile::TempDir;

use camwatch_db::MemoryStore;
use camwatch_media::{
    Capture, CaptureOutput, FrameReader, MediaError, MediaResult, RgbImage, VideoInfo,
    VideoSource,
};
use camwatch_ml_client::{
    BoxPrediction, CaptionModel, CaptionOptions, DetectionModel, MlError, MlResult,
    ModelHandle, ModelProvider, PERSON_CLASS_ID,
};
use camwatch_models::{
    AnalysisStatus, BoundingBox, CameraConfig, GpuReading, RecordingSegment, RecordingStatus,
    SegmentId, StorageLayout,
};
use camwatch_queue::CollectingSink;

use crate::config::PipelineConfig;
use crate::context::ProcessingContext;
use crate::gpu::GpuSampler;

/// Frames carry their index in the first pixel so fakes can tell them apart.
pub fn indexed_frame(index: u64) -> RgbImage {
    let mut frame = RgbImage::new(16, 16);
    frame.put_pixel(0, 0, image_pixel(index));
    frame
}

fn image_pixel(index: u64) -> image::Rgb<u8> {
    image::Rgb([(index & 0xff) as u8, ((index >> 8) & 0xff) as u8, 0])
}

pub fn frame_index(frame: &RgbImage) -> u64 {
    let p = frame.get_pixel(0, 0);
    p[0] as u64 | (p[1] as u64) << 8
}

pub fn video_info(fps: f64, frames: u64) -> VideoInfo {
    VideoInfo {
        duration: frames as f64 / fps,
        width: 16,
        height: 16,
        fps,
        frame_count: Some(frames),
        codec: "h264".to_string(),
        size: 1024,
    }
}

// ----- video -----

pub struct ScriptedVideoSource {
    info: VideoInfo,
    frames: u64,
    /// Fail reading when this frame is reached
    fail_at: Option<u64>,
    pub opened: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
    pub decoded: Arc<AtomicUsize>,
}

impl ScriptedVideoSource {
    pub fn new(fps: f64, frames: u64) -> Self {
        Self {
            info: video_info(fps, frames),
            frames,
            fail_at: None,
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
            decoded: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing_at(mut self, frame: u64) -> Self {
        self.fail_at = Some(frame);
        self
    }
}

#[async_trait]
impl VideoSource for ScriptedVideoSource {
    async fn open(&self, path: &Path) -> MediaResult<Box<dyn FrameReader>> {
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedReader {
            info: self.info.clone(),
            frames: self.frames,
            fail_at: self.fail_at,
            next: 0,
            closed: Arc::clone(&self.closed),
            decoded: Arc::clone(&self.decoded),
        }))
    }
}

struct ScriptedReader {
    info: VideoInfo,
    frames: u64,
    fail_at: Option<u64>,
    next: u64,
    closed: Arc<AtomicUsize>,
    decoded: Arc<AtomicUsize>,
}

impl ScriptedReader {
    fn advance(&mut self) -> MediaResult<Option<u64>> {
        if self.fail_at == Some(self.next) {
            return Err(MediaError::ffmpeg_failed("decode error", None, Some(1)));
        }
        if self.next >= self.frames {
            return Ok(None);
        }
        self.next += 1;
        Ok(Some(self.next - 1))
    }
}

#[async_trait]
impl FrameReader for ScriptedReader {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    async fn next_frame(&mut self) -> MediaResult<Option<RgbImage>> {
        let index = self.advance()?;
        if index.is_some() {
            self.decoded.fetch_add(1, Ordering::SeqCst);
        }
        Ok(index.map(indexed_frame))
    }

    async fn skip_frame(&mut self) -> MediaResult<bool> {
        Ok(self.advance()?.is_some())
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// ----- models -----

/// Detector and captioner driven by frame indices.
#[derive(Default)]
pub struct ScriptedModels {
    /// Frame index -> person confidences
    persons: Mutex<Vec<(u64, Vec<f32>)>>,
    fail_detect: AtomicBool,
    /// `detect` never returns
    hang_detect: AtomicBool,
    fail_detector_load: AtomicBool,
    fail_captioner_load: AtomicBool,
    /// Caption calls containing any of these indices fail as a whole
    failing_caption_indices: Mutex<HashSet<u64>>,
    pub detector_loads: AtomicUsize,
    pub captioner_loads: AtomicUsize,
    pub releases: Arc<AtomicUsize>,
    pub detect_calls: Arc<Mutex<Vec<usize>>>,
    pub caption_calls: Arc<Mutex<Vec<usize>>>,
}

impl ScriptedModels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame `index` shows people with these confidences.
    pub fn with_persons(self, index: u64, confidences: &[f32]) -> Self {
        self.persons
            .lock()
            .unwrap()
            .push((index, confidences.to_vec()));
        self
    }

    pub fn set_fail_detect(&self, fail: bool) {
        self.fail_detect.store(fail, Ordering::SeqCst);
    }

    pub fn set_hang_detect(&self, hang: bool) {
        self.hang_detect.store(hang, Ordering::SeqCst);
    }

    pub fn set_fail_detector_load(&self, fail: bool) {
        self.fail_detector_load.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_captioner_load(&self, fail: bool) {
        self.fail_captioner_load.store(fail, Ordering::SeqCst);
    }

    pub fn fail_captions_containing(&self, index: u64) {
        self.failing_caption_indices.lock().unwrap().insert(index);
    }

    fn predictions_for(&self, index: u64) -> Vec<BoxPrediction> {
        let persons = self.persons.lock().unwrap();
        let mut preds: Vec<BoxPrediction> = persons
            .iter()
            .filter(|(i, _)| *i == index)
            .flat_map(|(_, confs)| confs.iter().copied())
            .enumerate()
            .map(|(n, confidence)| BoxPrediction {
                class_id: PERSON_CLASS_ID,
                confidence,
                bbox: BoundingBox::new(n as f32, 1.0, 8.0 + n as f32, 12.0),
            })
            .collect();
        // A chair in every frame; never a person
        preds.push(BoxPrediction {
            class_id: 56,
            confidence: 0.99,
            bbox: BoundingBox::new(0.0, 0.0, 4.0, 4.0),
        });
        preds
    }
}

struct ScriptedDetector(Arc<ScriptedModels>);

#[async_trait]
impl DetectionModel for ScriptedDetector {
    async fn detect(&self, frames: &[RgbImage]) -> MlResult<Vec<Vec<BoxPrediction>>> {
        self.0.detect_calls.lock().unwrap().push(frames.len());
        if self.0.hang_detect.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.0.fail_detect.load(Ordering::SeqCst) {
            return Err(MlError::ServiceUnavailable("out of memory".to_string()));
        }
        Ok(frames
            .iter()
            .map(|f| self.0.predictions_for(frame_index(f)))
            .collect())
    }
}

#[async_trait]
impl ModelHandle for ScriptedDetector {
    async fn release(&self) -> MlResult<()> {
        self.0.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedCaptioner(Arc<ScriptedModels>);

#[async_trait]
impl CaptionModel for ScriptedCaptioner {
    async fn caption(&self, images: &[RgbImage], _options: &CaptionOptions) -> MlResult<Vec<String>> {
        self.0.caption_calls.lock().unwrap().push(images.len());
        let failing = self.0.failing_caption_indices.lock().unwrap().clone();
        if images.iter().any(|img| failing.contains(&frame_index(img))) {
            return Err(MlError::RequestFailed("CUDA error".to_string()));
        }
        Ok(images
            .iter()
            .map(|img| format!("a person near marker {}", frame_index(img)))
            .collect())
    }
}

#[async_trait]
impl ModelHandle for ScriptedCaptioner {
    async fn release(&self) -> MlResult<()> {
        self.0.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Shares one [`ScriptedModels`] between the provider and the test.
pub struct ScriptedProvider(pub Arc<ScriptedModels>);

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn load_detector(&self) -> MlResult<Box<dyn DetectionModel>> {
        if self.0.fail_detector_load.load(Ordering::SeqCst) {
            return Err(MlError::ServiceUnavailable("model loading".to_string()));
        }
        self.0.detector_loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedDetector(Arc::clone(&self.0))))
    }

    async fn load_captioner(&self) -> MlResult<Box<dyn CaptionModel>> {
        if self.0.fail_captioner_load.load(Ordering::SeqCst) {
            return Err(MlError::ServiceUnavailable("model loading".to_string()));
        }
        self.0.captioner_loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedCaptioner(Arc::clone(&self.0))))
    }
}

// ----- capture -----

#[derive(Debug, Clone, Copy)]
pub enum CaptureScript {
    /// Write a file of this many bytes
    Success(usize),
    NonZeroExit(i32),
    HardTimeout,
    /// Exit 0 without writing anything
    MissingOutput,
    /// Never return
    Hang,
}

pub struct ScriptedCapture {
    script: CaptureScript,
    pub calls: Mutex<Vec<PathBuf>>,
}

impl ScriptedCapture {
    pub fn new(script: CaptureScript) -> Self {
        Self {
            script,
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Capture for ScriptedCapture {
    async fn capture(
        &self,
        _camera: &CameraConfig,
        _duration: Duration,
        output_path: &Path,
    ) -> MediaResult<CaptureOutput> {
        self.calls.lock().unwrap().push(output_path.to_path_buf());
        match self.script {
            CaptureScript::Success(bytes) => {
                if let Some(parent) = output_path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(output_path, vec![0u8; bytes]).await?;
                Ok(CaptureOutput {
                    path: output_path.to_path_buf(),
                    size_bytes: bytes as u64,
                })
            }
            CaptureScript::NonZeroExit(code) => Err(MediaError::ffmpeg_failed(
                "Connection refused",
                Some("rtsp: connection refused".to_string()),
                Some(code),
            )),
            CaptureScript::HardTimeout => Err(MediaError::Timeout(75)),
            CaptureScript::MissingOutput => {
                Err(MediaError::FileNotFound(output_path.to_path_buf()))
            }
            CaptureScript::Hang => std::future::pending().await,
        }
    }
}

// ----- gpu -----

pub struct FixedGpuSampler(Option<GpuReading>);

impl FixedGpuSampler {
    pub fn new(util: f32, used_mb: u64, total_mb: u64, temp: Option<f32>) -> Self {
        Self(Some(GpuReading {
            utilization_pct: util,
            memory_used_mb: used_mb,
            memory_total_mb: total_mb,
            temperature_c: temp,
        }))
    }

    pub fn unavailable() -> Self {
        Self(None)
    }
}

#[async_trait]
impl GpuSampler for FixedGpuSampler {
    async fn sample(&self) -> Option<GpuReading> {
        self.0
    }
}

// ----- harness -----

pub struct Harness {
    pub ctx: ProcessingContext,
    pub store: Arc<MemoryStore>,
    pub sink: Arc<CollectingSink>,
    pub models: Arc<ScriptedModels>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(video: ScriptedVideoSource, models: ScriptedModels, capture: CaptureScript) -> Self {
        Self::with_pipeline(video, models, capture, PipelineConfig::default())
    }

    pub fn with_pipeline(
        video: ScriptedVideoSource,
        models: ScriptedModels,
        capture: CaptureScript,
        pipeline: PipelineConfig,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(CollectingSink::new());
        let models = Arc::new(models);

        let layout = StorageLayout {
            recordings_dir: dir.path().join("recordings"),
            pics_dir: dir.path().join("pics"),
            resource_base_url: "http://res.test".to_string(),
            utc_offset: FixedOffset::east_opt(8 * 3600).unwrap(),
        };

        let ctx = ProcessingContext {
            store: store.clone(),
            sink: sink.clone(),
            capture: Arc::new(ScriptedCapture::new(capture)),
            video: Arc::new(video),
            models: Arc::new(ScriptedProvider(Arc::clone(&models))),
            gpu: Arc::new(FixedGpuSampler::new(40.0, 2000, 8000, Some(55.0))),
            layout,
            pipeline,
        };

        Self {
            ctx,
            store,
            sink,
            models,
            dir,
        }
    }

    /// A successful recording whose file exists on disk.
    pub async fn recorded_segment(&self, id: i64) -> RecordingSegment {
        let start: DateTime<Utc> = "2024-05-01T02:03:00Z".parse().unwrap();
        let path = self.ctx.layout.recording_path(&format!("cam-{}", id), start);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"video").await.unwrap();

        let segment = RecordingSegment {
            id: SegmentId(id),
            camera_id: format!("cam-{}", id),
            camera_user: "admin".to_string(),
            task_id: None,
            start_time: start,
            end_time: Some(start + chrono::Duration::seconds(60)),
            status: RecordingStatus::Success,
            file_path: Some(path.to_string_lossy().into_owned()),
            file_size: Some(5),
            error_message: None,
            analysis_status: AnalysisStatus::Pending,
            analysis_time: None,
        };
        self.store.put_segment(segment.clone()).await;
        segment
    }
}
