//! External media processes for the camwatch pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building and a runner with a hard kill deadline
//! - RTSP segment capture behind the [`Capture`] trait
//! - FFprobe probing
//! - Sequential raw-frame reading behind the [`VideoSource`] trait
//! - Crop persistence and image loading

pub mod capture;
pub mod command;
pub mod crop;
pub mod error;
pub mod frames;
pub mod probe;

pub use capture::{Capture, CaptureOutput, FfmpegCapture};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use crop::{load_image, save_crop};
pub use error::{MediaError, MediaResult};
pub use frames::{FfmpegFrameReader, FfmpegVideoSource, FrameReader, VideoSource};
pub use probe::{probe_video, VideoInfo};

pub use image::RgbImage;
