//! Sequential frame reading.
//!
//! A [`VideoSource`] opens a recorded segment and hands back a
//! [`FrameReader`] that yields decoded RGB frames in presentation order.
//! The FFmpeg implementation decodes to `rawvideo` on stdout, so memory use
//! stays at one frame regardless of segment length.

use async_trait::async_trait;
use image::RgbImage;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};
use crate::probe::{probe_video, VideoInfo};

const PIPE_BUFFER_BYTES: usize = 4 * 1024 * 1024;

/// An open video handle.
#[async_trait]
pub trait FrameReader: Send {
    fn info(&self) -> &VideoInfo;

    /// Decode the next frame, `None` at end of stream.
    async fn next_frame(&mut self) -> MediaResult<Option<RgbImage>>;

    /// Advance past the next frame without materializing it.
    /// Returns `false` at end of stream.
    async fn skip_frame(&mut self) -> MediaResult<bool> {
        Ok(self.next_frame().await?.is_some())
    }

    /// Release the decoder. Safe to call more than once.
    async fn close(&mut self);
}

/// Opens video files for sequential reading.
#[async_trait]
pub trait VideoSource: Send + Sync {
    async fn open(&self, path: &Path) -> MediaResult<Box<dyn FrameReader>>;
}

/// [`VideoSource`] backed by ffprobe + an ffmpeg rawvideo pipe.
#[derive(Debug, Default, Clone)]
pub struct FfmpegVideoSource;

impl FfmpegVideoSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl VideoSource for FfmpegVideoSource {
    async fn open(&self, path: &Path) -> MediaResult<Box<dyn FrameReader>> {
        let reader = FfmpegFrameReader::open(path).await?;
        Ok(Box::new(reader))
    }
}

pub struct FfmpegFrameReader {
    info: VideoInfo,
    child: Option<Child>,
    stdout: Option<BufReader<ChildStdout>>,
    buf: Vec<u8>,
    frames_read: u64,
}

impl FfmpegFrameReader {
    pub async fn open(path: &Path) -> MediaResult<Self> {
        let info = probe_video(path).await?;
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let cmd = FfmpegCommand::for_paths(path, "-").no_audio().raw_rgb24();
        debug!("Opening frame pipe: ffmpeg {}", cmd.display_args());

        let mut child = Command::new("ffmpeg")
            .args(cmd.build_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("Failed to capture FFmpeg stdout"))?;

        let frame_len = info.rgb_frame_len();
        Ok(Self {
            info,
            child: Some(child),
            stdout: Some(BufReader::with_capacity(PIPE_BUFFER_BYTES, stdout)),
            buf: vec![0; frame_len],
            frames_read: 0,
        })
    }

    /// Fill `buf` with the next frame. `false` at end of stream.
    async fn read_raw(&mut self) -> MediaResult<bool> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(false);
        };

        match stdout.read_exact(&mut self.buf).await {
            Ok(_) => {
                self.frames_read += 1;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.finish().await?;
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn finish(&mut self) -> MediaResult<()> {
        self.stdout = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait().await?;
        if !status.success() {
            if self.frames_read == 0 {
                return Err(MediaError::ffmpeg_failed(
                    "FFmpeg produced no frames",
                    None,
                    status.code(),
                ));
            }
            // Truncated recordings decode up to the damage
            warn!(
                frames_read = self.frames_read,
                "FFmpeg exited with {:?} after partial decode",
                status.code()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl FrameReader for FfmpegFrameReader {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    async fn next_frame(&mut self) -> MediaResult<Option<RgbImage>> {
        if !self.read_raw().await? {
            return Ok(None);
        }
        let image = RgbImage::from_raw(self.info.width, self.info.height, self.buf.clone())
            .ok_or_else(|| MediaError::internal("Frame buffer size mismatch"))?;
        Ok(Some(image))
    }

    async fn skip_frame(&mut self) -> MediaResult<bool> {
        self.read_raw().await
    }

    async fn close(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
    }
}
