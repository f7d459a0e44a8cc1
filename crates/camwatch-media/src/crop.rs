//! Crop persistence and image loading.

use image::RgbImage;
use std::path::{Path, PathBuf};

use camwatch_models::BoundingBox;

use crate::error::{MediaError, MediaResult};

/// Crop `bbox` out of `frame` and write it as a JPEG at `path`.
///
/// A box that does not intersect the frame saves the whole frame.
/// Parent directories are created as needed.
pub async fn save_crop(frame: &RgbImage, bbox: &BoundingBox, path: &Path) -> MediaResult<()> {
    let crop = match bbox.crop_rect(frame.width(), frame.height()) {
        Some((x, y, w, h)) => image::imageops::crop_imm(frame, x, y, w, h).to_image(),
        None => frame.clone(),
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || crop.save_with_format(&path, image::ImageFormat::Jpeg))
        .await
        .map_err(|e| MediaError::internal(format!("Crop encoder task failed: {}", e)))??;

    Ok(())
}

/// Load an image from disk as RGB.
pub async fn load_image(path: impl Into<PathBuf>) -> MediaResult<RgbImage> {
    let path = path.into();
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(MediaError::FileNotFound(path));
    }

    tokio::task::spawn_blocking(move || image::open(&path).map(|img| img.to_rgb8()))
        .await
        .map_err(|e| MediaError::internal(format!("Image decoder task failed: {}", e)))?
        .map_err(MediaError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn frame() -> RgbImage {
        RgbImage::from_fn(64, 48, |x, _| Rgb([(x * 4) as u8, 0, 0]))
    }

    #[tokio::test]
    async fn test_save_crop_creates_dirs_and_crops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cam/2024/03/09/09/1_frame_30_person.jpg");

        save_crop(&frame(), &BoundingBox::new(10.0, 5.0, 30.0, 25.0), &path)
            .await
            .unwrap();

        let saved = load_image(&path).await.unwrap();
        assert_eq!(saved.dimensions(), (20, 20));
    }

    #[tokio::test]
    async fn test_box_outside_frame_saves_whole_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("full.jpg");

        save_crop(&frame(), &BoundingBox::new(500.0, 500.0, 600.0, 600.0), &path)
            .await
            .unwrap();

        assert_eq!(load_image(&path).await.unwrap().dimensions(), (64, 48));
    }

    #[tokio::test]
    async fn test_load_missing_image() {
        let err = load_image("/no/such/crop.jpg").await.unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
