//! Persisted storage layout.
//!
//! Recordings live at `{recordings}/{camera}/{Y}/{m}/{d}/{H}/{M}.mp4` and
//! detection crops at `{pics}/{camera}/{Y}/{m}/{d}/{H}/{segment}_frame_{n}_person.jpg`.
//! Date components are rendered in the deployment's local offset.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::path::{Path, PathBuf};

pub const DEFAULT_RECORDINGS_DIR: &str = "/data/camwatch/CameraRecordings";
pub const DEFAULT_PICS_DIR: &str = "/data/camwatch/CameraWarningPics";
pub const DEFAULT_RESOURCE_BASE_URL: &str = "http://localhost:8080";
/// Asia/Shanghai has no DST, so a fixed offset is exact.
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = 8;

const RECORDINGS_URL_PREFIX: &str = "CameraRecordings";
const PICS_URL_PREFIX: &str = "CameraWarningPics";

pub const RECORDING_EXTENSION: &str = "mp4";
pub const CROP_EXTENSION: &str = "jpg";

#[derive(Debug, Clone, PartialEq)]
pub struct StorageLayout {
    pub recordings_dir: PathBuf,
    pub pics_dir: PathBuf,
    pub resource_base_url: String,
    pub utc_offset: FixedOffset,
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self {
            recordings_dir: PathBuf::from(DEFAULT_RECORDINGS_DIR),
            pics_dir: PathBuf::from(DEFAULT_PICS_DIR),
            resource_base_url: DEFAULT_RESOURCE_BASE_URL.to_string(),
            utc_offset: offset_from_hours(DEFAULT_UTC_OFFSET_HOURS),
        }
    }
}

impl StorageLayout {
    /// Create layout from environment variables.
    pub fn from_env() -> Self {
        let offset_hours = std::env::var("CAMWATCH_TZ_OFFSET_HOURS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_UTC_OFFSET_HOURS);

        Self {
            recordings_dir: std::env::var("CAMERA_BASE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_RECORDINGS_DIR)),
            pics_dir: std::env::var("PICS_BASE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_PICS_DIR)),
            resource_base_url: std::env::var("RESOURCE_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_RESOURCE_BASE_URL.to_string()),
            utc_offset: offset_from_hours(offset_hours),
        }
    }

    pub fn local_time(&self, at: DateTime<Utc>) -> DateTime<FixedOffset> {
        at.with_timezone(&self.utc_offset)
    }

    fn hour_dir(&self, base: &Path, camera_id: &str, at: DateTime<Utc>) -> PathBuf {
        let local = self.local_time(at);
        base.join(path_component(camera_id))
            .join(local.format("%Y").to_string())
            .join(local.format("%m").to_string())
            .join(local.format("%d").to_string())
            .join(local.format("%H").to_string())
    }

    /// Output path for a recording started at `at`, under the default root.
    pub fn recording_path(&self, camera_id: &str, at: DateTime<Utc>) -> PathBuf {
        self.recording_path_under(&self.recordings_dir, camera_id, at)
    }

    /// Output path for a recording under an explicit root.
    pub fn recording_path_under(&self, base: &Path, camera_id: &str, at: DateTime<Utc>) -> PathBuf {
        let minute = self.local_time(at).format("%M").to_string();
        self.hour_dir(base, camera_id, at)
            .join(format!("{}.{}", minute, RECORDING_EXTENSION))
    }

    /// Directory receiving the crops of one segment.
    pub fn crop_dir(&self, camera_id: &str, segment_start: DateTime<Utc>) -> PathBuf {
        self.hour_dir(&self.pics_dir, camera_id, segment_start)
    }

    pub fn crop_file_name(segment_id: i64, frame_index: i64) -> String {
        format!("{}_frame_{}_person.{}", segment_id, frame_index, CROP_EXTENSION)
    }

    pub fn crop_path(
        &self,
        camera_id: &str,
        segment_start: DateTime<Utc>,
        segment_id: i64,
        frame_index: i64,
    ) -> PathBuf {
        self.crop_dir(camera_id, segment_start)
            .join(Self::crop_file_name(segment_id, frame_index))
    }

    /// Public URL for a recording file.
    pub fn video_url(&self, file_path: &str) -> Option<String> {
        self.public_url(&self.recordings_dir, RECORDINGS_URL_PREFIX, file_path)
    }

    /// Public URL for a crop image.
    pub fn image_url(&self, image_path: &str) -> Option<String> {
        self.public_url(&self.pics_dir, PICS_URL_PREFIX, image_path)
    }

    fn public_url(&self, root: &Path, prefix: &str, path: &str) -> Option<String> {
        if path.is_empty() {
            return None;
        }
        let relative = Path::new(path)
            .strip_prefix(root)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| path.to_string());
        Some(format!(
            "{}/{}/{}",
            self.resource_base_url.trim_end_matches('/'),
            prefix,
            relative.trim_start_matches('/')
        ))
    }
}

fn offset_from_hours(hours: i32) -> FixedOffset {
    FixedOffset::east_opt(hours.clamp(-23, 23) * 3600).unwrap_or_else(|| Utc.fix())
}

/// Camera ids become a single directory level.
fn path_component(id: &str) -> String {
    id.chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn layout() -> StorageLayout {
        StorageLayout {
            recordings_dir: PathBuf::from("/rec"),
            pics_dir: PathBuf::from("/pics"),
            resource_base_url: "http://res.example/".to_string(),
            utc_offset: offset_from_hours(8),
        }
    }

    #[test]
    fn recording_path_uses_local_hour_and_minute() {
        // 23:07 UTC is 07:07 the next day at +08:00
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 23, 7, 42).unwrap();
        assert_eq!(
            layout().recording_path("192.168.1.64", at),
            PathBuf::from("/rec/192.168.1.64/2024/03/10/07/07.mp4")
        );
    }

    #[test]
    fn different_cameras_never_collide() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 1, 0, 0).unwrap();
        let l = layout();
        assert_ne!(l.recording_path("cam-a", at), l.recording_path("cam-b", at));
    }

    #[test]
    fn crop_path_is_keyed_by_segment_and_frame() {
        let start = Utc.with_ymd_and_hms(2024, 3, 9, 1, 0, 0).unwrap();
        assert_eq!(
            layout().crop_path("cam-a", start, 42, 90),
            PathBuf::from("/pics/cam-a/2024/03/09/09/42_frame_90_person.jpg")
        );
    }

    #[test]
    fn camera_id_cannot_escape_root() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 1, 0, 0).unwrap();
        let path = layout().recording_path("../etc", at);
        assert!(path.starts_with("/rec"));
        assert!(!path.to_string_lossy().contains(".."));
    }

    #[test]
    fn public_urls_are_relative_to_roots() {
        let l = layout();
        assert_eq!(
            l.video_url("/rec/cam/2024/03/09/09/00.mp4").as_deref(),
            Some("http://res.example/CameraRecordings/cam/2024/03/09/09/00.mp4")
        );
        assert_eq!(
            l.image_url("/pics/cam/1_frame_0_person.jpg").as_deref(),
            Some("http://res.example/CameraWarningPics/cam/1_frame_0_person.jpg")
        );
        assert_eq!(l.video_url(""), None);
    }
}
