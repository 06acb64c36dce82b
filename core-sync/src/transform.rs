//! # Transform Stage
//!
//! Turns a library item into an upload-ready payload.
//!
//! Still images are decoded, downsampled so the longest side fits
//! `max_dimension` (aspect ratio kept, never upscaled), re-encoded as JPEG and
//! written to a scratch file under `<cache>/upload-scratch/<namespace>/`.
//! Image types the codec cannot read (HEIC, camera RAW) and all other media
//! are passed through untouched. Image work runs on the blocking pool so a batch
//! of transcodes does not stall the async workers dispatching uploads.

use crate::config::{SyncConfig, DEFAULT_TASK_NAME};
use crate::error::TransformError;
use bridge_traits::{FileSystemAccess, MediaItem, MediaLibrary};
use bytes::Bytes;
use chrono::DateTime;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::ImageFormat;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Scratch subdirectory of the cache directory.
pub const SCRATCH_DIR: &str = "upload-scratch";

/// Wire format of the `capturedAt` field.
pub const CAPTURED_AT_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Renders epoch millis as `YYYY:MM:DD HH:mm:ss` in UTC.
pub fn format_captured_at(millis: i64) -> Option<String> {
    DateTime::from_timestamp_millis(millis).map(|at| at.format(CAPTURED_AT_FORMAT).to_string())
}

/// Downsample and JPEG re-encode settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageTransform {
    pub max_dimension: u32,
    pub jpeg_quality: u8,
}

impl ImageTransform {
    pub fn new(max_dimension: u32, jpeg_quality: u8) -> Self {
        Self {
            max_dimension,
            jpeg_quality,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.max_dimension, config.jpeg_quality)
    }

    /// Whether payloads of `mime_type` can be decoded for re-encoding.
    pub fn decodes(mime_type: &str) -> bool {
        ImageFormat::from_mime_type(mime_type).is_some_and(|format| format.reading_enabled())
    }

    /// Decodes, downsamples and re-encodes on the calling thread.
    pub fn transcode_blocking(&self, payload: &[u8]) -> Result<Vec<u8>, TransformError> {
        let img = image::load_from_memory(payload)
            .map_err(|e| TransformError::Decode(e.to_string()))?;

        let img = if img.width() > self.max_dimension || img.height() > self.max_dimension {
            img.resize(self.max_dimension, self.max_dimension, FilterType::Lanczos3)
        } else {
            img
        };

        // JPEG has no alpha channel
        let rgb = img.to_rgb8();
        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, self.jpeg_quality)
            .encode_image(&rgb)
            .map_err(|e| TransformError::Encode(e.to_string()))?;

        Ok(encoded)
    }

    /// Runs [`transcode_blocking`](Self::transcode_blocking) on the blocking pool.
    pub async fn transcode(&self, payload: Bytes) -> Result<Vec<u8>, TransformError> {
        let transform = *self;
        tokio::task::spawn_blocking(move || transform.transcode_blocking(&payload))
            .await
            .map_err(|e| TransformError::Encode(format!("transcode task aborted: {}", e)))?
    }
}

/// Where a prepared payload lives until it is sent.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadSource {
    /// Transcoded bytes on disk; deleted after the upload attempt
    Scratch(PathBuf),
    /// Original bytes, sent as-is
    Inline(Bytes),
}

/// An item ready for transport.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedUpload {
    pub file_name: String,
    pub mime_type: String,
    /// `capturedAt` wire value
    pub captured_at: String,
    pub source: PayloadSource,
}

impl PreparedUpload {
    pub fn scratch_path(&self) -> Option<&PathBuf> {
        match &self.source {
            PayloadSource::Scratch(path) => Some(path),
            PayloadSource::Inline(_) => None,
        }
    }
}

/// Reads items from the library and stages their upload payloads.
pub struct Transformer {
    library: Arc<dyn MediaLibrary>,
    file_system: Arc<dyn FileSystemAccess>,
    image: ImageTransform,
    namespace: String,
}

impl Transformer {
    pub fn new(
        library: Arc<dyn MediaLibrary>,
        file_system: Arc<dyn FileSystemAccess>,
        image: ImageTransform,
    ) -> Self {
        Self {
            library,
            file_system,
            image,
            namespace: DEFAULT_TASK_NAME.to_string(),
        }
    }

    /// Keeps scratch files under `upload-scratch/<namespace>` so engines
    /// sharing a cache directory never touch each other's payloads.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    async fn scratch_root(&self) -> Result<PathBuf, TransformError> {
        Ok(self
            .file_system
            .get_cache_directory()
            .await
            .map_err(|e| TransformError::Scratch(e.to_string()))?
            .join(SCRATCH_DIR)
            .join(&self.namespace))
    }

    pub async fn scratch_dir(&self) -> Result<PathBuf, TransformError> {
        let dir = self.scratch_root().await?;
        self.file_system
            .create_dir_all(&dir)
            .await
            .map_err(|e| TransformError::Scratch(e.to_string()))?;
        Ok(dir)
    }

    /// Removes payloads left behind by a run that never finished.
    pub async fn purge_scratch(&self) -> Result<(), TransformError> {
        let dir = self.scratch_root().await?;
        self.file_system
            .delete_dir_all(&dir)
            .await
            .map_err(|e| TransformError::Scratch(e.to_string()))
    }

    /// Produces the payload for `item`.
    pub async fn prepare(&self, item: &MediaItem) -> Result<PreparedUpload, TransformError> {
        let captured_at = format_captured_at(item.captured_at).ok_or_else(|| {
            TransformError::Encode(format!("capture time {} out of range", item.captured_at))
        })?;

        let original = self
            .library
            .open(item)
            .await
            .map_err(|e| TransformError::Unreadable(e.to_string()))?;

        if !item.is_image() || !ImageTransform::decodes(&item.mime_type) {
            return Ok(PreparedUpload {
                file_name: upload_file_name(&item.id, None),
                mime_type: item.mime_type.clone(),
                captured_at,
                source: PayloadSource::Inline(original),
            });
        }

        let original_len = original.len();
        let encoded = self.image.transcode(original).await?;

        let path = self.scratch_dir().await?.join(format!("{}.jpg", Uuid::new_v4().simple()));
        let encoded_len = encoded.len();
        self.file_system
            .write_file(&path, Bytes::from(encoded))
            .await
            .map_err(|e| TransformError::Scratch(e.to_string()))?;

        debug!(
            item_id = %item.id,
            original_len,
            encoded_len,
            "Staged transcoded payload"
        );

        Ok(PreparedUpload {
            file_name: upload_file_name(&item.id, Some("jpg")),
            mime_type: "image/jpeg".to_string(),
            captured_at,
            source: PayloadSource::Scratch(path),
        })
    }

    /// Loads the bytes of a prepared payload.
    pub async fn payload(&self, prepared: &PreparedUpload) -> Result<Bytes, TransformError> {
        match &prepared.source {
            PayloadSource::Inline(bytes) => Ok(bytes.clone()),
            PayloadSource::Scratch(path) => self
                .file_system
                .read_file(path)
                .await
                .map_err(|e| TransformError::Scratch(e.to_string())),
        }
    }

    /// Removes the scratch file, if any. Failures are only logged.
    pub async fn discard(&self, prepared: &PreparedUpload) {
        if let Some(path) = prepared.scratch_path() {
            if let Err(e) = self.file_system.delete_file(path).await {
                tracing::warn!(error = %e, "Failed to delete scratch file");
            }
        }
    }
}

/// File name sent in the multipart `file` part.
///
/// Uses the last segment of the item id, swapping the extension when the
/// payload was re-encoded.
pub fn upload_file_name(item_id: &str, extension: Option<&str>) -> String {
    let base = item_id
        .rsplit(&['/', '\\'][..])
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or("upload");

    match extension {
        Some(ext) => {
            let stem = match base.rsplit_once('.') {
                Some((stem, _)) if !stem.is_empty() => stem,
                _ => base,
            };
            format!("{stem}.{ext}")
        }
        None => base.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_desktop::TokioFileSystem;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{BridgeError, PermissionStatus};
    use image::{DynamicImage, ImageFormat, RgbaImage};
    use std::collections::HashMap;
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Bytes {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            image::Rgba([200, 40, 40, 128]),
        ));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        Bytes::from(buf)
    }

    struct FixedLibrary {
        payloads: HashMap<String, Bytes>,
    }

    #[async_trait]
    impl MediaLibrary for FixedLibrary {
        async fn permission_status(&self) -> BridgeResult<PermissionStatus> {
            Ok(PermissionStatus::Granted)
        }

        async fn list(&self) -> BridgeResult<Vec<MediaItem>> {
            Ok(Vec::new())
        }

        async fn open(&self, item: &MediaItem) -> BridgeResult<Bytes> {
            self.payloads
                .get(&item.id)
                .cloned()
                .ok_or_else(|| BridgeError::OperationFailed(format!("{} missing", item.id)))
        }
    }

    fn transformer(payloads: Vec<(&str, Bytes)>) -> (Transformer, PathBuf) {
        let cache = std::env::temp_dir().join(format!("core-sync-transform-{}", Uuid::new_v4()));
        let library = FixedLibrary {
            payloads: payloads
                .into_iter()
                .map(|(id, bytes)| (id.to_string(), bytes))
                .collect(),
        };
        let transformer = Transformer::new(
            Arc::new(library),
            Arc::new(TokioFileSystem::with_cache_directory(cache.clone())),
            ImageTransform::new(64, 80),
        );
        (transformer, cache)
    }

    #[test]
    fn test_captured_at_wire_format() {
        // 2024-03-09 07:05:03.250 UTC
        assert_eq!(
            format_captured_at(1_709_967_903_250).as_deref(),
            Some("2024:03:09 07:05:03")
        );
        assert_eq!(format_captured_at(0).as_deref(), Some("1970:01:01 00:00:00"));
        assert!(format_captured_at(i64::MAX).is_none());
    }

    #[test]
    fn test_downsamples_longest_side() {
        let encoded = ImageTransform::new(64, 80)
            .transcode_blocking(&png(200, 100))
            .unwrap();
        let decoded = image::load_from_memory(&encoded).unwrap();

        assert_eq!(image::guess_format(&encoded).unwrap(), ImageFormat::Jpeg);
        assert_eq!((decoded.width(), decoded.height()), (64, 32));
    }

    #[test]
    fn test_never_upscales() {
        let encoded = ImageTransform::new(1920, 80)
            .transcode_blocking(&png(40, 30))
            .unwrap();
        let decoded = image::load_from_memory(&encoded).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let err = ImageTransform::new(64, 80)
            .transcode_blocking(b"definitely not an image")
            .unwrap_err();
        assert!(matches!(err, TransformError::Decode(_)));
    }

    #[tokio::test]
    async fn test_prepare_image_writes_scratch() {
        let (transformer, cache) = transformer(vec![("IMG_1.png", png(128, 128))]);
        let item = MediaItem::new("IMG_1.png", 1_000, "image/png", "IMG_1.png");

        let prepared = transformer.prepare(&item).await.unwrap();
        assert_eq!(prepared.file_name, "IMG_1.jpg");
        assert_eq!(prepared.mime_type, "image/jpeg");

        let path = prepared.scratch_path().unwrap().clone();
        assert!(path.starts_with(cache.join(SCRATCH_DIR).join(DEFAULT_TASK_NAME)));
        assert!(path.exists());
        assert!(!transformer.payload(&prepared).await.unwrap().is_empty());

        transformer.discard(&prepared).await;
        assert!(!path.exists());

        let _ = std::fs::remove_dir_all(&cache);
    }

    #[tokio::test]
    async fn test_purge_removes_leftovers() {
        let (transformer, cache) = transformer(vec![("IMG_3.png", png(16, 16))]);
        let item = MediaItem::new("IMG_3.png", 3_000, "image/png", "IMG_3.png");

        // Prepared but never sent, as after a crash mid-run
        let prepared = transformer.prepare(&item).await.unwrap();
        let leftover = prepared.scratch_path().unwrap().clone();
        assert!(leftover.exists());

        transformer.purge_scratch().await.unwrap();
        assert!(!leftover.exists());
        transformer.purge_scratch().await.unwrap();

        let _ = std::fs::remove_dir_all(&cache);
    }

    #[tokio::test]
    async fn test_purge_leaves_other_namespaces_alone() {
        let (transformer, cache) = transformer(vec![("IMG_4.png", png(16, 16))]);
        let neighbour = Transformer::new(
            transformer.library.clone(),
            transformer.file_system.clone(),
            transformer.image,
        )
        .with_namespace("work_backup");
        let item = MediaItem::new("IMG_4.png", 4_000, "image/png", "IMG_4.png");

        let ours = transformer.prepare(&item).await.unwrap();
        let theirs = neighbour.prepare(&item).await.unwrap();
        assert!(theirs
            .scratch_path()
            .unwrap()
            .starts_with(cache.join(SCRATCH_DIR).join("work_backup")));

        transformer.purge_scratch().await.unwrap();
        assert!(!ours.scratch_path().unwrap().exists());
        assert!(theirs.scratch_path().unwrap().exists());

        let _ = std::fs::remove_dir_all(&cache);
    }

    #[test]
    fn test_decodes_only_readable_image_types() {
        assert!(ImageTransform::decodes("image/jpeg"));
        assert!(ImageTransform::decodes("image/png"));
        assert!(!ImageTransform::decodes("image/heic"));
        assert!(!ImageTransform::decodes("image/x-canon-cr2"));
        assert!(!ImageTransform::decodes("video/mp4"));
    }

    #[tokio::test]
    async fn test_prepare_passes_heic_through() {
        let heic = Bytes::from_static(b"\x00\x00\x00\x18ftypheic");
        let (transformer, cache) = transformer(vec![("2024/IMG_0001.HEIC", heic.clone())]);
        let item = MediaItem::new("2024/IMG_0001.HEIC", 1_000, "image/heic", "2024/IMG_0001.HEIC");

        let prepared = transformer.prepare(&item).await.unwrap();
        assert_eq!(prepared.file_name, "IMG_0001.HEIC");
        assert_eq!(prepared.mime_type, "image/heic");
        assert_eq!(prepared.source, PayloadSource::Inline(heic));

        let _ = std::fs::remove_dir_all(&cache);
    }

    #[tokio::test]
    async fn test_prepare_passes_video_through() {
        let clip = Bytes::from_static(b"\x00\x00\x00\x18ftypmp42");
        let (transformer, cache) = transformer(vec![("clips/VID_2.mp4", clip.clone())]);
        let item = MediaItem::new("clips/VID_2.mp4", 2_000, "video/mp4", "clips/VID_2.mp4");

        let prepared = transformer.prepare(&item).await.unwrap();
        assert_eq!(prepared.file_name, "VID_2.mp4");
        assert_eq!(prepared.mime_type, "video/mp4");
        assert_eq!(prepared.source, PayloadSource::Inline(clip));
        assert!(prepared.scratch_path().is_none());

        let _ = std::fs::remove_dir_all(&cache);
    }

    #[tokio::test]
    async fn test_unreadable_item() {
        let (transformer, _cache) = transformer(vec![]);
        let item = MediaItem::new("gone.jpg", 1, "image/jpeg", "gone.jpg");

        let err = transformer.prepare(&item).await.unwrap_err();
        assert!(matches!(err, TransformError::Unreadable(_)));
    }

    #[test]
    fn test_upload_file_name() {
        assert_eq!(upload_file_name("2024/IMG_0001.HEIC", Some("jpg")), "IMG_0001.jpg");
        assert_eq!(upload_file_name("asset-42", Some("jpg")), "asset-42.jpg");
        assert_eq!(upload_file_name(".hidden", Some("jpg")), ".hidden.jpg");
        assert_eq!(upload_file_name("dir\\clip.mov", None), "clip.mov");
        assert_eq!(upload_file_name("trailing/", None), "upload");
    }
}
