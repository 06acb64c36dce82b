//! Local Media Inventory and Change Signals
//!
//! Abstracts the host's media library (camera roll, photo folder, MediaStore)
//! and the notification mechanism that reports "something changed".

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Geographic position attached to a media item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A single item of the local media inventory.
///
/// Items are produced by the host [`MediaLibrary`] and are never mutated by
/// the core. `id` is stable for the lifetime of the underlying content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    /// Stable identifier, unique per content
    pub id: String,
    /// Capture time as Unix epoch milliseconds
    pub captured_at: i64,
    /// MIME type reported by the host (e.g. `image/jpeg`)
    pub mime_type: String,
    /// Opaque handle the library understands (path, content URI, asset id)
    pub locator: String,
    /// Capture location, when the host knows it
    pub geo: Option<GeoPoint>,
}

impl MediaItem {
    pub fn new(
        id: impl Into<String>,
        captured_at: i64,
        mime_type: impl Into<String>,
        locator: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            captured_at,
            mime_type: mime_type.into(),
            locator: locator.into(),
            geo: None,
        }
    }

    pub fn with_geo(mut self, geo: GeoPoint) -> Self {
        self.geo = Some(geo);
        self
    }

    /// Whether the payload is a still image the core knows how to downsample.
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// Authorization state of the media library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionStatus {
    /// Full read access
    Granted,
    /// Access restricted to a user-picked subset (iOS limited library)
    Limited,
    /// The user refused access or has not been asked yet
    Denied,
}

impl PermissionStatus {
    pub fn allows_read(&self) -> bool {
        matches!(self, PermissionStatus::Granted | PermissionStatus::Limited)
    }
}

/// Media library trait
///
/// Abstracts enumeration of local media:
/// - **Android**: MediaStore queries
/// - **iOS**: PHAsset fetches
/// - **Desktop**: Directory scan of a photos folder
///
/// The library only provides full snapshots. Incremental filtering is done by
/// the core against its persisted watermark.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::media::MediaLibrary;
///
/// async fn newest(library: &dyn MediaLibrary) -> Result<Option<MediaItem>> {
///     let items = library.list().await?;
///     Ok(items.into_iter().max_by_key(|item| item.captured_at))
/// }
/// ```
#[async_trait]
pub trait MediaLibrary: Send + Sync {
    /// Report whether the inventory may currently be read.
    async fn permission_status(&self) -> Result<PermissionStatus>;

    /// Return a full snapshot of the inventory.
    ///
    /// # Errors
    ///
    /// Returns an error if the host query fails.
    async fn list(&self) -> Result<Vec<MediaItem>>;

    /// Read the raw payload behind an item's locator.
    async fn open(&self, item: &MediaItem) -> Result<Bytes>;
}

/// Opaque "the library changed" notification.
///
/// Signals carry no diff and may be coalesced or duplicated upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeSignal;

/// Source of change signals (content observer, PHPhotoLibrary observer, fs watcher).
#[async_trait]
pub trait ChangeSignalSource: Send + Sync {
    /// Open a persistent subscription.
    ///
    /// The subscription stays live until the returned stream is dropped, so
    /// signals that arrive while a backup run executes are still delivered.
    async fn subscribe(&self) -> Result<Box<dyn ChangeSignalStream>>;
}

/// Stream of change signals
#[async_trait]
pub trait ChangeSignalStream: Send {
    /// Wait for the next signal.
    ///
    /// Returns `None` when the source is closed.
    async fn next(&mut self) -> Option<ChangeSignal>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_item_builder() {
        let item = MediaItem::new("img-1", 1_700_000_000_000, "image/jpeg", "/photos/a.jpg")
            .with_geo(GeoPoint::new(48.85, 2.35));

        assert_eq!(item.id, "img-1");
        assert!(item.is_image());
        assert_eq!(item.geo.map(|g| g.latitude), Some(48.85));
    }

    #[test]
    fn test_non_image_item() {
        let item = MediaItem::new("vid-1", 0, "video/mp4", "/photos/a.mp4");
        assert!(!item.is_image());
        assert!(item.geo.is_none());
    }

    #[test]
    fn test_permission_status() {
        assert!(PermissionStatus::Granted.allows_read());
        assert!(PermissionStatus::Limited.allows_read());
        assert!(!PermissionStatus::Denied.allows_read());
    }
}
