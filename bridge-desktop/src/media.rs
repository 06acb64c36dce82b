//! Folder-backed media library and change sources

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    media::{
        ChangeSignal, ChangeSignalSource, ChangeSignalStream, GeoPoint, MediaItem, MediaLibrary,
        PermissionStatus,
    },
};
use bytes::Bytes;
use chrono::NaiveDate;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Media library over a directory tree (e.g. `~/Pictures`).
///
/// Every image or video file below the root is an item. The item id is the
/// path relative to the root with `/` separators, so it stays stable across
/// rescans. Capture time comes from EXIF `DateTimeOriginal` when present and
/// falls back to the file modification time.
pub struct FolderMediaLibrary {
    root: PathBuf,
    read_exif: bool,
}

impl FolderMediaLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            read_exif: true,
        }
    }

    /// Default library rooted at the user's picture directory.
    pub fn pictures() -> Result<Self> {
        dirs::picture_dir()
            .map(Self::new)
            .ok_or_else(|| BridgeError::NotAvailable("No picture directory on this host".into()))
    }

    /// Skip EXIF parsing and use file modification times only.
    pub fn without_exif(mut self) -> Self {
        self.read_exif = false;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scan(root: &Path, read_exif: bool) -> Result<Vec<MediaItem>> {
        let mut items = Vec::new();

        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    if entry_is_root(&err, root) {
                        return Err(walk_error(err));
                    }
                    warn!(error = %err, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let mime = mime_guess::from_path(path).first_raw().unwrap_or_default();
            if !(mime.starts_with("image/") || mime.starts_with("video/")) {
                continue;
            }

            let Some(id) = relative_id(root, path) else {
                continue;
            };

            let modified_at = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or_default();

            let exif = if read_exif && mime.starts_with("image/") {
                read_exif_fields(path)
            } else {
                ExifFields::default()
            };

            let mut item = MediaItem::new(
                id,
                exif.captured_at.unwrap_or(modified_at),
                mime,
                path.to_string_lossy(),
            );
            item.geo = exif.geo;
            items.push(item);
        }

        debug!(root = ?root, count = items.len(), "Scanned media folder");
        Ok(items)
    }

    /// Cheap change fingerprint: file count and newest modification time.
    fn fingerprint(root: &Path) -> (usize, i64) {
        WalkDir::new(root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .fold((0, 0), |(count, newest), entry| {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or_default();
                (count + 1, newest.max(modified))
            })
    }
}

fn entry_is_root(err: &walkdir::Error, root: &Path) -> bool {
    err.depth() == 0 || err.path() == Some(root)
}

fn walk_error(err: walkdir::Error) -> BridgeError {
    match err.io_error().map(|e| e.kind()) {
        Some(ErrorKind::PermissionDenied) => BridgeError::PermissionDenied(err.to_string()),
        _ => BridgeError::OperationFailed(format!("Failed to scan media folder: {}", err)),
    }
}

fn relative_id(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

#[derive(Debug, Default)]
struct ExifFields {
    captured_at: Option<i64>,
    geo: Option<GeoPoint>,
}

fn read_exif_fields(path: &Path) -> ExifFields {
    let Ok(file) = std::fs::File::open(path) else {
        return ExifFields::default();
    };
    let mut reader = std::io::BufReader::new(file);
    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(err) => {
            debug!(path = ?path, error = %err, "No EXIF data");
            return ExifFields::default();
        }
    };

    ExifFields {
        captured_at: exif_capture_millis(&exif),
        geo: exif_geo(&exif),
    }
}

/// EXIF timestamps carry no zone; they are interpreted as UTC.
fn exif_capture_millis(exif: &exif::Exif) -> Option<i64> {
    let field = exif.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)?;
    let exif::Value::Ascii(ref values) = field.value else {
        return None;
    };
    let dt = exif::DateTime::from_ascii(values.first()?).ok()?;
    NaiveDate::from_ymd_opt(dt.year as i32, dt.month as u32, dt.day as u32)?
        .and_hms_opt(dt.hour as u32, dt.minute as u32, dt.second as u32)
        .map(|naive| naive.and_utc().timestamp_millis())
}

fn exif_geo(exif: &exif::Exif) -> Option<GeoPoint> {
    let latitude = exif_degrees(exif, exif::Tag::GPSLatitude, exif::Tag::GPSLatitudeRef, b'S')?;
    let longitude = exif_degrees(exif, exif::Tag::GPSLongitude, exif::Tag::GPSLongitudeRef, b'W')?;
    Some(GeoPoint::new(latitude, longitude))
}

fn exif_degrees(
    exif: &exif::Exif,
    tag: exif::Tag,
    ref_tag: exif::Tag,
    negative: u8,
) -> Option<f64> {
    let field = exif.get_field(tag, exif::In::PRIMARY)?;
    let exif::Value::Rational(ref dms) = field.value else {
        return None;
    };
    if dms.len() < 3 {
        return None;
    }
    let degrees = dms[0].to_f64() + dms[1].to_f64() / 60.0 + dms[2].to_f64() / 3600.0;

    let hemisphere = exif
        .get_field(ref_tag, exif::In::PRIMARY)
        .and_then(|f| match &f.value {
            exif::Value::Ascii(values) => values.first().and_then(|v| v.first().copied()),
            _ => None,
        });

    Some(if hemisphere == Some(negative) {
        -degrees
    } else {
        degrees
    })
}

#[async_trait]
impl MediaLibrary for FolderMediaLibrary {
    async fn permission_status(&self) -> Result<PermissionStatus> {
        match tokio::fs::read_dir(&self.root).await {
            Ok(_) => Ok(PermissionStatus::Granted),
            Err(err) if err.kind() == ErrorKind::PermissionDenied => Ok(PermissionStatus::Denied),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(BridgeError::NotAvailable(
                format!("Media folder does not exist: {}", self.root.display()),
            )),
            Err(err) => Err(BridgeError::Io(err)),
        }
    }

    async fn list(&self) -> Result<Vec<MediaItem>> {
        let root = self.root.clone();
        let read_exif = self.read_exif;
        tokio::task::spawn_blocking(move || Self::scan(&root, read_exif))
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Folder scan task failed: {}", e)))?
    }

    async fn open(&self, item: &MediaItem) -> Result<Bytes> {
        let data = tokio::fs::read(&item.locator).await.map_err(BridgeError::Io)?;
        Ok(Bytes::from(data))
    }
}

/// Change source driven by explicit `notify` calls.
///
/// Hosts that already own a file watcher, or tests, push signals through it.
#[derive(Clone)]
pub struct ManualChangeSource {
    sender: broadcast::Sender<ChangeSignal>,
}

impl ManualChangeSource {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    /// Emit a signal to every live subscription. Returns the receiver count.
    pub fn notify(&self) -> usize {
        self.sender.send(ChangeSignal).unwrap_or(0)
    }
}

impl Default for ManualChangeSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeSignalSource for ManualChangeSource {
    async fn subscribe(&self) -> Result<Box<dyn ChangeSignalStream>> {
        Ok(Box::new(BroadcastSignalStream {
            receiver: self.sender.subscribe(),
        }))
    }
}

struct BroadcastSignalStream {
    receiver: broadcast::Receiver<ChangeSignal>,
}

#[async_trait]
impl ChangeSignalStream for BroadcastSignalStream {
    async fn next(&mut self) -> Option<ChangeSignal> {
        match self.receiver.recv().await {
            Ok(signal) => Some(signal),
            // Lagged receivers coalesce into one signal.
            Err(broadcast::error::RecvError::Lagged(_)) => Some(ChangeSignal),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

/// Change source that polls a media folder and signals when its fingerprint moves.
pub struct PollingChangeSource {
    library: Arc<FolderMediaLibrary>,
    interval: Duration,
}

impl PollingChangeSource {
    pub fn new(library: Arc<FolderMediaLibrary>, interval: Duration) -> Self {
        Self { library, interval }
    }
}

#[async_trait]
impl ChangeSignalSource for PollingChangeSource {
    async fn subscribe(&self) -> Result<Box<dyn ChangeSignalStream>> {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let root = self.library.root().to_path_buf();
        let interval = self.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut last: Option<(usize, i64)> = None;
            loop {
                ticker.tick().await;
                let scan_root = root.clone();
                let Ok(current) =
                    tokio::task::spawn_blocking(move || FolderMediaLibrary::fingerprint(&scan_root))
                        .await
                else {
                    break;
                };

                let changed = last.is_some_and(|previous| previous != current);
                last = Some(current);
                if changed && tx.send(ChangeSignal).await.is_err() {
                    break;
                }
                if tx.is_closed() {
                    break;
                }
            }
            debug!(root = ?root, "Folder polling stopped");
        });

        Ok(Box::new(ChannelSignalStream { receiver: rx }))
    }
}

struct ChannelSignalStream {
    receiver: tokio::sync::mpsc::Receiver<ChangeSignal>,
}

#[async_trait]
impl ChangeSignalStream for ChannelSignalStream {
    async fn next(&mut self) -> Option<ChangeSignal> {
        self.receiver.recv().await
    }
}
