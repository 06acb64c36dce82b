//! Scratch Files and Durable Settings
//!
//! The backup core needs two kinds of local storage from the host: a cache
//! directory for transcoded payloads that only live for one upload, and a
//! small key-value store that survives restarts and holds the watermark.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Scratch area for upload payloads
///
/// Everything the core writes lives below [`get_cache_directory`]. The host
/// may wipe that directory between launches:
/// - Desktop: platform cache dir
/// - iOS: `Library/Caches`
/// - Android: `Context.cacheDir`
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn stage(fs: &dyn FileSystemAccess, jpeg: Bytes) -> Result<PathBuf> {
///     let dir = fs.get_cache_directory().await?.join("upload-scratch");
///     fs.create_dir_all(&dir).await?;
///     let path = dir.join("IMG_0001.jpg");
///     fs.write_file(&path, jpeg).await?;
///     Ok(path)
/// }
/// ```
///
/// [`get_cache_directory`]: FileSystemAccess::get_cache_directory
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Root of the scratch area, created on first use
    async fn get_cache_directory(&self) -> Result<PathBuf>;

    /// Create a directory and any missing parents
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Write `data`, replacing any existing file
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// Remove a directory tree. A missing directory is not an error.
    async fn delete_dir_all(&self, path: &Path) -> Result<()>;
}

/// Durable key-value settings
///
/// Backed by UserDefaults / SharedPreferences on mobile and a SQLite table
/// on desktop. Keys are namespaced by the caller (`media_backup.*`).
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SettingsStore;
///
/// async fn save_cursor(store: &dyn SettingsStore, at: i64) -> Result<()> {
///     let mut tx = store.begin_transaction().await?;
///     tx.set_i64("media_backup.lastUploadedAt", at).await?;
///     tx.commit().await
/// }
/// ```
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    async fn set_i64(&self, key: &str, value: i64) -> Result<()>;

    /// Returns `None` for a missing key and an error for a non-integer value
    async fn get_i64(&self, key: &str) -> Result<Option<i64>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Begin a transaction for atomic updates
    ///
    /// Nothing is visible to readers until [`SettingsTransaction::commit`].
    /// Dropping the transaction without committing discards its changes.
    async fn begin_transaction(&self) -> Result<Box<dyn SettingsTransaction + Send>>;
}

/// Staged settings writes, applied all at once on commit
#[async_trait]
pub trait SettingsTransaction: Send {
    async fn set_string(&mut self, key: &str, value: &str) -> Result<()>;

    async fn set_i64(&mut self, key: &str, value: i64) -> Result<()>;

    async fn delete(&mut self, key: &str) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
