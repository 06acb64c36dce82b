//! File System Access Implementation using Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::FileSystemAccess,
};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Tokio-based file system implementation
///
/// The cache directory defaults to the platform cache dir (`dirs::cache_dir`)
/// with a per-application subfolder, falling back to the temp dir.
pub struct TokioFileSystem {
    cache_dir: PathBuf,
}

impl TokioFileSystem {
    pub const APP_DIR: &'static str = "media-backup-core";

    /// Create a new file system accessor with the default cache directory
    pub fn new() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(Self::APP_DIR);

        Self { cache_dir }
    }

    /// Create a file system accessor rooted at a custom cache directory
    pub fn with_cache_directory(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }
}

impl Default for TokioFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystemAccess for TokioFileSystem {
    async fn get_cache_directory(&self) -> Result<PathBuf> {
        if !fs::try_exists(&self.cache_dir).await.unwrap_or(false) {
            fs::create_dir_all(&self.cache_dir)
                .await
                .map_err(BridgeError::Io)?;
            debug!(path = ?self.cache_dir, "Created cache directory");
        }
        Ok(self.cache_dir.clone())
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).await.map_err(BridgeError::Io)?;
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        let data = fs::read(path).await.map_err(BridgeError::Io)?;
        debug!(path = ?path, size = data.len(), "Read file");
        Ok(Bytes::from(data))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent).await?;
        }

        fs::write(path, data.as_ref())
            .await
            .map_err(BridgeError::Io)?;
        debug!(path = ?path, size = data.len(), "Wrote file");
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).await.map_err(BridgeError::Io)?;
        debug!(path = ?path, "Deleted file");
        Ok(())
    }

    async fn delete_dir_all(&self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path).await {
            Ok(()) => {
                debug!(path = ?path, "Deleted directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn scratch_root(name: &str) -> PathBuf {
        env::temp_dir().join(format!("mbc-fs-{}-{}", name, std::process::id()))
    }

    #[tokio::test]
    async fn test_cache_directory_is_created() {
        let root = scratch_root("cache");
        let _ = fs::remove_dir_all(&root).await;
        let fs_access = TokioFileSystem::with_cache_directory(root.clone());

        let cache_dir = fs_access.get_cache_directory().await.unwrap();
        assert_eq!(cache_dir, root);
        assert!(root.is_dir());

        let _ = fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let root = scratch_root("rw");
        let fs_access = TokioFileSystem::with_cache_directory(root.clone());
        let path = root.join("nested").join("item.jpg");

        let data = Bytes::from_static(b"jpeg-bytes");
        fs_access.write_file(&path, data.clone()).await.unwrap();
        assert_eq!(fs_access.read_file(&path).await.unwrap(), data);

        fs_access.delete_file(&path).await.unwrap();
        assert!(!path.exists());

        let _ = fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_delete_missing_file_fails() {
        let fs_access = TokioFileSystem::with_cache_directory(scratch_root("missing"));
        let result = fs_access
            .delete_file(&scratch_root("missing").join("nope.bin"))
            .await;
        assert!(matches!(result, Err(BridgeError::Io(_))));
    }

    #[tokio::test]
    async fn test_delete_dir_all_tolerates_missing() {
        let root = scratch_root("purge");
        let fs_access = TokioFileSystem::with_cache_directory(root.clone());
        fs_access
            .write_file(&root.join("scratch").join("a.jpg"), Bytes::from_static(b"x"))
            .await
            .unwrap();

        fs_access.delete_dir_all(&root.join("scratch")).await.unwrap();
        assert!(!root.join("scratch").exists());
        fs_access.delete_dir_all(&root.join("scratch")).await.unwrap();

        let _ = fs::remove_dir_all(&root).await;
    }
}
