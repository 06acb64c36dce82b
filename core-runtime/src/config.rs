//! # Core Configuration Module
//!
//! Provides configuration management for the media backup core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds every bridge the backup engine talks to. It enforces
//! fail-fast validation so a missing capability surfaces at startup rather
//! than in the middle of a background run.
//!
//! ## Required Dependencies
//!
//! - `MediaLibrary` - The inventory being backed up (always host-provided)
//! - `SettingsStore` - Watermark persistence
//!
//! ## Dependencies with desktop defaults
//!
//! - `HttpClient` - Upload transport (desktop default: reqwest)
//! - `FileSystemAccess` - Scratch files (desktop default: tokio fs)
//! - `BackgroundExecutor` - Unique-name work scheduling (desktop default: tokio tasks)
//! - `Clock` - Run timing (default: system clock)
//!
//! When the `desktop-shims` feature is disabled every one of these must be
//! injected explicitly.
//!
//! ## Optional Dependencies
//!
//! - `ChangeSignalSource` - Library change notifications (needed for auto backup)
//! - `LoggerSink` - Host log forwarding
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{FolderMediaLibrary, ManualChangeSource};
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/backup.db")
//!     .cache_dir("/path/to/cache")
//!     .media_library(Arc::new(FolderMediaLibrary::new("/path/to/Pictures")))
//!     .change_source(Arc::new(ManualChangeSource::new()))
//!     .enable_auto_backup(true)
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // No media library was provided
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/backup.db")
//!     .cache_dir("/path/to/cache")
//!     .build()
//!     .expect("Should fail - missing media library");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{
    BackgroundExecutor, ChangeSignalSource, Clock, FileSystemAccess, HttpClient, LoggerSink,
    MediaLibrary, SettingsStore, SystemClock,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Core configuration for the media backup core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite database holding the watermark
    pub database_path: PathBuf,

    /// Directory for scratch files produced by the transform stage
    pub cache_dir: PathBuf,

    /// Device media inventory
    pub media_library: Arc<dyn MediaLibrary>,

    /// Watermark persistence
    pub settings_store: Arc<dyn SettingsStore>,

    /// Upload transport
    pub http_client: Arc<dyn HttpClient>,

    /// Scratch file access
    pub file_system: Arc<dyn FileSystemAccess>,

    /// Unique-name work scheduling
    pub background_executor: Arc<dyn BackgroundExecutor>,

    pub clock: Arc<dyn Clock>,

    /// Library change notifications (optional)
    pub change_source: Option<Arc<dyn ChangeSignalSource>>,

    /// Host log forwarding (optional)
    pub logger_sink: Option<Arc<dyn LoggerSink>>,

    /// Features flags
    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("cache_dir", &self.cache_dir)
            .field("media_library", &"MediaLibrary { ... }")
            .field("settings_store", &"SettingsStore { ... }")
            .field("http_client", &"HttpClient { ... }")
            .field("file_system", &"FileSystemAccess { ... }")
            .field("background_executor", &"BackgroundExecutor { ... }")
            .field(
                "change_source",
                &self
                    .change_source
                    .as_ref()
                    .map(|_| "ChangeSignalSource { ... }"),
            )
            .field(
                "logger_sink",
                &self.logger_sink.as_ref().map(|_| "LoggerSink { ... }"),
            )
            .field("features", &self.features)
            .finish()
    }
}

/// Feature flags control optional functionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureFlags {
    /// Start the trigger scheduler on startup (requires ChangeSignalSource)
    pub enable_auto_backup: bool,
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Database path is not empty
    /// - Cache directory is not empty
    /// - Feature flags are consistent with available bridges
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("Cache directory cannot be empty".to_string()));
        }

        if self.features.enable_auto_backup && self.change_source.is_none() {
            return Err(Error::Config(
                "Auto backup enabled but no ChangeSignalSource provided. \
                 Disable the feature or inject a ChangeSignalSource implementation."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

fn media_library_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "MediaLibrary".to_string(),
        message: "MediaLibrary implementation is required to enumerate the device inventory. \
                 Desktop: inject bridge_desktop::FolderMediaLibrary pointing at a photo folder. \
                 Mobile: inject the platform photo library (PhotoKit/MediaStore)."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn capability_missing(capability: &str, purpose: &str, desktop_default: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: format!(
            "{capability} implementation is required for {purpose}. \
             Desktop: ensure the 'desktop-shims' feature is enabled to use the default {desktop_default}. \
             Mobile: inject the platform-native implementation."
        ),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_settings_store(database_path: &Path) -> Result<Arc<dyn SettingsStore>> {
    use bridge_desktop::SqliteSettingsStore;
    use std::thread;
    use tokio::runtime::{Handle, Runtime};

    let init_store = |path: PathBuf| -> Result<_> {
        let runtime = Runtime::new().map_err(|e| {
            Error::Internal(format!(
                "Failed to create Tokio runtime for default settings store: {}",
                e
            ))
        })?;

        runtime
            .block_on(SqliteSettingsStore::new(path))
            .map_err(|e| {
                Error::Internal(format!("Failed to initialize default SettingsStore: {}", e))
            })
    };

    // block_on panics inside a runtime, so hop to a plain thread there
    let path = database_path.to_path_buf();
    let store = match Handle::try_current() {
        Ok(_) => thread::spawn(move || init_store(path))
            .join()
            .map_err(|_| {
                Error::Internal(
                    "Worker thread panicked while creating default SettingsStore".to_string(),
                )
            })??,
        Err(_) => init_store(path)?,
    };

    let store: Arc<dyn SettingsStore> = Arc::new(store);
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_settings_store(_database_path: &Path) -> Result<Arc<dyn SettingsStore>> {
    Err(capability_missing(
        "SettingsStore",
        "watermark persistence",
        "SqliteSettingsStore",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    let client = bridge_desktop::ReqwestHttpClient::new()
        .map_err(|e| Error::Internal(format!("Failed to initialize default HttpClient: {}", e)))?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(capability_missing(
        "HttpClient",
        "uploading media",
        "ReqwestHttpClient",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system(cache_dir: &Path) -> Result<Arc<dyn FileSystemAccess>> {
    Ok(Arc::new(
        bridge_desktop::TokioFileSystem::with_cache_directory(cache_dir.to_path_buf()),
    ))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system(_cache_dir: &Path) -> Result<Arc<dyn FileSystemAccess>> {
    Err(capability_missing(
        "FileSystemAccess",
        "scratch files",
        "TokioFileSystem",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_background_executor() -> Result<Arc<dyn BackgroundExecutor>> {
    Ok(Arc::new(bridge_desktop::TokioBackgroundExecutor::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_background_executor() -> Result<Arc<dyn BackgroundExecutor>> {
    Err(capability_missing(
        "BackgroundExecutor",
        "scheduling backup runs",
        "TokioBackgroundExecutor",
    ))
}

/// Builder for constructing [`CoreConfig`] instances.
///
/// Call [`build()`](CoreConfigBuilder::build) to resolve defaults and
/// validate the result.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    media_library: Option<Arc<dyn MediaLibrary>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    background_executor: Option<Arc<dyn BackgroundExecutor>>,
    clock: Option<Arc<dyn Clock>>,
    change_source: Option<Arc<dyn ChangeSignalSource>>,
    logger_sink: Option<Arc<dyn LoggerSink>>,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    /// Sets the database path.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder()
    ///     .database_path("/path/to/backup.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the cache directory. Scratch files live in a subdirectory.
    pub fn cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    /// Sets the media library (required).
    pub fn media_library(mut self, library: Arc<dyn MediaLibrary>) -> Self {
        self.media_library = Some(library);
        self
    }

    /// Sets the settings store used for the watermark.
    ///
    /// If not provided, a SQLite store at `database_path` is used when the
    /// `desktop-shims` feature is enabled.
    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    /// Sets the HTTP client implementation.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the file system access implementation.
    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    /// Sets the background executor implementation.
    pub fn background_executor(mut self, executor: Arc<dyn BackgroundExecutor>) -> Self {
        self.background_executor = Some(executor);
        self
    }

    /// Overrides the clock. Tests use `ManualClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn change_source(mut self, source: Arc<dyn ChangeSignalSource>) -> Self {
        self.change_source = Some(source);
        self
    }

    pub fn logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    /// Enables or disables automatic backup on library changes.
    ///
    /// Requires a `ChangeSignalSource` to be provided.
    ///
    /// Default: false
    pub fn enable_auto_backup(mut self, enabled: bool) -> Self {
        self.features.enable_auto_backup = enabled;
        self
    }

    /// Sets all feature flags at once.
    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// - `Error::Config` if a path is missing or a feature flag has no bridge
    /// - `Error::CapabilityMissing` if a bridge is missing and has no default
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let cache_dir = self.cache_dir.ok_or_else(|| {
            Error::Config("Cache directory is required. Use .cache_dir() to set it.".to_string())
        })?;

        let media_library = self.media_library.ok_or_else(media_library_missing_error)?;

        let settings_store = match self.settings_store {
            Some(store) => store,
            None => provide_default_settings_store(&database_path)?,
        };

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system(&cache_dir)?,
        };

        let background_executor = match self.background_executor {
            Some(executor) => executor,
            None => provide_default_background_executor()?,
        };

        let config = CoreConfig {
            database_path,
            cache_dir,
            media_library,
            settings_store,
            http_client,
            file_system,
            background_executor,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            change_source: self.change_source,
            logger_sink: self.logger_sink,
            features: self.features,
        };

        config.validate()?;

        Ok(config)
    }
}
