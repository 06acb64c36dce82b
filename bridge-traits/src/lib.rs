//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the backup core and platform-specific
//! implementations. Each trait represents a capability that the core requires but
//! that must be implemented differently per platform (desktop, iOS, Android).
//!
//! ## Traits
//!
//! ### Media
//! - [`MediaLibrary`](media::MediaLibrary) - Inventory snapshots, payload reads, permission state
//! - [`ChangeSignalSource`](media::ChangeSignalSource) - Persistent "library changed" subscription
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - Single-attempt async HTTP with multipart bodies
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Scratch files in the cache directory
//!
//! ### Storage
//! - [`SettingsStore`](storage::SettingsStore) - Durable key-value storage with transactions
//!
//! ### Platform Integration
//! - [`BackgroundExecutor`](background::BackgroundExecutor) - Unique one-shot work with replace policy
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ Available |
//! | iOS      | TBD                 | 📋 Planned |
//! | Android  | TBD                 | 📋 Planned |
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with descriptive errors when a required capability is missing:
//!
//! ```ignore
//! let library = config.media_library
//!     .ok_or_else(|| Error::CapabilityMissing {
//!         capability: "MediaLibrary".to_string(),
//!         message: "No media library provided. \
//!                  Desktop: use FolderMediaLibrary. \
//!                  Mobile: inject the platform gallery adapter.".to_string()
//!     })?;
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should convert platform-specific errors to `BridgeError`
//! and keep the failing path or key in the message.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds so implementations can be
//! shared across concurrently running upload tasks.

pub mod background;
pub mod error;
pub mod http;
pub mod media;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use background::{
    BackgroundExecutor, ExistingWorkPolicy, TaskConstraints, TaskHandler, TaskId, TaskStatus,
};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, MultipartForm};
pub use media::{
    ChangeSignal, ChangeSignalSource, ChangeSignalStream, GeoPoint, MediaItem, MediaLibrary,
    PermissionStatus,
};
pub use storage::{FileSystemAccess, SettingsStore, SettingsTransaction};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
