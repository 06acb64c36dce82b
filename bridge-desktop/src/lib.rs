//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `FileSystemAccess` using `tokio::fs`
//! - `SettingsStore` using a SQLite-backed key-value table
//! - `BackgroundExecutor` using Tokio tasks with per-name run locks
//! - `MediaLibrary` over a photo folder (`walkdir` + EXIF via `kamadak-exif`)
//! - `ChangeSignalSource` as a manual broadcast source or a folder poller
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{FolderMediaLibrary, ReqwestHttpClient, SqliteSettingsStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let library = FolderMediaLibrary::pictures()?;
//!     let http = ReqwestHttpClient::new()?;
//!     let settings = SqliteSettingsStore::new("backup.db".into()).await?;
//!     // Hand these to CoreConfig::builder()
//!     Ok(())
//! }
//! ```

mod background;
mod filesystem;
mod http;
mod media;
mod settings;

pub use background::TokioBackgroundExecutor;
pub use filesystem::TokioFileSystem;
pub use http::ReqwestHttpClient;
pub use media::{FolderMediaLibrary, ManualChangeSource, PollingChangeSource};
pub use settings::SqliteSettingsStore;
