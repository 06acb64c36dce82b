//! Workspace umbrella crate.
//!
//! Exposes the feature flags that map onto the individual workspace crates.
//! Host applications can depend on `media-backup-core` and enable
//! `desktop-shims` to get the engine with the desktop bridge defaults.

#[cfg(feature = "desktop-shims")]
pub use core_service::{bootstrap_desktop, CoreError, CoreService};
