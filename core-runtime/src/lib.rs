//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the media backup core:
//! - Logging and tracing infrastructure
//! - Configuration management and bridge wiring
//! - Event bus for run progress
//!
//! ## Overview
//!
//! Every other core crate depends on this one for its configuration type,
//! its logging conventions and the broadcast channel that carries backup
//! progress to observers.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CoreConfig, CoreConfigBuilder, FeatureFlags};
pub use error::{Error, Result};
pub use events::{BackupEvent, CoreEvent, EventBus, EventStream, SchedulerEvent, SkipReason};
