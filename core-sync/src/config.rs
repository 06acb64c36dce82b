//! Backup engine configuration.

use crate::{Result, SyncError};
use std::time::Duration;

/// Newest items uploaded per run.
pub const DEFAULT_BATCH_CAP: usize = 50;

/// Quiet period after the last change signal before a run is enqueued.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(3);

/// Unique work name and settings namespace.
pub const DEFAULT_TASK_NAME: &str = "media_backup";

/// Longest side of a transcoded image, in pixels.
pub const DEFAULT_MAX_DIMENSION: u32 = 1920;

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// How far the watermark moves once a run's barrier fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatermarkPolicy {
    /// Advance to the newest attempted item, whatever its outcome.
    #[default]
    AdvanceOnAttempt,
    /// Hold at the oldest failed item so it is selected again by timestamp.
    AdvanceOnSuccess,
}

/// Sync configuration for the backup engine
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upload endpoint receiving multipart posts
    pub endpoint_url: String,

    /// Identity sent with every upload as `userId`
    pub user_id: String,

    /// Maximum items per run
    pub batch_cap: usize,

    pub debounce: Duration,

    /// Unique name for the scheduled work
    pub task_name: String,

    /// Settings key prefix for the watermark
    pub namespace: String,

    pub max_dimension: u32,

    /// JPEG quality (1-100)
    pub jpeg_quality: u8,

    /// Per-request upload deadline
    pub upload_timeout: Duration,

    /// Cap on simultaneous uploads; `None` dispatches the whole batch at once
    pub max_concurrent_uploads: Option<usize>,

    pub watermark_policy: WatermarkPolicy,

    /// Re-select failed items by id on later runs
    pub retry_failed: bool,

    /// Skip items already recorded as uploaded at the watermark boundary
    pub skip_uploaded: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            user_id: String::new(),
            batch_cap: DEFAULT_BATCH_CAP,
            debounce: DEFAULT_DEBOUNCE,
            task_name: DEFAULT_TASK_NAME.to_string(),
            namespace: DEFAULT_TASK_NAME.to_string(),
            max_dimension: DEFAULT_MAX_DIMENSION,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            max_concurrent_uploads: None,
            watermark_policy: WatermarkPolicy::default(),
            retry_failed: true,
            skip_uploaded: true,
        }
    }
}

impl SyncConfig {
    pub fn new(endpoint_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn with_batch_cap(mut self, cap: usize) -> Self {
        self.batch_cap = cap;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_task_name(mut self, name: impl Into<String>) -> Self {
        self.task_name = name.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_max_dimension(mut self, pixels: u32) -> Self {
        self.max_dimension = pixels;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_uploads(mut self, limit: usize) -> Self {
        self.max_concurrent_uploads = Some(limit);
        self
    }

    pub fn with_watermark_policy(mut self, policy: WatermarkPolicy) -> Self {
        self.watermark_policy = policy;
        self
    }

    pub fn with_retry_failed(mut self, enabled: bool) -> Self {
        self.retry_failed = enabled;
        self
    }

    pub fn with_skip_uploaded(mut self, enabled: bool) -> Self {
        self.skip_uploaded = enabled;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.endpoint_url.trim().is_empty() {
            return Err(SyncError::Config("Upload endpoint URL cannot be empty".to_string()));
        }

        if !self.endpoint_url.starts_with("http://") && !self.endpoint_url.starts_with("https://") {
            return Err(SyncError::Config(format!(
                "Upload endpoint must be an http(s) URL, got '{}'",
                self.endpoint_url
            )));
        }

        if self.user_id.trim().is_empty() {
            return Err(SyncError::Config("User id cannot be empty".to_string()));
        }

        if self.batch_cap == 0 {
            return Err(SyncError::Config(
                "Batch cap must be greater than 0".to_string(),
            ));
        }

        if self.task_name.is_empty() || self.namespace.is_empty() {
            return Err(SyncError::Config(
                "Task name and namespace cannot be empty".to_string(),
            ));
        }

        if self.max_dimension == 0 {
            return Err(SyncError::Config(
                "Max dimension must be greater than 0".to_string(),
            ));
        }

        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(SyncError::Config(format!(
                "JPEG quality must be between 1 and 100, got {}",
                self.jpeg_quality
            )));
        }

        if self.upload_timeout.is_zero() {
            return Err(SyncError::Config(
                "Upload timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_uploads == Some(0) {
            return Err(SyncError::Config(
                "Concurrent upload limit must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
