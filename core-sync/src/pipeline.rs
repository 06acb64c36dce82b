//! # Upload Pipeline
//!
//! Drives one [`UploadTask`] through transform and transport and turns the
//! result into exactly one [`UploadOutcome`].
//!
//! Stage errors never escape: a transform or transport failure becomes a
//! `Failed` outcome carrying the matching [`FailureReason`]. The scratch
//! artifact is removed whether or not the upload succeeded.

use crate::config::SyncConfig;
use crate::error::{TransformError, TransportError};
use crate::task::{FailureReason, UploadOutcome, UploadTask};
use crate::transform::{ImageTransform, Transformer};
use crate::transport::UploadTransport;
use crate::Result;
use bridge_traits::{FileSystemAccess, HttpClient, MediaItem, MediaLibrary};
use core_runtime::logging::strip_path;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub struct UploadPipeline {
    transformer: Transformer,
    transport: UploadTransport,
}

impl UploadPipeline {
    pub fn new(transformer: Transformer, transport: UploadTransport) -> Self {
        Self {
            transformer,
            transport,
        }
    }

    pub fn from_config(
        config: &SyncConfig,
        library: Arc<dyn MediaLibrary>,
        file_system: Arc<dyn FileSystemAccess>,
        http_client: Arc<dyn HttpClient>,
    ) -> Self {
        Self::new(
            Transformer::new(library, file_system, ImageTransform::from_config(config))
                .with_namespace(config.namespace.clone()),
            UploadTransport::from_config(http_client, config),
        )
    }

    /// Clears scratch payloads from an earlier run. Failures are only logged.
    pub async fn purge_scratch(&self) {
        if let Err(e) = self.transformer.purge_scratch().await {
            warn!(error = %e, "Failed to purge upload scratch area");
        }
    }

    /// Runs `task` to a terminal state.
    ///
    /// # Errors
    ///
    /// Only `SyncError::InvalidStateTransition`, when `task` was already
    /// dispatched. Upload failures are reported through the outcome.
    #[instrument(skip(self, task), fields(item_id = %task.item.id))]
    pub async fn execute(&self, task: &mut UploadTask) -> Result<UploadOutcome> {
        task.start()?;

        match self.deliver(&task.item).await {
            Ok(()) => {
                debug!("Upload succeeded");
                task.succeed()
            }
            Err(reason) => task.fail(reason),
        }
    }

    async fn deliver(&self, item: &MediaItem) -> std::result::Result<(), FailureReason> {
        let prepared = self
            .transformer
            .prepare(item)
            .await
            .map_err(|e| transform_failed(item, e))?;

        let sent = match self.transformer.payload(&prepared).await {
            Ok(payload) => self
                .transport
                .send(item, &prepared, payload)
                .await
                .map_err(|e| transport_failed(item, e)),
            Err(e) => Err(transform_failed(item, e)),
        };

        self.transformer.discard(&prepared).await;
        sent
    }
}

fn transform_failed(item: &MediaItem, err: TransformError) -> FailureReason {
    warn!(
        item_id = %item.id,
        locator = %strip_path(&item.locator),
        mime = %item.mime_type,
        error = %err,
        "Transform failed"
    );
    FailureReason::from(&err)
}

fn transport_failed(item: &MediaItem, err: TransportError) -> FailureReason {
    warn!(item_id = %item.id, error = %err, "Upload failed");
    FailureReason::from(&err)
}
