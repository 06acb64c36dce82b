//! # Watermark Store
//!
//! Durable cursor recording how far back the library has been backed up.
//!
//! ## Overview
//!
//! The watermark is the capture timestamp of the newest item a completed run
//! attempted, plus the ids already uploaded at that boundary. It is read at
//! the start of every run and written once, after the run's completion
//! barrier fires. A crash mid-run leaves it untouched so the whole candidate
//! set is recomputed next time.
//!
//! ## Persistence
//!
//! Values live in the host `SettingsStore` under a namespace:
//!
//! | Key                    | Value                          |
//! |------------------------|--------------------------------|
//! | `<ns>.lastUploadedAt`  | epoch millis (`i64`)           |
//! | `<ns>.uploadedIds`     | JSON array of item ids         |
//! | `<ns>.retryIds`        | JSON array of failed item ids  |
//! | `<ns>.skippedIds`      | JSON array of unsendable ids   |
//!
//! Writes go through a settings transaction so a watermark is never
//! half-written.

use crate::barrier::BatchSummary;
use crate::config::WatermarkPolicy;
use crate::{Result, SyncError};
use bridge_traits::{MediaItem, SettingsStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, instrument};

const LAST_UPLOADED_AT: &str = "lastUploadedAt";
const UPLOADED_IDS: &str = "uploadedIds";
const RETRY_IDS: &str = "retryIds";
const SKIPPED_IDS: &str = "skippedIds";

/// Persisted backup cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    /// Capture time of the newest attempted item, epoch millis
    pub last_uploaded_at: i64,
    /// Ids uploaded at or above `last_uploaded_at`
    pub uploaded_ids: BTreeSet<String>,
    /// Ids whose last upload failed and should be selected again
    pub retry_ids: BTreeSet<String>,
    /// Ids at or above `last_uploaded_at` whose payload cannot be transcoded
    #[serde(default)]
    pub skipped_ids: BTreeSet<String>,
}

impl Watermark {
    pub fn new(last_uploaded_at: i64) -> Self {
        Self {
            last_uploaded_at,
            ..Self::default()
        }
    }

    /// Whether nothing has ever been recorded.
    pub fn is_initial(&self) -> bool {
        self.last_uploaded_at == 0
            && self.uploaded_ids.is_empty()
            && self.retry_ids.is_empty()
            && self.skipped_ids.is_empty()
    }

    /// Moves the boundary forward. Earlier timestamps are ignored.
    pub fn advance_to(&mut self, captured_at: i64) {
        self.last_uploaded_at = self.last_uploaded_at.max(captured_at);
    }

    /// Computes the watermark to persist once a run has fully reported.
    ///
    /// `inventory` is the snapshot the run selected from; it supplies capture
    /// times for ids recorded by earlier runs and tells which retry ids still
    /// exist on the device.
    ///
    /// Failures that cannot succeed on another attempt (see
    /// [`FailureReason::is_retryable`]) neither hold the watermark nor enter
    /// `retry_ids`; they are recorded in `skipped_ids` so the inclusive
    /// boundary does not select them again.
    ///
    /// [`FailureReason::is_retryable`]: crate::task::FailureReason::is_retryable
    pub fn after_run(
        &self,
        summary: &BatchSummary,
        inventory: &[MediaItem],
        policy: WatermarkPolicy,
        retry_failed: bool,
    ) -> Watermark {
        let mut next = Watermark::new(self.last_uploaded_at);

        let target = match policy {
            WatermarkPolicy::AdvanceOnAttempt => summary.max_attempted_at,
            WatermarkPolicy::AdvanceOnSuccess => summary
                .failed_items
                .iter()
                .filter(|failed| failed.reason.is_retryable())
                .map(|failed| failed.captured_at)
                .min()
                .or(summary.max_attempted_at),
        };
        if let Some(target) = target {
            next.advance_to(target);
        }

        let captured: HashMap<&str, i64> = inventory
            .iter()
            .map(|item| (item.id.as_str(), item.captured_at))
            .collect();
        let boundary = next.last_uploaded_at;
        let at_or_above = |id: &str| {
            captured
                .get(id)
                .is_some_and(|captured_at| *captured_at >= boundary)
        };

        next.uploaded_ids = self
            .uploaded_ids
            .iter()
            .chain(summary.succeeded_ids.iter())
            .filter(|id| at_or_above(id))
            .cloned()
            .collect();

        next.skipped_ids = self
            .skipped_ids
            .iter()
            .filter(|id| !summary.succeeded_ids.contains(*id))
            .chain(
                summary
                    .failed_items
                    .iter()
                    .filter(|f| !f.reason.is_retryable())
                    .map(|f| &f.item_id),
            )
            .filter(|id| at_or_above(id))
            .cloned()
            .collect();

        if retry_failed {
            // This run's outcome decides the fate of every id it attempted
            let attempted: BTreeSet<&str> = summary
                .succeeded_ids
                .iter()
                .map(String::as_str)
                .chain(summary.failed_items.iter().map(|f| f.item_id.as_str()))
                .collect();
            next.retry_ids = self
                .retry_ids
                .iter()
                .filter(|id| captured.contains_key(id.as_str()) && !attempted.contains(id.as_str()))
                .cloned()
                .chain(
                    summary
                        .failed_items
                        .iter()
                        .filter(|f| f.reason.is_retryable())
                        .map(|f| f.item_id.clone()),
                )
                .collect();
        }

        next
    }
}

/// Reads and writes the watermark on top of a `SettingsStore`.
pub struct WatermarkStore {
    settings: Arc<dyn SettingsStore>,
    namespace: String,
}

impl WatermarkStore {
    pub fn new(settings: Arc<dyn SettingsStore>, namespace: impl Into<String>) -> Self {
        Self {
            settings,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key(&self, name: &str) -> String {
        format!("{}.{}", self.namespace, name)
    }

    async fn read_ids(&self, name: &str) -> Result<BTreeSet<String>> {
        match self.settings.get_string(&self.key(name)).await? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Returns the persisted watermark, or the zero watermark if none exists.
    pub async fn read(&self) -> Result<Watermark> {
        let last_uploaded_at = self
            .settings
            .get_i64(&self.key(LAST_UPLOADED_AT))
            .await?
            .unwrap_or(0);

        Ok(Watermark {
            last_uploaded_at,
            uploaded_ids: self.read_ids(UPLOADED_IDS).await?,
            retry_ids: self.read_ids(RETRY_IDS).await?,
            skipped_ids: self.read_ids(SKIPPED_IDS).await?,
        })
    }

    /// Overwrites the persisted watermark.
    ///
    /// # Errors
    ///
    /// - `SyncError::WatermarkRegression` if `watermark` is older than the stored one
    /// - `SyncError::WatermarkPersist` if the settings transaction fails
    #[instrument(skip(self, watermark), fields(namespace = %self.namespace, at = watermark.last_uploaded_at))]
    pub async fn write(&self, watermark: &Watermark) -> Result<()> {
        let current = self
            .settings
            .get_i64(&self.key(LAST_UPLOADED_AT))
            .await
            .map_err(persist_error)?
            .unwrap_or(0);

        if watermark.last_uploaded_at < current {
            return Err(SyncError::WatermarkRegression {
                current,
                attempted: watermark.last_uploaded_at,
            });
        }

        let uploaded = serde_json::to_string(&watermark.uploaded_ids)?;
        let retry = serde_json::to_string(&watermark.retry_ids)?;
        let skipped = serde_json::to_string(&watermark.skipped_ids)?;

        let mut tx = self.settings.begin_transaction().await.map_err(persist_error)?;
        let staged = async {
            tx.set_i64(&self.key(LAST_UPLOADED_AT), watermark.last_uploaded_at)
                .await?;
            tx.set_string(&self.key(UPLOADED_IDS), &uploaded).await?;
            tx.set_string(&self.key(RETRY_IDS), &retry).await?;
            tx.set_string(&self.key(SKIPPED_IDS), &skipped).await
        }
        .await;

        match staged {
            Ok(()) => tx.commit().await.map_err(persist_error)?,
            Err(e) => {
                let _ = tx.rollback().await;
                return Err(persist_error(e));
            }
        }

        debug!(
            uploaded = watermark.uploaded_ids.len(),
            retry = watermark.retry_ids.len(),
            "Watermark written"
        );
        Ok(())
    }

    /// Forgets all backup progress for this namespace.
    pub async fn reset(&self) -> Result<()> {
        let mut tx = self.settings.begin_transaction().await.map_err(persist_error)?;
        for name in [LAST_UPLOADED_AT, UPLOADED_IDS, RETRY_IDS, SKIPPED_IDS] {
            if let Err(e) = tx.delete(&self.key(name)).await {
                let _ = tx.rollback().await;
                return Err(persist_error(e));
            }
        }
        tx.commit().await.map_err(persist_error)?;

        info!(namespace = %self.namespace, "Watermark reset");
        Ok(())
    }
}

fn persist_error(err: bridge_traits::BridgeError) -> SyncError {
    SyncError::WatermarkPersist(err.to_string())
}
