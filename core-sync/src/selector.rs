//! # Candidate Selector
//!
//! Decides which inventory items a run uploads.
//!
//! Selection is a pure function of the inventory snapshot and the watermark:
//!
//! 1. keep items captured at or after `last_uploaded_at` (inclusive, so items
//!    sharing the boundary timestamp are reconsidered)
//! 2. order newest first; items with equal timestamps keep inventory order
//! 3. keep at most `cap` items
//!
//! An empty selection means the run has nothing to do.

use crate::config::SyncConfig;
use crate::watermark::Watermark;
use bridge_traits::MediaItem;
use std::collections::HashSet;

/// Selects up to `cap` items at or above the watermark, newest first.
///
/// # Example
///
/// ```
/// use bridge_traits::MediaItem;
/// use core_sync::selector::select;
/// use core_sync::Watermark;
///
/// let inventory = vec![
///     MediaItem::new("a", 100, "image/jpeg", "a.jpg"),
///     MediaItem::new("b", 200, "image/jpeg", "b.jpg"),
///     MediaItem::new("c", 300, "image/jpeg", "c.jpg"),
/// ];
///
/// let batch = select(&inventory, &Watermark::new(200), 10);
/// let ids: Vec<_> = batch.iter().map(|item| item.id.as_str()).collect();
/// assert_eq!(ids, ["c", "b"]);
/// ```
pub fn select(inventory: &[MediaItem], watermark: &Watermark, cap: usize) -> Vec<MediaItem> {
    let mut batch: Vec<MediaItem> = inventory
        .iter()
        .filter(|item| item.captured_at >= watermark.last_uploaded_at)
        .cloned()
        .collect();

    sort_newest_first(&mut batch);
    batch.truncate(cap);
    batch
}

/// Like [`select`], but also picks up items whose previous upload failed.
///
/// Retry items are appended after the timestamp selection regardless of
/// their capture time; the combined batch still honours `cap`. With
/// `skip_uploaded`, items already recorded in `uploaded_ids` are left out.
/// Items in `skipped_ids` are always left out.
pub fn select_with_retries(
    inventory: &[MediaItem],
    watermark: &Watermark,
    cap: usize,
    skip_uploaded: bool,
) -> Vec<MediaItem> {
    let mut batch: Vec<MediaItem> = inventory
        .iter()
        .filter(|item| item.captured_at >= watermark.last_uploaded_at)
        .filter(|item| !(skip_uploaded && watermark.uploaded_ids.contains(&item.id)))
        .filter(|item| !watermark.skipped_ids.contains(&item.id))
        .cloned()
        .collect();
    sort_newest_first(&mut batch);

    if batch.len() < cap && !watermark.retry_ids.is_empty() {
        let chosen: HashSet<&str> = batch.iter().map(|item| item.id.as_str()).collect();
        let mut retries: Vec<MediaItem> = inventory
            .iter()
            .filter(|item| watermark.retry_ids.contains(&item.id))
            .filter(|item| !chosen.contains(item.id.as_str()))
            .cloned()
            .collect();
        sort_newest_first(&mut retries);
        batch.extend(retries);
    }

    batch.truncate(cap);
    batch
}

fn sort_newest_first(items: &mut [MediaItem]) {
    // sort_by is stable, which keeps inventory order on ties
    items.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
}

/// Selection settings taken from a [`SyncConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSelector {
    pub cap: usize,
    pub include_retries: bool,
    pub skip_uploaded: bool,
}

impl CandidateSelector {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            include_retries: false,
            skip_uploaded: false,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            cap: config.batch_cap,
            include_retries: config.retry_failed,
            skip_uploaded: config.skip_uploaded,
        }
    }

    pub fn select(&self, inventory: &[MediaItem], watermark: &Watermark) -> Vec<MediaItem> {
        if self.include_retries || self.skip_uploaded || !watermark.skipped_ids.is_empty() {
            let mut effective = watermark.clone();
            if !self.include_retries {
                effective.retry_ids.clear();
            }
            select_with_retries(inventory, &effective, self.cap, self.skip_uploaded)
        } else {
            select(inventory, watermark, self.cap)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, captured_at: i64) -> MediaItem {
        MediaItem::new(id, captured_at, "image/jpeg", format!("{id}.jpg"))
    }

    fn ids(batch: &[MediaItem]) -> Vec<&str> {
        batch.iter().map(|item| item.id.as_str()).collect()
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let inventory = vec![item("a", 100), item("b", 200), item("c", 300)];
        let batch = select(&inventory, &Watermark::new(200), 10);
        assert_eq!(ids(&batch), ["c", "b"]);
    }

    #[test]
    fn test_cap_keeps_newest() {
        let inventory: Vec<_> = (0..60).map(|n| item(&format!("i{n}"), 1_000 + n)).collect();
        let batch = select(&inventory, &Watermark::default(), 50);

        assert_eq!(batch.len(), 50);
        assert_eq!(batch[0].id, "i59");
        assert_eq!(batch[49].id, "i10");
        assert!(batch.windows(2).all(|w| w[0].captured_at >= w[1].captured_at));
    }

    #[test]
    fn test_ties_keep_inventory_order() {
        let inventory = vec![item("x", 5), item("y", 9), item("z", 5), item("w", 9)];
        let batch = select(&inventory, &Watermark::default(), 10);
        assert_eq!(ids(&batch), ["y", "w", "x", "z"]);
    }

    #[test]
    fn test_empty_when_nothing_new() {
        let inventory = vec![item("a", 100), item("b", 200)];
        assert!(select(&inventory, &Watermark::new(201), 10).is_empty());
        assert!(select(&[], &Watermark::default(), 10).is_empty());
    }

    #[test]
    fn test_zero_cap_selects_nothing() {
        let inventory = vec![item("a", 100)];
        assert!(select(&inventory, &Watermark::default(), 0).is_empty());
    }

    #[test]
    fn test_uploaded_ids_skipped_at_boundary() {
        let inventory = vec![item("a", 100), item("b", 300), item("c", 300)];
        let mut watermark = Watermark::new(300);
        watermark.uploaded_ids.insert("b".to_string());

        assert_eq!(ids(&select_with_retries(&inventory, &watermark, 10, true)), ["c"]);
        assert_eq!(
            ids(&select_with_retries(&inventory, &watermark, 10, false)),
            ["b", "c"]
        );
    }

    #[test]
    fn test_retries_follow_timestamp_selection() {
        let inventory = vec![item("old1", 10), item("old2", 20), item("new", 500)];
        let mut watermark = Watermark::new(400);
        watermark.retry_ids.insert("old1".to_string());
        watermark.retry_ids.insert("old2".to_string());
        watermark.retry_ids.insert("deleted".to_string());

        let batch = select_with_retries(&inventory, &watermark, 10, true);
        assert_eq!(ids(&batch), ["new", "old2", "old1"]);

        let capped = select_with_retries(&inventory, &watermark, 2, true);
        assert_eq!(ids(&capped), ["new", "old2"]);
    }

    #[test]
    fn test_retry_at_boundary_not_duplicated() {
        let inventory = vec![item("edge", 400)];
        let mut watermark = Watermark::new(400);
        watermark.retry_ids.insert("edge".to_string());

        let batch = select_with_retries(&inventory, &watermark, 10, true);
        assert_eq!(ids(&batch), ["edge"]);
    }

    #[test]
    fn test_selector_honours_flags() {
        let inventory = vec![item("old", 10), item("edge", 400)];
        let mut watermark = Watermark::new(400);
        watermark.retry_ids.insert("old".to_string());
        watermark.uploaded_ids.insert("edge".to_string());

        let plain = CandidateSelector::new(10);
        assert_eq!(ids(&plain.select(&inventory, &watermark)), ["edge"]);

        let no_retries = CandidateSelector {
            include_retries: false,
            skip_uploaded: true,
            ..plain
        };
        assert!(no_retries.select(&inventory, &watermark).is_empty());

        let config = SyncConfig::new("https://host/upload", "user");
        let full = CandidateSelector::from_config(&config);
        assert_eq!(ids(&full.select(&inventory, &watermark)), ["old"]);
    }

    #[test]
    fn test_skipped_ids_never_selected() {
        let inventory = vec![item("raw", 400), item("next", 400)];
        let mut watermark = Watermark::new(400);
        watermark.skipped_ids.insert("raw".to_string());

        assert_eq!(
            ids(&select_with_retries(&inventory, &watermark, 10, false)),
            ["next"]
        );
        assert_eq!(
            ids(&CandidateSelector::new(10).select(&inventory, &watermark)),
            ["next"]
        );
    }
}
