//! End-to-end backup scenarios
//!
//! Drives `BackupCoordinator` against an in-memory media library, a scripted
//! upload endpoint and an in-memory SQLite settings store:
//! - Selection against a persisted watermark
//! - Batch capping
//! - Partial failure with retry on the next run
//! - Idempotent re-runs on an unchanged inventory
//! - Debounced triggering through the desktop background executor

use async_trait::async_trait;
use bridge_desktop::{
    ManualChangeSource, SqliteSettingsStore, TokioBackgroundExecutor, TokioFileSystem,
};
use bridge_traits::{
    error::Result as BridgeResult, BackgroundExecutor, HttpClient, HttpRequest, HttpResponse,
    ManualClock, MediaItem, MediaLibrary, PermissionStatus,
};
use bytes::Bytes;
use core_runtime::events::{BackupEvent, CoreEvent, EventBus, EventStream};
use core_sync::{
    BackupCoordinator, FailureReason, SyncConfig, TriggerScheduler, UploadPipeline, Watermark,
    WatermarkPolicy, WatermarkStore,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Test Doubles
// ============================================================================

/// Inventory held in memory; records the order payloads are opened in.
struct MemoryLibrary {
    items: Mutex<Vec<MediaItem>>,
    opened: Mutex<Vec<String>>,
}

impl MemoryLibrary {
    fn new(items: Vec<MediaItem>) -> Self {
        Self {
            items: Mutex::new(items),
            opened: Mutex::new(Vec::new()),
        }
    }

    fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaLibrary for MemoryLibrary {
    async fn permission_status(&self) -> BridgeResult<PermissionStatus> {
        Ok(PermissionStatus::Granted)
    }

    async fn list(&self) -> BridgeResult<Vec<MediaItem>> {
        Ok(self.items.lock().unwrap().clone())
    }

    async fn open(&self, item: &MediaItem) -> BridgeResult<Bytes> {
        self.opened.lock().unwrap().push(item.id.clone());
        Ok(Bytes::from(format!("payload of {}", item.id)))
    }
}

/// Upload endpoint that rejects a configurable set of item ids.
#[derive(Default)]
struct ScriptedEndpoint {
    failing: Mutex<HashSet<String>>,
    received: Mutex<Vec<String>>,
}

impl ScriptedEndpoint {
    fn fail(&self, ids: &[&str]) {
        let mut failing = self.failing.lock().unwrap();
        failing.clear();
        failing.extend(ids.iter().map(|id| id.to_string()));
    }

    fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

fn item_id_of(request: &HttpRequest) -> String {
    let body = String::from_utf8_lossy(request.body.as_deref().unwrap_or_default()).to_string();
    let marker = "name=\"itemId\"\r\n\r\n";
    body.split_once(marker)
        .and_then(|(_, rest)| rest.split_once("\r\n"))
        .map(|(id, _)| id.to_string())
        .unwrap_or_default()
}

#[async_trait]
impl HttpClient for ScriptedEndpoint {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        let item_id = item_id_of(&request);
        self.received.lock().unwrap().push(item_id.clone());

        let status = if self.failing.lock().unwrap().contains(&item_id) {
            500
        } else {
            200
        };
        Ok(HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from_static(br#"{"success": true}"#),
        })
    }
}

struct Harness {
    coordinator: BackupCoordinator,
    library: Arc<MemoryLibrary>,
    endpoint: Arc<ScriptedEndpoint>,
    store: WatermarkStore,
    bus: EventBus,
}

async fn harness(items: Vec<MediaItem>, config: SyncConfig) -> Harness {
    let library = Arc::new(MemoryLibrary::new(items));
    let endpoint = Arc::new(ScriptedEndpoint::default());
    let settings = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
    let cache = std::env::temp_dir().join(format!("core-sync-it-{}", uuid::Uuid::new_v4()));

    let pipeline = UploadPipeline::from_config(
        &config,
        library.clone(),
        Arc::new(TokioFileSystem::with_cache_directory(cache)),
        endpoint.clone(),
    );
    let bus = EventBus::new(256);
    let coordinator = BackupCoordinator::new(
        config.clone(),
        library.clone(),
        WatermarkStore::new(settings.clone(), config.namespace.clone()),
        Arc::new(pipeline),
        bus.clone(),
        Arc::new(ManualClock::at_millis(1_700_000_000_000)),
    );

    Harness {
        coordinator,
        library,
        endpoint,
        store: WatermarkStore::new(settings, config.namespace),
        bus,
    }
}

fn photo(id: &str, captured_at: i64) -> MediaItem {
    // Non-image MIME keeps the payload out of the image codec
    MediaItem::new(id, captured_at, "video/mp4", format!("/media/{id}.mp4"))
}

fn config() -> SyncConfig {
    SyncConfig::new("https://backup.example.com/upload", "user-42")
}

fn drain(events: &mut EventStream) -> Vec<BackupEvent> {
    let mut drained = Vec::new();
    while let Some(Ok(event)) = events.try_recv() {
        if let CoreEvent::Backup(event) = event {
            drained.push(event);
        }
    }
    drained
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn scenario_a_selects_at_or_after_watermark_newest_first() {
    let h = harness(
        vec![photo("a", 100), photo("b", 200), photo("c", 300)],
        config().with_batch_cap(10).with_max_concurrent_uploads(1),
    )
    .await;
    h.store.write(&Watermark::new(200)).await.unwrap();

    let report = h
        .coordinator
        .run_once(CancellationToken::new())
        .await
        .unwrap()
        .expect("two candidates");

    assert_eq!(report.summary.total, 2);
    assert_eq!(h.library.opened(), vec!["c".to_string(), "b".to_string()]);
    assert_eq!(report.watermark_after.last_uploaded_at, 300);
}

#[tokio::test]
async fn scenario_b_caps_batch_to_fifty_newest() {
    let items: Vec<MediaItem> = (1..=60)
        .map(|n| photo(&format!("p{n:02}"), n * 1_000))
        .collect();
    let h = harness(items, config()).await;

    let report = h
        .coordinator
        .run_once(CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.summary.total, 50);
    assert_eq!(report.summary.succeeded, 50);

    let uploaded: HashSet<String> = h.endpoint.received().into_iter().collect();
    let expected: HashSet<String> = (11..=60).map(|n| format!("p{n:02}")).collect();
    assert_eq!(uploaded, expected);
    assert_eq!(report.watermark_after.last_uploaded_at, 60_000);

    // The ten oldest now sit below the watermark and are never selected
    assert!(h
        .coordinator
        .run_once(CancellationToken::new())
        .await
        .unwrap()
        .is_none());
    assert_eq!(h.endpoint.received().len(), 50);
}

#[tokio::test]
async fn scenario_c_partial_failure_fires_once_and_advances_past_failures() {
    let h = harness(
        (1..=5).map(|n| photo(&format!("i{n}"), n * 10)).collect(),
        config(),
    )
    .await;
    h.endpoint.fail(&["i2", "i4"]);
    let mut events = EventStream::new(h.bus.subscribe());

    let report = h
        .coordinator
        .run_once(CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.summary.succeeded, 3);
    assert_eq!(report.summary.failed, 2);
    assert!(report
        .summary
        .failed_items
        .iter()
        .all(|f| f.reason == FailureReason::Rejected { status: 500 }));
    assert_eq!(report.watermark_after.last_uploaded_at, 50);

    let events = drain(&mut events);
    let completed = events
        .iter()
        .filter(|e| matches!(e, BackupEvent::RunCompleted { .. }))
        .count();
    let items = events
        .iter()
        .filter(|e| matches!(e, BackupEvent::ItemCompleted { .. }))
        .count();
    assert_eq!(completed, 1);
    assert_eq!(items, 5);
    assert!(matches!(
        events.first(),
        Some(BackupEvent::RunStarted { total_count: 5, .. })
    ));

    // Failed ids come back on the next run even though they sit below the
    // new watermark
    let persisted = h.store.read().await.unwrap();
    assert_eq!(
        persisted.retry_ids.iter().cloned().collect::<Vec<_>>(),
        vec!["i2".to_string(), "i4".to_string()]
    );

    h.endpoint.fail(&[]);
    let retry = h
        .coordinator
        .run_once(CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(retry.summary.total, 2);
    assert_eq!(retry.summary.succeeded, 2);
    assert!(h.store.read().await.unwrap().retry_ids.is_empty());
}

#[tokio::test]
async fn partial_failure_without_retries_drops_failed_items() {
    let h = harness(
        (1..=5).map(|n| photo(&format!("i{n}"), n * 10)).collect(),
        config().with_retry_failed(false),
    )
    .await;
    h.endpoint.fail(&["i2", "i4"]);

    h.coordinator
        .run_once(CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert!(h
        .coordinator
        .run_once(CancellationToken::new())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn advance_on_success_holds_at_oldest_failure() {
    let h = harness(
        (1..=5).map(|n| photo(&format!("i{n}"), n * 10)).collect(),
        config()
            .with_watermark_policy(WatermarkPolicy::AdvanceOnSuccess)
            .with_retry_failed(false),
    )
    .await;
    h.endpoint.fail(&["i2", "i4"]);

    let report = h
        .coordinator
        .run_once(CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.watermark_after.last_uploaded_at, 20);

    // i2 and i4 are re-selected by timestamp; i3 and i5 were recorded as
    // uploaded above the boundary and are skipped
    h.endpoint.fail(&[]);
    let second = h
        .coordinator
        .run_once(CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.summary.total, 2);
    assert_eq!(second.watermark_after.last_uploaded_at, 40);
}

#[tokio::test]
async fn unchanged_inventory_is_a_no_op_after_success() {
    let h = harness(vec![photo("x", 500), photo("y", 500), photo("z", 400)], config()).await;

    let first = h
        .coordinator
        .run_once(CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.summary.succeeded, 3);
    let after_first = h.store.read().await.unwrap();

    assert!(h
        .coordinator
        .run_once(CancellationToken::new())
        .await
        .unwrap()
        .is_none());
    assert_eq!(h.store.read().await.unwrap(), after_first);
    assert_eq!(h.endpoint.received().len(), 3);

    // A new item at the boundary timestamp is still picked up
    h.library.items.lock().unwrap().push(photo("w", 500));
    let third = h
        .coordinator
        .run_once(CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(third.summary.total, 1);
    assert_eq!(h.endpoint.received().last().map(String::as_str), Some("w"));
}

#[tokio::test(start_paused = true)]
async fn scenario_d_signal_burst_runs_once() {
    let source = Arc::new(ManualChangeSource::new());
    let executor = Arc::new(TokioBackgroundExecutor::new());
    let runs = Arc::new(AtomicUsize::new(0));

    {
        let runs = runs.clone();
        executor
            .register_task_handler("media_backup", move || {
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();
    }

    let scheduler = TriggerScheduler::from_config(
        source.clone(),
        executor.clone() as Arc<dyn BackgroundExecutor>,
        EventBus::default(),
        &config(),
    );
    scheduler.start().await.unwrap();

    for _ in 0..3 {
        source.notify();
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    scheduler.shutdown().await;
}
