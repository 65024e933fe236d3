//! PrefetchScheduler Tests
//!
//! Concurrency cap, Fresh-skip, eviction of vanished documents,
//! per-cycle failure handling, cancellation and the background loop.
//!
use folio_cache::CacheStore;
use folio_model::{EntityId, ManualClock};
use folio_sync::prelude::*;
use folio_sync::{MemoryKvStore, PrefetchScheduler, WorkspaceLoader};
use folio_test_utils::{document_aged, manual_clock, seeded_api, workspace_id, ApiOp, FakeWorkspaceApi};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    api: FakeWorkspaceApi,
    store: Arc<CacheStore>,
    tracker: Arc<AccessTracker>,
    scheduler: PrefetchScheduler,
    _clock: Arc<ManualClock>,
}

async fn harness(api: FakeWorkspaceApi, config: SyncConfig) -> Harness {
    let clock = manual_clock();
    let store = Arc::new(CacheStore::new(clock.clone()));
    let ws = workspace_id();
    WorkspaceLoader::new(Arc::new(api.clone()), Arc::clone(&store), clock.clone(), config.clone())
        .load(&ws)
        .await
        .unwrap();
    let tracker = Arc::new(AccessTracker::new(
        ws.clone(),
        Arc::new(MemoryKvStore::new()),
        clock.clone(),
        &config,
    ));
    let scheduler = PrefetchScheduler::new(
        ws,
        Arc::new(api.clone()),
        Arc::clone(&store),
        Arc::clone(&tracker),
        clock.clone(),
        config,
    );
    Harness {
        api,
        store,
        tracker,
        scheduler,
        _clock: clock,
    }
}

fn id(raw: &str) -> EntityId {
    EntityId::new(raw)
}

#[tokio::test(start_paused = true)]
async fn test_never_more_than_three_in_flight() {
    let api = seeded_api(20).with_op_latency(ApiOp::GetDocument, Duration::from_millis(50));
    let h = harness(api, SyncConfig::default().with_max_concurrent_prefetch(3)).await;

    let report = h.scheduler.run_cycle().await;

    assert_eq!(report.candidates, 20);
    assert_eq!(report.fetched, 20);
    assert_eq!(report.peak_in_flight, 3);
    assert_eq!(h.api.peak_in_flight(ApiOp::GetDocument), 3);
    assert_eq!(h.api.in_flight(ApiOp::GetDocument), 0);
    for i in 0..20 {
        let entry = h.store.get_document(&id(&format!("doc-{i}"))).unwrap();
        assert_eq!(entry.state, EntryState::Fresh);
        assert!(entry.data.content.is_some());
    }
}

#[tokio::test(start_paused = true)]
async fn test_fresh_documents_are_skipped() {
    let h = harness(seeded_api(4), SyncConfig::default()).await;
    h.scheduler.run_cycle().await;
    assert_eq!(h.api.calls(ApiOp::GetDocument), 4);

    assert!(h.scheduler.candidates().is_empty());
    let second = h.scheduler.run_cycle().await;
    assert_eq!(second.fetched, 0);
    assert_eq!(h.api.calls(ApiOp::GetDocument), 4);
}

#[tokio::test(start_paused = true)]
async fn test_vanished_document_is_evicted_without_failing_cycle() {
    let h = harness(seeded_api(5), SyncConfig::default()).await;
    h.tracker.record(&id("doc-3"));
    h.api.remove_document(&id("doc-3"));

    let report = h.scheduler.run_cycle().await;

    assert_eq!(report.evicted, 1);
    assert_eq!(report.fetched, 4);
    assert!(!h.store.contains(EntityKind::Document, &id("doc-3")));
    assert!(h.scheduler.is_evicted(&id("doc-3")));
    assert!(h.tracker.get(&id("doc-3")).is_none());

    assert_eq!(h.scheduler.enqueue([id("doc-3")]), 0);
    h.scheduler.run_cycle().await;
    assert_eq!(h.api.calls(ApiOp::GetDocument), 5);
}

#[tokio::test(start_paused = true)]
async fn test_failure_is_dropped_for_the_cycle_and_retried_next_cycle() {
    let h = harness(seeded_api(3), SyncConfig::default()).await;
    h.api.fail_next(ApiOp::GetDocument, ApiError::Network("flaky".into()));

    let first = h.scheduler.run_cycle().await;
    assert_eq!(first.failed, 1);
    assert_eq!(first.fetched, 2);
    assert_eq!(h.api.calls(ApiOp::GetDocument), 3);
    let errored: Vec<_> = (0..3)
        .map(|i| id(&format!("doc-{i}")))
        .filter(|d| h.store.get_document(d).unwrap().state == EntryState::Error)
        .collect();
    assert_eq!(errored.len(), 1);

    let second = h.scheduler.run_cycle().await;
    assert_eq!(second.fetched, 1);
    assert_eq!(h.store.get_document(&errored[0]).unwrap().state, EntryState::Fresh);
}

#[tokio::test(start_paused = true)]
async fn test_slow_fetch_times_out() {
    let api = seeded_api(2).with_op_latency(ApiOp::GetDocument, Duration::from_secs(5));
    let h = harness(api, SyncConfig::default().with_prefetch_timeout(Duration::from_millis(100))).await;

    let report = h.scheduler.run_cycle().await;

    assert_eq!(report.timed_out, 2);
    assert_eq!(h.store.get_document(&id("doc-0")).unwrap().state, EntryState::Stale);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_aborts_in_flight_fetch() {
    let api = seeded_api(5).with_op_latency(ApiOp::GetDocument, Duration::from_secs(1));
    let h = harness(api, SyncConfig::default()).await;

    let cycle = {
        let scheduler = h.scheduler.clone();
        tokio::spawn(async move { scheduler.run_cycle().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.store.get_document(&id("doc-0")).unwrap().state, EntryState::Pending);

    assert!(h.scheduler.cancel(&id("doc-0")));
    assert!(!h.scheduler.cancel(&id("doc-0")));
    let report = cycle.await.unwrap();

    assert_eq!(report.cancelled, 1);
    assert_eq!(report.fetched, 4);
    assert_eq!(h.store.get_document(&id("doc-0")).unwrap().state, EntryState::Stale);
}

#[tokio::test(start_paused = true)]
async fn test_candidates_rank_accessed_then_recent() {
    let api = seeded_api(3);
    api.add_document(document_aged("doc-old", 30));
    api.add_document(document_aged("doc-old-read", 30));
    let h = harness(api, SyncConfig::default()).await;
    h.tracker.record(&id("doc-old-read"));
    h.tracker.record(&id("doc-2"));
    h.tracker.record(&id("doc-2"));

    let candidates = h.scheduler.candidates();

    assert_eq!(candidates[0], id("doc-2"));
    assert_eq!(candidates[1], id("doc-old-read"));
    assert!(!candidates.contains(&id("doc-old")));
    assert_eq!(candidates.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_enqueue_deduplicates() {
    let h = harness(seeded_api(3), SyncConfig::default()).await;
    assert_eq!(h.scheduler.enqueue([id("doc-0"), id("doc-0"), id("doc-1")]), 2);
    assert_eq!(h.scheduler.enqueue([id("doc-1")]), 0);
    assert_eq!(h.scheduler.queued(), vec![id("doc-0"), id("doc-1")]);
    assert!(h.scheduler.cancel(&id("doc-1")));
    assert_eq!(h.scheduler.queued(), vec![id("doc-0")]);
}

#[tokio::test(start_paused = true)]
async fn test_background_loop_runs_after_settle_delay() {
    let config = SyncConfig::default()
        .with_settle_delay(Duration::from_secs(2))
        .with_prefetch_interval(Duration::from_secs(600));
    let h = harness(seeded_api(2), config).await;

    let task = h.scheduler.spawn();
    tokio::time::sleep(Duration::from_millis(1_900)).await;
    assert_eq!(h.scheduler.cycles(), 0);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.scheduler.cycles(), 1);

    h.scheduler.trigger();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.scheduler.cycles(), 2);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(h.scheduler.cycles(), 3);

    h.scheduler.shutdown();
    task.await.unwrap();
}
