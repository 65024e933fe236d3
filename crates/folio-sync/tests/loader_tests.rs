//! WorkspaceLoader Tests
//!
//! Single-flight, last-issued-wins, retries, pagination and
//! stale-while-revalidate against the fake API.
//!
use folio_cache::CacheStore;
use folio_model::EntityId;
use folio_sync::prelude::*;
use folio_sync::{LoadStatus, WorkspaceLoader};
use folio_test_utils::{manual_clock, seeded_api, workspace_id, ApiOp, FakeWorkspaceApi};
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn loader_for(api: &FakeWorkspaceApi, config: SyncConfig) -> (WorkspaceLoader, Arc<CacheStore>) {
    let clock = manual_clock();
    let store = Arc::new(CacheStore::new(clock.clone()));
    let loader = WorkspaceLoader::new(Arc::new(api.clone()), Arc::clone(&store), clock, config);
    (loader, store)
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_loads_share_one_fetch() {
    let api = seeded_api(5).with_latency(Duration::from_millis(100));
    let (loader, store) = loader_for(&api, SyncConfig::default());
    let ws = workspace_id();

    let results = join_all((0..10).map(|_| loader.load(&ws))).await;

    assert_eq!(loader.fetch_count(), 1);
    assert_eq!(api.calls(ApiOp::ListDocuments), 1);
    assert_eq!(api.calls(ApiOp::ListFolders), 1);
    let first = results[0].as_ref().unwrap();
    for result in &results {
        assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
    }
    assert_eq!(store.ids(EntityKind::Document).len(), 5);
    assert_eq!(store.ids(EntityKind::Folder).len(), 2);
    assert_eq!(store.ids(EntityKind::Source).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_load_after_completion_fetches_again() {
    let api = seeded_api(1);
    let (loader, _store) = loader_for(&api, SyncConfig::default());
    let ws = workspace_id();

    loader.load(&ws).await.unwrap();
    loader.load(&ws).await.unwrap();
    assert_eq!(loader.fetch_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_late_response_of_superseded_load_is_discarded() {
    let api = seeded_api(2).with_latency(Duration::from_millis(100));
    let (loader, store) = loader_for(&api, SyncConfig::default());
    let ws = workspace_id();

    let older = {
        let loader = loader.clone();
        let ws = ws.clone();
        tokio::spawn(async move { loader.load(&ws).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    // server changes between the two requests
    api.add_document(folio_test_utils::document("doc-new", "Added later"));

    let newer = loader.reload(&ws).await.unwrap();
    let older = older.await.unwrap();

    assert!(matches!(older, Err(SyncError::Superseded { sequence: 1, .. })));
    assert_eq!(newer.documents.len(), 3);
    assert!(store.contains(EntityKind::Document, &EntityId::new("doc-new")));
    assert_eq!(loader.latest_sequence(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_network_errors_are_retried_with_backoff() {
    let api = seeded_api(3);
    api.fail_times(ApiOp::ListDocuments, ApiError::Network("reset".into()), 2);
    let (loader, store) = loader_for(&api, SyncConfig::default());

    let started = tokio::time::Instant::now();
    let snapshot = loader.load(&workspace_id()).await.unwrap();

    assert_eq!(snapshot.documents.len(), 3);
    assert_eq!(loader.fetch_count(), 3);
    // 250ms then 500ms
    assert!(started.elapsed() >= Duration::from_millis(750));
    assert!(store.get_snapshot().is_loaded());
}

#[tokio::test(start_paused = true)]
async fn test_retries_are_bounded() {
    let api = seeded_api(3);
    api.fail_times(ApiOp::ListFolders, ApiError::Network("down".into()), 10);
    let (loader, store) = loader_for(&api, SyncConfig::default());

    let err = loader.load(&workspace_id()).await.unwrap_err();

    assert_eq!(err, SyncError::Api(ApiError::Network("down".into())));
    assert_eq!(loader.fetch_count(), 3);
    assert!(matches!(
        loader.status(),
        LoadStatus::Faulted {
            serving_stale: false,
            ..
        }
    ));
    assert!(store.ids(EntityKind::Document).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_validation_errors_are_not_retried() {
    let api = seeded_api(1);
    api.fail_next(ApiOp::ListSources, ApiError::Validation("bad workspace".into()));
    let (loader, _store) = loader_for(&api, SyncConfig::default());

    assert!(loader.load(&workspace_id()).await.is_err());
    assert_eq!(loader.fetch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_keeps_previous_snapshot() {
    let api = seeded_api(4);
    let (loader, store) = loader_for(&api, SyncConfig::default());
    let ws = workspace_id();
    loader.load(&ws).await.unwrap();

    api.remove_document(&EntityId::new("doc-0"));
    api.fail_times(ApiOp::ListDocuments, ApiError::Network("offline".into()), 3);
    assert!(loader.reload(&ws).await.is_err());

    assert!(matches!(loader.status(), LoadStatus::Faulted { serving_stale: true, .. }));
    assert_eq!(store.ids(EntityKind::Document).len(), 4);
    assert!(store.contains(EntityKind::Document, &EntityId::new("doc-0")));
}

#[tokio::test(start_paused = true)]
async fn test_pagination_and_invalid_items() {
    let api = seeded_api(5);
    api.add_invalid_document(json!({"id": "", "title": "no id"}));
    api.add_invalid_document(json!({"title": 7}));
    let (loader, store) = loader_for(&api, SyncConfig::default().with_page_size(2));

    let snapshot = loader.load(&workspace_id()).await.unwrap();

    // 7 raw items in pages of 2
    assert_eq!(api.calls(ApiOp::ListDocuments), 4);
    assert_eq!(snapshot.documents.len(), 5);
    assert_eq!(snapshot.rejected, 2);
    assert!(matches!(loader.status(), LoadStatus::Loaded { rejected: 2, entities: 8, .. }));
    // listings carry no bodies
    let entry = store.get_document(&EntityId::new("doc-1")).unwrap();
    assert_eq!(entry.state, EntryState::Stale);
    assert!(entry.data.content.is_none());
}
