//! Workspace Facade Tests
//!
//! Activation, navigation, tabs, breadcrumbs and what survives a restart.
//!
use folio_model::{EntityId, WorkspaceId};
use folio_sync::prelude::*;
use folio_sync::{KvStore, LoadStatus, MemoryKvStore, NavigationError, Recovery};
use folio_test_utils::{document_in, folder, manual_clock, seeded_api, workspace_id, ApiOp, FakeWorkspaceApi};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn engine(api: &FakeWorkspaceApi, kv: &Arc<MemoryKvStore>) -> Workspace {
    let kv: Arc<dyn KvStore> = kv.clone();
    Workspace::new(Arc::new(api.clone()), kv, manual_clock(), SyncConfig::default()).unwrap()
}

async fn active(api: &FakeWorkspaceApi, kv: &Arc<MemoryKvStore>) -> Workspace {
    let engine = engine(api, kv);
    engine.activate(&workspace_id()).await.unwrap();
    engine
}

fn id(raw: &str) -> EntityId {
    EntityId::new(raw)
}

fn titles(engine: &Workspace) -> Vec<String> {
    engine.tabs().into_iter().map(|t| t.title).collect()
}

#[tokio::test(start_paused = true)]
async fn test_first_activation_blocks_then_revalidates_in_background() {
    let api = seeded_api(3).with_latency(Duration::from_millis(300));
    let kv = Arc::new(MemoryKvStore::new());
    let engine = engine(&api, &kv);
    assert!(matches!(engine.session(), Err(SyncError::NotActive)));

    engine.activate(&workspace_id()).await.unwrap();
    assert_eq!(engine.active(), Some(workspace_id()));
    assert_eq!(engine.store().ids(EntityKind::Document).len(), 3);
    assert!(matches!(engine.status().load, LoadStatus::Loaded { entities: 6, .. }));
    assert_eq!(engine.loader().fetch_count(), 1);

    // second activation serves the cache and refreshes behind it
    api.add_document(folio_test_utils::document("doc-late", "Late arrival"));
    let started = tokio::time::Instant::now();
    engine.activate(&workspace_id()).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(300));
    assert!(!engine.store().contains(EntityKind::Document, &id("doc-late")));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(engine.loader().fetch_count(), 2);
    assert!(engine.store().contains(EntityKind::Document, &id("doc-late")));
}

#[tokio::test(start_paused = true)]
async fn test_activation_after_failed_first_load_loads_in_foreground() {
    let api = seeded_api(3);
    api.fail_times(ApiOp::ListDocuments, ApiError::Network("offline".into()), 3);
    let kv = Arc::new(MemoryKvStore::new());
    let engine = engine(&api, &kv);

    let err = engine.activate(&workspace_id()).await.unwrap_err();
    assert_eq!(err, SyncError::Api(ApiError::Network("offline".into())));
    assert_eq!(engine.active(), Some(workspace_id()));
    assert!(!engine.store().get_snapshot().is_loaded());
    assert!(matches!(engine.status().load, LoadStatus::Faulted { .. }));

    engine.activate(&workspace_id()).await.unwrap();
    assert!(engine.store().get_snapshot().is_loaded());
    assert_eq!(engine.store().ids(EntityKind::Document).len(), 3);
    assert!(matches!(engine.status().load, LoadStatus::Loaded { entities: 6, .. }));
    assert_eq!(engine.loader().fetch_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_open_document_records_access_and_refetches_stale_body() {
    let api = seeded_api(3);
    let kv = Arc::new(MemoryKvStore::new());
    let engine = active(&api, &kv).await;
    assert_eq!(engine.store().get_document(&id("doc-1")).unwrap().state, EntryState::Stale);

    let tab = engine.open_document(&id("doc-1")).unwrap();
    let again = engine.open_document(&id("doc-1")).unwrap();
    assert_eq!(tab, again);
    assert_eq!(engine.tabs().len(), 1);
    assert_eq!(titles(&engine), vec!["Document 1".to_string()]);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let entry = engine.store().get_document(&id("doc-1")).unwrap();
    assert_eq!(entry.state, EntryState::Fresh);
    assert!(entry.data.content.is_some());

    let session = engine.session().unwrap();
    assert_eq!(session.tracker().get(&id("doc-1")).unwrap().count, 2);
    assert_eq!(session.router().current().document(), Some(&id("doc-1")));
}

#[tokio::test(start_paused = true)]
async fn test_navigating_away_cancels_prefetch_of_previous_document() {
    let api = seeded_api(3).with_op_latency(ApiOp::GetDocument, Duration::from_secs(2));
    let kv = Arc::new(MemoryKvStore::new());
    let engine = active(&api, &kv).await;

    engine.open_document(&id("doc-0")).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(engine.store().get_document(&id("doc-0")).unwrap().state, EntryState::Pending);

    engine.navigate("/w/ws-test/doc/doc-2").unwrap();
    assert_eq!(engine.store().get_document(&id("doc-0")).unwrap().state, EntryState::Stale);
    let session = engine.session().unwrap();
    assert!(!session.scheduler().in_flight().contains(&id("doc-0")));
    assert_eq!(engine.tabs().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_navigation_routes_and_breadcrumbs() {
    let api = seeded_api(2);
    api.add_document(document_in("doc-deep", "Deep", "fld-notes"));
    let kv = Arc::new(MemoryKvStore::new());
    let engine = active(&api, &kv).await;

    let route = engine.navigate("/w/ws-test/doc/doc-deep?from=search").unwrap();
    assert_eq!(route.to_string(), "/w/ws-test/doc/doc-deep");
    let trail: Vec<String> = engine.breadcrumbs().unwrap().into_iter().map(|b| b.title).collect();
    assert_eq!(trail, vec!["Root", "Notes", "Deep"]);

    engine.navigate("/w/ws-test/folder/fld-notes").unwrap();
    assert_eq!(engine.tabs().len(), 2);
    assert_eq!(engine.tabs()[1].kind, TabKind::Folder);

    assert!(matches!(
        engine.navigate("/w/elsewhere/doc/doc-0"),
        Err(SyncError::Navigation(NavigationError::WrongWorkspace { .. }))
    ));
    assert!(matches!(
        engine.navigate("/settings"),
        Err(SyncError::Navigation(NavigationError::UnknownRoute(_)))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_corrupted_folder_cycle_is_reported() {
    let api = FakeWorkspaceApi::new();
    api.add_folder(folder("fld-a", "A", Some("fld-b")));
    api.add_folder(folder("fld-b", "B", Some("fld-a")));
    api.add_document(document_in("doc-1", "Trapped", "fld-a"));
    let kv = Arc::new(MemoryKvStore::new());
    let engine = active(&api, &kv).await;

    engine.navigate("/w/ws-test/doc/doc-1").unwrap();
    let err = engine.breadcrumbs().unwrap_err();
    assert!(matches!(err, SyncError::Navigation(NavigationError::Cycle(_))));
}

#[tokio::test(start_paused = true)]
async fn test_tab_title_follows_confirmed_rename() {
    let api = seeded_api(2).with_op_latency(ApiOp::UpdateDocument, Duration::from_millis(250));
    let kv = Arc::new(MemoryKvStore::new());
    let engine = active(&api, &kv).await;
    engine.open_document(&id("doc-0")).unwrap();

    let rename = engine.rename_document(&id("doc-0"), "Renamed").unwrap();
    assert_eq!(titles(&engine), vec!["Renamed".to_string()]);
    rename.settled().await.unwrap();
    assert_eq!(titles(&engine), vec!["Renamed".to_string()]);

    let delete = engine.delete_document(&id("doc-0")).unwrap();
    delete.settled().await.unwrap();
    assert!(engine.tabs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_tabs_and_access_history_survive_restart_per_workspace() {
    let api = seeded_api(3);
    let kv = Arc::new(MemoryKvStore::new());
    {
        let engine = active(&api, &kv).await;
        engine.open_document(&id("doc-0")).unwrap();
        engine.open_document(&id("doc-2")).unwrap();
        engine.open_document(&id("doc-2")).unwrap();
        engine.shutdown().await;
    }

    let engine = active(&api, &kv).await;
    let restored: Vec<EntityId> = engine.tabs().into_iter().map(|t| t.entity_id).collect();
    assert_eq!(restored, vec![id("doc-0"), id("doc-2")]);
    assert_eq!(titles(&engine), vec!["Document 0".to_string(), "Document 2".to_string()]);
    let session = engine.session().unwrap();
    assert_eq!(session.tabs().active().unwrap().entity_id, id("doc-2"));
    assert_eq!(session.tracker().get(&id("doc-2")).unwrap().count, 2);
    drop(session);

    engine.switch_to(&WorkspaceId::new("ws-other")).await.unwrap();
    assert!(engine.tabs().is_empty());
    engine.open_document(&id("doc-1")).unwrap();

    engine.switch_to(&workspace_id()).await.unwrap();
    assert_eq!(engine.tabs().len(), 2);
    engine.switch_to(&WorkspaceId::new("ws-other")).await.unwrap();
    assert_eq!(engine.tabs().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_tabs_of_deleted_documents_close_on_reload() {
    let api = seeded_api(2);
    let kv = Arc::new(MemoryKvStore::new());
    {
        let engine = active(&api, &kv).await;
        engine.open_document(&id("doc-1")).unwrap();
        engine.shutdown().await;
    }
    api.remove_document(&id("doc-1"));

    let engine = active(&api, &kv).await;
    assert!(engine.tabs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_drafts_are_offered_on_cold_start_only() {
    let api = seeded_api(2);
    let kv = Arc::new(MemoryKvStore::new());
    {
        let engine = active(&api, &kv).await;
        let session = engine.session().unwrap();
        session.drafts().save(&id("doc-0"), "half-written", 1).await.unwrap();
        session.drafts().save(&id("doc-1"), "also unsaved", 1).await.unwrap();
        // drafts never touch the live cache
        assert!(engine.store().get_document(&id("doc-0")).unwrap().data.content.is_none());
        engine.shutdown().await;
    }

    // someone else edits doc-1 meanwhile
    {
        let other = active(&api, &Arc::new(MemoryKvStore::new())).await;
        other.edit_document(&id("doc-1"), "server edit").unwrap().settled().await.unwrap();
    }

    let engine = active(&api, &kv).await;
    let recovered = engine.recover_drafts().await.unwrap();
    assert_eq!(recovered.len(), 2);
    assert!(matches!(&recovered[0], Recovery::Recoverable(d) if d.content == "half-written"));
    assert!(matches!(&recovered[1], Recovery::Outdated { current_version: Some(2), .. }));
}

#[tokio::test(start_paused = true)]
async fn test_mutations_require_an_active_workspace() {
    let api = seeded_api(1);
    let kv = Arc::new(MemoryKvStore::new());
    let engine = engine(&api, &kv);
    assert!(matches!(
        engine.rename_document(&id("doc-0"), "x"),
        Err(SyncError::NotActive)
    ));
    assert!(engine.tabs().is_empty());
    assert_eq!(engine.status().workspace, None);
}
