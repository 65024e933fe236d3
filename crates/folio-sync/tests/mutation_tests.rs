//! Optimistic Mutation Tests
//!
//! End-to-end runs through the workspace facade against a fake API with
//! simulated latency.
//!
use folio_model::EntityId;
use folio_sync::prelude::*;
use folio_sync::{MemoryKvStore, MutationAction, MutationHandle, MutationOp};
use folio_test_utils::{document, manual_clock, seeded_api, workspace_id, ApiOp, FakeWorkspaceApi};
use std::sync::Arc;
use std::time::Duration;

async fn active(api: &FakeWorkspaceApi) -> Workspace {
    let engine = Workspace::new(
        Arc::new(api.clone()),
        Arc::new(MemoryKvStore::new()),
        manual_clock(),
        SyncConfig::default(),
    )
    .unwrap();
    engine.activate(&workspace_id()).await.unwrap();
    engine
}

fn id(raw: &str) -> EntityId {
    EntityId::new(raw)
}

fn title(engine: &Workspace, raw: &str) -> Option<String> {
    engine.store().get_document(&id(raw)).map(|e| e.data.title)
}

#[tokio::test(start_paused = true)]
async fn test_rename_of_temporary_document_lands_on_server_id() {
    let api = FakeWorkspaceApi::new()
        .with_latency(Duration::from_millis(500))
        .with_next_id(42);
    let engine = active(&api).await;

    let create = engine.create_document(NewDocument::titled("Untitled")).unwrap();
    let temporary = create.target().clone();
    assert!(temporary.is_temporary());
    engine.open_document(&temporary).unwrap();
    let rename = engine.rename_document(&temporary, "Quarterly plan").unwrap();
    assert_eq!(title(&engine, temporary.as_str()).as_deref(), Some("Quarterly plan"));

    let created = create.settled().await.unwrap();
    assert_eq!(created, Settlement::Confirmed(id("doc-42")));
    let renamed = rename.settled().await.unwrap();
    assert_eq!(renamed, Settlement::Confirmed(id("doc-42")));

    assert_eq!(title(&engine, "doc-42").as_deref(), Some("Quarterly plan"));
    assert!(!engine.store().contains(EntityKind::Document, &temporary));
    assert_eq!(api.document(&id("doc-42")).unwrap().title, "Quarterly plan");
    assert!(engine.coordinator().pending().is_empty());
    assert!(engine.coordinator().pending_for(EntityKind::Document, &temporary).is_empty());

    let tabs = engine.tabs();
    assert_eq!(tabs.len(), 1);
    assert_eq!(tabs[0].entity_id, id("doc-42"));
    assert_eq!(tabs[0].title, "Quarterly plan");
    assert!(tabs.iter().all(|t| t.entity_id != temporary));

    let session = engine.session().unwrap();
    assert!(session.tracker().get(&temporary).is_none());
    assert_eq!(session.tracker().get(&id("doc-42")).unwrap().count, 1);
    assert_eq!(engine.coordinator().await_server_id(&temporary).await.unwrap(), id("doc-42"));
}

#[tokio::test(start_paused = true)]
async fn test_open_route_follows_server_id() {
    let api = FakeWorkspaceApi::new()
        .with_latency(Duration::from_millis(500))
        .with_next_id(42);
    let engine = active(&api).await;

    let create = engine.create_document(NewDocument::titled("Meeting notes")).unwrap();
    let temporary = create.target().clone();
    engine.open_document(&temporary).unwrap();
    let session = engine.session().unwrap();
    assert_eq!(session.router().current().document(), Some(&temporary));

    create.settled().await.unwrap();
    let route = session.router().current();
    assert_eq!(route.document(), Some(&id("doc-42")));
    assert_eq!(route.to_string(), format!("/w/{}/doc/doc-42", workspace_id()));

    let trail = session.router().breadcrumbs().unwrap();
    assert_eq!(trail.last().map(|b| b.title.as_str()), Some("Meeting notes"));
    assert_eq!(trail.last().map(|b| &b.id), Some(&id("doc-42")));
}

#[tokio::test(start_paused = true)]
async fn test_document_created_in_temporary_folder_uses_server_folder_id() {
    let api = FakeWorkspaceApi::new()
        .with_latency(Duration::from_millis(200))
        .with_next_id(7);
    let engine = active(&api).await;

    let folder = engine.create_folder(NewFolder::named("Inbox")).unwrap();
    let temporary_folder = folder.target().clone();
    let doc = engine
        .create_document(NewDocument::titled("Note").in_folder(temporary_folder))
        .unwrap();

    assert_eq!(folder.settled().await.unwrap(), Settlement::Confirmed(id("fld-7")));
    assert_eq!(doc.settled().await.unwrap(), Settlement::Confirmed(id("doc-8")));
    assert_eq!(api.document(&id("doc-8")).unwrap().folder_id, Some(id("fld-7")));
}

#[tokio::test(start_paused = true)]
async fn test_delete_wins_over_in_flight_rename() {
    let api = seeded_api(2)
        .with_op_latency(ApiOp::UpdateDocument, Duration::from_millis(900))
        .with_op_latency(ApiOp::DeleteDocument, Duration::from_millis(100));
    let engine = active(&api).await;

    let rename = engine.rename_document(&id("doc-1"), "Too late").unwrap();
    let delete = engine.delete_document(&id("doc-1")).unwrap();
    assert!(title(&engine, "doc-1").is_none());

    assert_eq!(delete.settled().await.unwrap(), Settlement::Confirmed(id("doc-1")));
    // the server no longer has the document when the rename lands
    let late = rename.settled().await;
    assert!(late.is_err() || late.is_ok_and(|s| s.is_ignored()));
    assert!(title(&engine, "doc-1").is_none());

    // a later refresh cannot resurrect it either
    api.add_document(document("doc-1", "Zombie"));
    engine.refresh().await.unwrap();
    assert!(title(&engine, "doc-1").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_late_rename_confirmation_after_delete_is_a_no_op() {
    let api = seeded_api(1);
    let engine = active(&api).await;
    let coordinator = engine.coordinator();

    let rename = coordinator
        .begin(
            EntityKind::Document,
            id("doc-0"),
            MutationOp::Update(DocumentPatch::rename("Renamed").into()),
        )
        .unwrap();
    let delete = coordinator.begin(EntityKind::Document, id("doc-0"), MutationOp::Delete).unwrap();
    assert!(matches!(coordinator.complete(&delete, None), Settlement::Confirmed(_)));

    let server_echo = folio_model::Entity::Document(document("doc-0", "Renamed"));
    let late = coordinator.complete(&rename, Some(server_echo));

    assert!(late.is_ignored());
    assert!(!engine.store().contains(EntityKind::Document, &id("doc-0")));
    assert!(coordinator.is_deleted(EntityKind::Document, &id("doc-0")));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_rename_rolls_back_exactly() {
    let api = seeded_api(1).with_latency(Duration::from_millis(50));
    api.fail_next(ApiOp::UpdateDocument, ApiError::Validation("title taken".into()));
    let engine = active(&api).await;
    let before = engine.store().get_document(&id("doc-0")).unwrap();

    let rename = engine.rename_document(&id("doc-0"), "Taken").unwrap();
    let handle: MutationHandle = rename.handle().clone();
    assert_eq!(handle.action, MutationAction::Update);

    let err = rename.settled().await.unwrap_err();
    assert_eq!(err, SyncError::Api(ApiError::Validation("title taken".into())));
    assert_eq!(engine.store().get_document(&id("doc-0")).unwrap().data, before.data);

    // a second fail changes nothing
    assert!(engine.coordinator().fail(&handle).is_ignored());
    assert_eq!(engine.store().get_document(&id("doc-0")).unwrap().data, before.data);
    assert_eq!(api.calls(ApiOp::UpdateDocument), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_creation_removes_placeholder_and_fails_waiters() {
    let api = FakeWorkspaceApi::new();
    api.fail_next(ApiOp::CreateDocument, ApiError::Network("timeout".into()));
    let engine = active(&api).await;

    let create = engine.create_document(NewDocument::titled("Lost")).unwrap();
    let temporary = create.target().clone();
    engine.open_document(&temporary).unwrap();
    assert!(create.settled().await.is_err());

    assert!(!engine.store().contains(EntityKind::Document, &temporary));
    assert!(engine.tabs().is_empty());
    assert!(matches!(
        engine.coordinator().await_server_id(&temporary).await,
        Err(SyncError::CreationFailed(_))
    ));
    assert_eq!(api.calls(ApiOp::CreateDocument), 1);
}

#[tokio::test(start_paused = true)]
async fn test_update_of_vanished_document_evicts_it() {
    let api = seeded_api(2);
    let engine = active(&api).await;
    engine.open_document(&id("doc-1")).unwrap();
    api.remove_document(&id("doc-1"));

    let err = engine.edit_document(&id("doc-1"), "new body").unwrap().settled().await.unwrap_err();

    assert!(err.is_not_found());
    assert!(!engine.store().contains(EntityKind::Document, &id("doc-1")));
    assert!(engine.tabs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_workspace_switch_discards_pending_mutations() {
    let api = seeded_api(1).with_op_latency(ApiOp::UpdateDocument, Duration::from_secs(1));
    let engine = active(&api).await;
    let rename = engine.rename_document(&id("doc-0"), "Old workspace").unwrap();
    assert_eq!(engine.coordinator().pending().len(), 1);

    engine.switch_to(&folio_model::WorkspaceId::new("ws-other")).await.unwrap();
    assert!(engine.coordinator().pending().is_empty());

    let settlement = rename.settled().await.unwrap();
    assert!(settlement.is_ignored());
    assert!(engine.store().get_document(&id("doc-0")).is_some_and(|e| e.data.title == "Document 0"));
}
