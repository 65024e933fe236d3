//! End-to-end mutation execution
//!
//! A runner call applies the change optimistically before returning, then
//! finishes on a spawned task: wait for a server id if the target is still
//! temporary, call the API, and confirm or roll back. The task is never
//! cancelled by navigation; dropping the [`MutationTicket`] detaches it.
//! Failures are never retried here; the caller decides.

use super::coordinator::{MutationAction, MutationCoordinator, MutationHandle, MutationOp, Settlement};
use crate::api::{NewDocument, NewFolder, WorkspaceApi};
use crate::error::{ApiError, SyncError};
use folio_cache::CacheStore;
use folio_model::{
    parse, Clock, Document, DocumentPatch, Entity, EntityId, EntityKind, Folder, FolderPatch, WorkspaceId,
};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A mutation applied locally and still settling in the background
#[derive(Debug)]
pub struct MutationTicket {
    handle: MutationHandle,
    task: JoinHandle<Result<Settlement, SyncError>>,
}

impl MutationTicket {
    /// Coordinator handle
    #[inline]
    #[must_use]
    pub fn handle(&self) -> &MutationHandle {
        &self.handle
    }

    /// Target id as applied locally (temporary for creations)
    #[inline]
    #[must_use]
    pub fn target(&self) -> &EntityId {
        &self.handle.target
    }

    /// Wait for the server round trip
    ///
    /// # Errors
    /// The API, validation or creation error that caused the rollback
    pub async fn settled(self) -> Result<Settlement, SyncError> {
        self.task.await.map_err(|_| SyncError::Cancelled)?
    }
}

/// Runs mutations for one workspace
#[derive(Clone)]
pub struct MutationRunner {
    workspace: WorkspaceId,
    api: Arc<dyn WorkspaceApi>,
    store: Arc<CacheStore>,
    coordinator: Arc<MutationCoordinator>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MutationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationRunner")
            .field("workspace", &self.workspace)
            .finish_non_exhaustive()
    }
}

impl MutationRunner {
    /// Create a runner
    #[must_use]
    pub fn new(
        workspace: WorkspaceId,
        api: Arc<dyn WorkspaceApi>,
        store: Arc<CacheStore>,
        coordinator: Arc<MutationCoordinator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            workspace,
            api,
            store,
            coordinator,
            clock,
        }
    }

    /// Create a document under a fresh temporary id
    ///
    /// # Errors
    /// Propagates the optimistic apply failure; nothing is sent in that case
    pub fn create_document(&self, document: NewDocument) -> Result<MutationTicket, SyncError> {
        let temporary = EntityId::temporary();
        let local = Entity::Document(Document {
            id: temporary.clone(),
            title: document.title.clone(),
            folder_id: document.folder_id.clone(),
            content: Some(document.content.clone()),
            updated_at: self.clock.now(),
            version: 0,
        });
        let handle = self
            .coordinator
            .begin(EntityKind::Document, temporary, MutationOp::Create(local))?;
        let runner = self.clone();
        Ok(self.spawn(handle, move |_| async move {
            let folder_id = match &document.folder_id {
                Some(folder) => match runner.coordinator.await_server_id(folder).await {
                    Ok(real) => Some(real),
                    Err(error) => return Err(error),
                },
                None => None,
            };
            let document = NewDocument { folder_id, ..document };
            runner
                .api
                .create_document(&runner.workspace, &document)
                .await
                .map(Some)
                .map_err(SyncError::from)
        }))
    }

    /// Patch a document
    ///
    /// # Errors
    /// `NotFound` if the document is not visible
    pub fn update_document(&self, id: &EntityId, patch: DocumentPatch) -> Result<MutationTicket, SyncError> {
        let handle = self.coordinator.begin(
            EntityKind::Document,
            id.clone(),
            MutationOp::Update(patch.clone().into()),
        )?;
        let runner = self.clone();
        Ok(self.spawn(handle, move |target| async move {
            runner
                .api
                .update_document(&runner.workspace, &target, &patch)
                .await
                .map(Some)
                .map_err(SyncError::from)
        }))
    }

    /// Rename a document
    ///
    /// # Errors
    /// See [`MutationRunner::update_document`]
    pub fn rename_document(&self, id: &EntityId, title: impl Into<String>) -> Result<MutationTicket, SyncError> {
        self.update_document(id, DocumentPatch::rename(title))
    }

    /// Move a document to a folder, or to the root with `None`
    ///
    /// # Errors
    /// See [`MutationRunner::update_document`]
    pub fn move_document(&self, id: &EntityId, folder: Option<EntityId>) -> Result<MutationTicket, SyncError> {
        self.update_document(id, DocumentPatch::move_to(folder))
    }

    /// Replace a document's body
    ///
    /// # Errors
    /// See [`MutationRunner::update_document`]
    pub fn edit_document(&self, id: &EntityId, content: impl Into<String>) -> Result<MutationTicket, SyncError> {
        self.update_document(id, DocumentPatch::edit(content))
    }

    /// Delete a document
    ///
    /// # Errors
    /// `NotFound` if the document is not visible
    pub fn delete_document(&self, id: &EntityId) -> Result<MutationTicket, SyncError> {
        let handle = self
            .coordinator
            .begin(EntityKind::Document, id.clone(), MutationOp::Delete)?;
        let runner = self.clone();
        Ok(self.spawn(handle, move |target| async move {
            runner
                .api
                .delete_document(&runner.workspace, &target)
                .await
                .map(|()| None::<Value>)
                .map_err(SyncError::from)
        }))
    }

    /// Create a folder under a fresh temporary id
    ///
    /// # Errors
    /// Propagates the optimistic apply failure
    pub fn create_folder(&self, folder: NewFolder) -> Result<MutationTicket, SyncError> {
        let temporary = EntityId::temporary();
        let local = Entity::Folder(Folder {
            id: temporary.clone(),
            name: folder.name.clone(),
            parent_folder_id: folder.parent_folder_id.clone(),
        });
        let handle = self
            .coordinator
            .begin(EntityKind::Folder, temporary, MutationOp::Create(local))?;
        let runner = self.clone();
        Ok(self.spawn(handle, move |_| async move {
            let parent_folder_id = match &folder.parent_folder_id {
                Some(parent) => match runner.coordinator.await_server_id(parent).await {
                    Ok(real) => Some(real),
                    Err(error) => return Err(error),
                },
                None => None,
            };
            let folder = NewFolder {
                parent_folder_id,
                ..folder
            };
            runner
                .api
                .create_folder(&runner.workspace, &folder)
                .await
                .map(Some)
                .map_err(SyncError::from)
        }))
    }

    /// Patch a folder
    ///
    /// # Errors
    /// `NotFound` if the folder is not visible
    pub fn update_folder(&self, id: &EntityId, patch: FolderPatch) -> Result<MutationTicket, SyncError> {
        let handle = self.coordinator.begin(
            EntityKind::Folder,
            id.clone(),
            MutationOp::Update(patch.clone().into()),
        )?;
        let runner = self.clone();
        Ok(self.spawn(handle, move |target| async move {
            runner
                .api
                .update_folder(&runner.workspace, &target, &patch)
                .await
                .map(Some)
                .map_err(SyncError::from)
        }))
    }

    /// Rename a folder
    ///
    /// # Errors
    /// See [`MutationRunner::update_folder`]
    pub fn rename_folder(&self, id: &EntityId, name: impl Into<String>) -> Result<MutationTicket, SyncError> {
        self.update_folder(id, FolderPatch::rename(name))
    }

    /// Delete a folder
    ///
    /// # Errors
    /// `NotFound` if the folder is not visible
    pub fn delete_folder(&self, id: &EntityId) -> Result<MutationTicket, SyncError> {
        let handle = self
            .coordinator
            .begin(EntityKind::Folder, id.clone(), MutationOp::Delete)?;
        let runner = self.clone();
        Ok(self.spawn(handle, move |target| async move {
            runner
                .api
                .delete_folder(&runner.workspace, &target)
                .await
                .map(|()| None::<Value>)
                .map_err(SyncError::from)
        }))
    }

    /// Finish a begun mutation on a background task
    ///
    /// `call` receives the target's server id (the temporary id itself for
    /// creations) and returns the server payload.
    fn spawn<F, Fut>(&self, handle: MutationHandle, call: F) -> MutationTicket
    where
        F: FnOnce(EntityId) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<Value>, SyncError>> + Send + 'static,
    {
        let runner = self.clone();
        let settling = handle.clone();
        let task = tokio::spawn(async move {
            let target = if settling.action == MutationAction::Create {
                Ok(settling.target.clone())
            } else {
                runner.coordinator.await_server_id(&settling.target).await
            };
            let result = match target {
                Ok(target) => call(target).await,
                Err(error) => Err(error),
            };
            runner.settle(&settling, result)
        });
        MutationTicket { handle, task }
    }

    fn settle(&self, handle: &MutationHandle, result: Result<Option<Value>, SyncError>) -> Result<Settlement, SyncError> {
        let parsed = result.and_then(|payload| {
            payload
                .map(|value| parse::parse_entity(handle.kind, value))
                .transpose()
                .map_err(SyncError::from)
        });
        match parsed {
            Ok(entity) => Ok(self.coordinator.complete(handle, entity)),
            Err(error) => {
                self.coordinator.fail(handle);
                if let SyncError::Api(ApiError::NotFound { kind, id }) = &error {
                    self.store.evict(*kind, &self.coordinator.resolve(id), false);
                }
                tracing::warn!(
                    workspace = %self.workspace,
                    mutation = %handle.id,
                    target = %handle.target,
                    action = %handle.action,
                    %error,
                    "mutation failed"
                );
                Err(error)
            }
        }
    }
}
