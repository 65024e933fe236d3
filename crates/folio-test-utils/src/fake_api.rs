//! Scriptable in-memory workspace API
//!
//! Latency, failures and id assignment are all controllable so tests can
//! stage races deterministically under a paused tokio clock.

use async_trait::async_trait;
use chrono::Utc;
use folio_model::{
    Document, DocumentPatch, Entity, EntityId, EntityKind, EntityPatch, Folder, FolderPatch, Source, WorkspaceId,
};
use folio_sync::{ApiError, NewDocument, NewFolder, Page, PageRequest, WorkspaceApi};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// API operations, for per-op latency, failures and counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiOp {
    ListDocuments,
    GetDocument,
    CreateDocument,
    UpdateDocument,
    DeleteDocument,
    ListFolders,
    CreateFolder,
    UpdateFolder,
    DeleteFolder,
    ListSources,
}

#[derive(Debug, Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

struct GaugeGuard<'a>(&'a Gauge);

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Gauge {
    fn enter(&self) -> GaugeGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard(self)
    }
}

#[derive(Debug, Default)]
struct State {
    documents: BTreeMap<EntityId, Document>,
    folders: BTreeMap<EntityId, Folder>,
    sources: BTreeMap<EntityId, Source>,
    invalid_documents: Vec<Value>,
    next_id: u64,
    latency: Duration,
    op_latency: HashMap<ApiOp, Duration>,
    failures: HashMap<ApiOp, VecDeque<ApiError>>,
    calls: HashMap<ApiOp, u64>,
}

/// In-memory [`WorkspaceApi`] for tests and the simulator
#[derive(Debug, Clone, Default)]
pub struct FakeWorkspaceApi {
    state: Arc<Mutex<State>>,
    gauges: Arc<Mutex<HashMap<ApiOp, Arc<Gauge>>>>,
}

impl FakeWorkspaceApi {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                next_id: 1,
                ..State::default()
            })),
            gauges: Arc::default(),
        }
    }

    /// Latency applied to every call
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().latency = latency;
        self
    }

    /// Latency for one operation, overriding the default
    #[must_use]
    pub fn with_op_latency(self, op: ApiOp, latency: Duration) -> Self {
        self.set_op_latency(op, latency);
        self
    }

    /// Next server id number: creations return `doc-{n}` / `fld-{n}`
    #[must_use]
    pub fn with_next_id(self, next: u64) -> Self {
        self.state.lock().next_id = next;
        self
    }

    pub fn set_op_latency(&self, op: ApiOp, latency: Duration) {
        self.state.lock().op_latency.insert(op, latency);
    }

    /// Queue an error returned by the next call of `op`
    pub fn fail_next(&self, op: ApiOp, error: ApiError) {
        self.fail_times(op, error, 1);
    }

    /// Queue the same error for the next `times` calls of `op`
    pub fn fail_times(&self, op: ApiOp, error: ApiError, times: usize) {
        let mut state = self.state.lock();
        let queue = state.failures.entry(op).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    pub fn add_document(&self, document: Document) {
        self.state.lock().documents.insert(document.id.clone(), document);
    }

    pub fn add_folder(&self, folder: Folder) {
        self.state.lock().folders.insert(folder.id.clone(), folder);
    }

    pub fn add_source(&self, source: Source) {
        self.state.lock().sources.insert(source.id.clone(), source);
    }

    /// Append a raw item to document listings that will fail validation
    pub fn add_invalid_document(&self, raw: Value) {
        self.state.lock().invalid_documents.push(raw);
    }

    /// Remove a document server-side, behind the client's back
    pub fn remove_document(&self, id: &EntityId) -> bool {
        self.state.lock().documents.remove(id).is_some()
    }

    pub fn document(&self, id: &EntityId) -> Option<Document> {
        self.state.lock().documents.get(id).cloned()
    }

    pub fn folder(&self, id: &EntityId) -> Option<Folder> {
        self.state.lock().folders.get(id).cloned()
    }

    pub fn document_count(&self) -> usize {
        self.state.lock().documents.len()
    }

    /// Calls made to `op`, failed ones included
    pub fn calls(&self, op: ApiOp) -> u64 {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Highest number of simultaneous calls of `op`
    pub fn peak_in_flight(&self, op: ApiOp) -> usize {
        self.gauge(op).peak.load(Ordering::SeqCst)
    }

    /// Calls of `op` running right now
    pub fn in_flight(&self, op: ApiOp) -> usize {
        self.gauge(op).current.load(Ordering::SeqCst)
    }

    fn gauge(&self, op: ApiOp) -> Arc<Gauge> {
        Arc::clone(self.gauges.lock().entry(op).or_default())
    }

    /// Count the call, wait out the latency, then pop a scripted failure
    async fn enter(&self, op: ApiOp) -> Result<(), ApiError> {
        let latency = {
            let mut state = self.state.lock();
            *state.calls.entry(op).or_default() += 1;
            state.op_latency.get(&op).copied().unwrap_or(state.latency)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match self.state.lock().failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn call<T>(&self, op: ApiOp, f: impl FnOnce(&mut State) -> Result<T, ApiError>) -> Result<T, ApiError> {
        let gauge = self.gauge(op);
        let _guard = gauge.enter();
        self.enter(op).await?;
        let mut state = self.state.lock();
        f(&mut state)
    }
}

fn to_value<T: serde::Serialize>(item: &T) -> Value {
    serde_json::to_value(item).unwrap_or(Value::Null)
}

fn page<T>(items: Vec<T>, request: PageRequest) -> Page<T> {
    let total = items.len();
    let items: Vec<T> = items.into_iter().skip(request.offset).take(request.limit).collect();
    let has_more = request.offset + items.len() < total;
    Page { items, total, has_more }
}

fn not_found(kind: EntityKind, id: &EntityId) -> ApiError {
    ApiError::NotFound { kind, id: id.clone() }
}

fn reject_blank(label: &str, field: &str) -> Result<(), ApiError> {
    if label.trim().is_empty() {
        Err(ApiError::Validation(format!("{field} must not be empty")))
    } else {
        Ok(())
    }
}

#[async_trait]
impl WorkspaceApi for FakeWorkspaceApi {
    async fn list_documents(&self, _workspace: &WorkspaceId, request: PageRequest) -> Result<Page<Value>, ApiError> {
        self.call(ApiOp::ListDocuments, |state| {
            let mut items: Vec<Value> = state
                .documents
                .values()
                .map(|d| to_value(&Document { content: None, ..d.clone() }))
                .collect();
            items.extend(state.invalid_documents.iter().cloned());
            Ok(page(items, request))
        })
        .await
    }

    async fn get_document(&self, _workspace: &WorkspaceId, id: &EntityId) -> Result<Value, ApiError> {
        self.call(ApiOp::GetDocument, |state| {
            state
                .documents
                .get(id)
                .map(to_value)
                .ok_or_else(|| not_found(EntityKind::Document, id))
        })
        .await
    }

    async fn create_document(&self, _workspace: &WorkspaceId, document: &NewDocument) -> Result<Value, ApiError> {
        self.call(ApiOp::CreateDocument, |state| {
            reject_blank(&document.title, "title")?;
            let id = EntityId::new(format!("doc-{}", state.next_id));
            state.next_id += 1;
            let created = Document {
                id: id.clone(),
                title: document.title.clone(),
                folder_id: document.folder_id.clone(),
                content: Some(document.content.clone()),
                updated_at: Utc::now(),
                version: 1,
            };
            state.documents.insert(id, created.clone());
            Ok(to_value(&created))
        })
        .await
    }

    async fn update_document(
        &self,
        _workspace: &WorkspaceId,
        id: &EntityId,
        patch: &DocumentPatch,
    ) -> Result<Value, ApiError> {
        self.call(ApiOp::UpdateDocument, |state| {
            if let Some(title) = &patch.title {
                reject_blank(title, "title")?;
            }
            let current = state
                .documents
                .get(id)
                .cloned()
                .ok_or_else(|| not_found(EntityKind::Document, id))?;
            let mut entity = Entity::Document(current);
            entity
                .apply(&EntityPatch::from(patch.clone()))
                .map_err(|e| ApiError::Validation(e.to_string()))?;
            let Entity::Document(mut updated) = entity else {
                return Err(ApiError::Validation("kind changed".into()));
            };
            updated.version += 1;
            updated.updated_at = Utc::now();
            state.documents.insert(id.clone(), updated.clone());
            Ok(to_value(&updated))
        })
        .await
    }

    async fn delete_document(&self, _workspace: &WorkspaceId, id: &EntityId) -> Result<(), ApiError> {
        self.call(ApiOp::DeleteDocument, |state| {
            state
                .documents
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| not_found(EntityKind::Document, id))
        })
        .await
    }

    async fn list_folders(&self, _workspace: &WorkspaceId, request: PageRequest) -> Result<Page<Value>, ApiError> {
        self.call(ApiOp::ListFolders, |state| {
            Ok(page(state.folders.values().map(to_value).collect(), request))
        })
        .await
    }

    async fn create_folder(&self, _workspace: &WorkspaceId, folder: &NewFolder) -> Result<Value, ApiError> {
        self.call(ApiOp::CreateFolder, |state| {
            reject_blank(&folder.name, "name")?;
            let id = EntityId::new(format!("fld-{}", state.next_id));
            state.next_id += 1;
            let created = Folder {
                id: id.clone(),
                name: folder.name.clone(),
                parent_folder_id: folder.parent_folder_id.clone(),
            };
            state.folders.insert(id, created.clone());
            Ok(to_value(&created))
        })
        .await
    }

    async fn update_folder(
        &self,
        _workspace: &WorkspaceId,
        id: &EntityId,
        patch: &FolderPatch,
    ) -> Result<Value, ApiError> {
        self.call(ApiOp::UpdateFolder, |state| {
            if let Some(name) = &patch.name {
                reject_blank(name, "name")?;
            }
            let current = state
                .folders
                .get(id)
                .cloned()
                .ok_or_else(|| not_found(EntityKind::Folder, id))?;
            let mut entity = Entity::Folder(current);
            entity
                .apply(&EntityPatch::from(patch.clone()))
                .map_err(|e| ApiError::Validation(e.to_string()))?;
            let Entity::Folder(updated) = entity else {
                return Err(ApiError::Validation("kind changed".into()));
            };
            state.folders.insert(id.clone(), updated.clone());
            Ok(to_value(&updated))
        })
        .await
    }

    async fn delete_folder(&self, _workspace: &WorkspaceId, id: &EntityId) -> Result<(), ApiError> {
        self.call(ApiOp::DeleteFolder, |state| {
            state
                .folders
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| not_found(EntityKind::Folder, id))
        })
        .await
    }

    async fn list_sources(&self, _workspace: &WorkspaceId, request: PageRequest) -> Result<Page<Value>, ApiError> {
        self.call(ApiOp::ListSources, |state| {
            Ok(page(state.sources.values().map(to_value).collect(), request))
        })
        .await
    }
}
