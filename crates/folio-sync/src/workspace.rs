//! Workspace facade
//!
//! [`Workspace`] wires the engine for one active workspace at a time:
//! - the first load of a workspace blocks; later activations serve the
//!   cached snapshot and revalidate in the background
//! - switching workspaces discards pending mutations, clears the cache and
//!   rebuilds the per-workspace components ([`ActiveWorkspace`])
//! - opening a document records the access, opens a tab and queues a
//!   refetch when the cached copy is not fresh

use crate::access::AccessTracker;
use crate::api::{NewDocument, NewFolder, WorkspaceApi};
use crate::config::SyncConfig;
use crate::drafts::{DraftStore, Recovery};
use crate::error::SyncError;
use crate::kv::KvStore;
use crate::loader::{LoadResult, LoadStatus, WorkspaceLoader};
use crate::mutation::{MutationCoordinator, MutationRunner, MutationTicket};
use crate::prefetch::{fetch_body, PrefetchScheduler};
use crate::router::{Breadcrumb, DocumentRouter, Route};
use crate::tabs::{Tab, TabId, TabKind, TabStateManager};
use folio_cache::{CacheEvent, CacheStore, Change, EntryState, StoreSnapshot, Subscription, Topic};
use folio_model::{Clock, DocumentPatch, EntityId, EntityKind, FolderPatch, WorkspaceId};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;

/// Point-in-time view of the engine for status displays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceStatus {
    /// Active workspace
    pub workspace: Option<WorkspaceId>,
    /// Snapshot load state
    pub load: LoadStatus,
    /// Mutations not yet settled
    pub pending_mutations: usize,
    /// Open tabs
    pub open_tabs: usize,
    /// Completed prefetch cycles
    pub prefetch_cycles: u64,
    /// Ids waiting for a prefetch
    pub queued_prefetches: usize,
}

/// Components bound to the active workspace
pub struct ActiveWorkspace {
    workspace: WorkspaceId,
    tracker: Arc<AccessTracker>,
    scheduler: PrefetchScheduler,
    prefetch_loop: Mutex<Option<JoinHandle<()>>>,
    tabs: TabStateManager,
    router: DocumentRouter,
    runner: MutationRunner,
    drafts: DraftStore,
    _follow: Subscription,
}

impl fmt::Debug for ActiveWorkspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveWorkspace")
            .field("workspace", &self.workspace)
            .field("tabs", &self.tabs)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

impl ActiveWorkspace {
    /// Workspace id
    #[inline]
    #[must_use]
    pub fn workspace(&self) -> &WorkspaceId {
        &self.workspace
    }

    /// Access history
    #[inline]
    #[must_use]
    pub fn tracker(&self) -> &AccessTracker {
        &self.tracker
    }

    /// Prefetch queue
    #[inline]
    #[must_use]
    pub fn scheduler(&self) -> &PrefetchScheduler {
        &self.scheduler
    }

    /// Open tabs
    #[inline]
    #[must_use]
    pub fn tabs(&self) -> &TabStateManager {
        &self.tabs
    }

    /// Navigation state
    #[inline]
    #[must_use]
    pub fn router(&self) -> &DocumentRouter {
        &self.router
    }

    /// Mutation runner
    #[inline]
    #[must_use]
    pub fn runner(&self) -> &MutationRunner {
        &self.runner
    }

    /// Local drafts
    #[inline]
    #[must_use]
    pub fn drafts(&self) -> &DraftStore {
        &self.drafts
    }

    async fn close(&self) {
        self.scheduler.shutdown();
        let handle = self.prefetch_loop.lock().take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                if !error.is_cancelled() {
                    tracing::error!(workspace = %self.workspace, %error, "prefetch loop panicked");
                }
            }
        }
        self.tracker.flush().await;
        self.tabs.flush().await;
    }
}

struct Inner {
    api: Arc<dyn WorkspaceApi>,
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    store: Arc<CacheStore>,
    loader: WorkspaceLoader,
    coordinator: Arc<MutationCoordinator>,
    session: RwLock<Option<Arc<ActiveWorkspace>>>,
    switching: tokio::sync::Mutex<()>,
}

/// Cache and synchronization engine for one active workspace at a time
#[derive(Clone)]
pub struct Workspace {
    inner: Arc<Inner>,
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("active", &self.active())
            .field("store", &self.inner.store)
            .field("loader", &self.inner.loader)
            .finish_non_exhaustive()
    }
}

impl Workspace {
    /// Create an engine with no active workspace
    ///
    /// # Errors
    /// Returns `SyncError::Config` if the configuration is invalid
    pub fn new(
        api: Arc<dyn WorkspaceApi>,
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let store = Arc::new(CacheStore::new(Arc::clone(&clock)));
        let loader = WorkspaceLoader::new(Arc::clone(&api), Arc::clone(&store), Arc::clone(&clock), config.clone());
        let coordinator = Arc::new(MutationCoordinator::new(Arc::clone(&store)));
        Ok(Self {
            inner: Arc::new(Inner {
                api,
                kv,
                clock,
                config,
                store,
                loader,
                coordinator,
                session: RwLock::new(None),
                switching: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Shared cache
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<CacheStore> {
        &self.inner.store
    }

    /// Snapshot loader
    #[inline]
    #[must_use]
    pub fn loader(&self) -> &WorkspaceLoader {
        &self.inner.loader
    }

    /// Mutation coordinator
    #[inline]
    #[must_use]
    pub fn coordinator(&self) -> &Arc<MutationCoordinator> {
        &self.inner.coordinator
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Active workspace id
    #[must_use]
    pub fn active(&self) -> Option<WorkspaceId> {
        self.inner.session.read().as_ref().map(|s| s.workspace.clone())
    }

    /// Components of the active workspace
    ///
    /// # Errors
    /// Returns `SyncError::NotActive` if no workspace is active
    pub fn session(&self) -> Result<Arc<ActiveWorkspace>, SyncError> {
        self.inner.session.read().clone().ok_or(SyncError::NotActive)
    }

    /// Make a workspace active
    ///
    /// Switching to another workspace (or the first activation) blocks on
    /// the snapshot load. Re-activating the current workspace returns at
    /// once and revalidates in the background, followed by a
    /// settle-delayed prefetch cycle. If its snapshot never loaded, the
    /// load is retried in the foreground instead.
    ///
    /// # Errors
    /// The load error of a blocking load
    pub async fn activate(&self, workspace: &WorkspaceId) -> Result<(), SyncError> {
        if self.active().as_ref() != Some(workspace) {
            return self.switch_to(workspace).await.map(|_| ());
        }
        if self.inner.store.get_snapshot().is_loaded() {
            let _revalidation = self.revalidate_in_background()?;
            return Ok(());
        }
        let session = self.session()?;
        let loaded = self.inner.loader.load(workspace).await?;
        if self.is_current(&session) {
            let closed = session.tabs.reconcile();
            tracing::info!(%workspace, entities = loaded.len(), closed_tabs = closed, "workspace load recovered");
        }
        Ok(())
    }

    /// Tear down the current workspace and load another one
    ///
    /// Pending mutations of the previous workspace are discarded and the
    /// cache is cleared before the new snapshot is fetched.
    ///
    /// # Errors
    /// - `SyncError::Storage` if persisted state cannot be read
    /// - the load error if the first snapshot fetch fails; the workspace
    ///   stays active so it can be refreshed
    pub async fn switch_to(&self, workspace: &WorkspaceId) -> LoadResult {
        let _switching = self.inner.switching.lock().await;
        let previous = self.inner.session.write().take();
        if let Some(previous) = previous {
            tracing::info!(from = %previous.workspace, to = %workspace, "switching workspace");
            previous.close().await;
        }
        self.inner.coordinator.reset();
        self.inner.store.clear(Some(workspace.clone()));

        let session = Arc::new(self.build_session(workspace).await?);
        *self.inner.session.write() = Some(Arc::clone(&session));

        let snapshot = self.inner.loader.load(workspace).await;
        match &snapshot {
            Ok(loaded) => {
                let closed = session.tabs.reconcile();
                tracing::info!(
                    %workspace,
                    entities = loaded.len(),
                    rejected = loaded.rejected,
                    closed_tabs = closed,
                    "workspace active"
                );
            }
            Err(error) => tracing::warn!(%workspace, %error, "initial workspace load failed"),
        }
        *session.prefetch_loop.lock() = Some(session.scheduler.spawn());
        snapshot
    }

    async fn build_session(&self, workspace: &WorkspaceId) -> Result<ActiveWorkspace, SyncError> {
        let inner = &self.inner;
        let tracker = Arc::new(
            AccessTracker::load(workspace.clone(), Arc::clone(&inner.kv), Arc::clone(&inner.clock), &inner.config)
                .await?,
        );
        let scheduler = PrefetchScheduler::new(
            workspace.clone(),
            Arc::clone(&inner.api),
            Arc::clone(&inner.store),
            Arc::clone(&tracker),
            Arc::clone(&inner.clock),
            inner.config.clone(),
        );
        let tabs = TabStateManager::load(workspace.clone(), Arc::clone(&inner.store), Arc::clone(&inner.kv)).await?;
        let router = DocumentRouter::new(Arc::clone(&inner.store), workspace.clone(), inner.config.breadcrumb_max_depth)
            .with_prefetch(scheduler.clone());
        let runner = MutationRunner::new(
            workspace.clone(),
            Arc::clone(&inner.api),
            Arc::clone(&inner.store),
            Arc::clone(&inner.coordinator),
            Arc::clone(&inner.clock),
        );
        let drafts = DraftStore::new(workspace, Arc::clone(&inner.kv), Arc::clone(&inner.clock));

        let history = Arc::clone(&tracker);
        let follow = inner
            .store
            .subscribe(Topic::all(EntityKind::Document), move |event: &CacheEvent| match &event.change {
                Change::Rekeyed { from, .. } => history.rekey(from, &event.id),
                Change::Removed => history.forget(&event.id),
                _ => {}
            });

        Ok(ActiveWorkspace {
            workspace: workspace.clone(),
            tracker,
            scheduler,
            prefetch_loop: Mutex::new(None),
            tabs,
            router,
            runner,
            drafts,
            _follow: follow,
        })
    }

    fn revalidate_in_background(&self) -> Result<JoinHandle<()>, SyncError> {
        let session = self.session()?;
        let weak: Weak<ActiveWorkspace> = Arc::downgrade(&session);
        let workspace = session.workspace.clone();
        drop(session);
        let engine = self.clone();
        Ok(tokio::spawn(async move {
            match engine.inner.loader.load(&workspace).await {
                Ok(_) => {
                    // a switch may have happened while loading
                    if let Some(session) = weak.upgrade().filter(|s| engine.is_current(s)) {
                        session.tabs.reconcile();
                    }
                }
                Err(error) => {
                    tracing::warn!(%workspace, %error, "background revalidation failed, serving cached snapshot");
                }
            }
            tokio::time::sleep(engine.inner.config.settle_delay()).await;
            if let Some(session) = weak.upgrade().filter(|s| engine.is_current(s)) {
                session.scheduler.trigger();
            }
        }))
    }

    fn is_current(&self, session: &Arc<ActiveWorkspace>) -> bool {
        self.inner
            .session
            .read()
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, session))
    }

    /// Fetch a new snapshot now, superseding any load in flight
    ///
    /// # Errors
    /// `SyncError::NotActive`, or the load error; the cached snapshot is kept
    pub async fn refresh(&self) -> LoadResult {
        let session = self.session()?;
        let snapshot = self.inner.loader.reload(&session.workspace).await?;
        if self.is_current(&session) {
            session.tabs.reconcile();
        }
        Ok(snapshot)
    }

    /// Open a document: record the access, focus its tab and route, refetch if needed
    ///
    /// # Errors
    /// `SyncError::NotActive` if no workspace is active
    pub fn open_document(&self, id: &EntityId) -> Result<TabId, SyncError> {
        let session = self.session()?;
        let id = self.inner.coordinator.resolve(id);
        let route = Route::Document {
            workspace: session.workspace.clone(),
            id: id.clone(),
        };
        session.router.navigate(&route.to_string())?;
        Ok(self.visit_document(&session, &id))
    }

    /// Follow a location; document and folder routes open a tab
    ///
    /// # Errors
    /// - `SyncError::NotActive` if no workspace is active
    /// - `SyncError::Navigation` for unknown routes or another workspace
    pub fn navigate(&self, location: &str) -> Result<Route, SyncError> {
        let session = self.session()?;
        let route = session.router.navigate(location)?;
        match &route {
            Route::Document { id, .. } => {
                let id = self.inner.coordinator.resolve(id);
                self.visit_document(&session, &id);
            }
            Route::Folder { id, .. } => {
                session.tabs.open(TabKind::Folder, &self.inner.coordinator.resolve(id));
            }
            Route::Workspace(_) => {}
        }
        Ok(route)
    }

    fn visit_document(&self, session: &ActiveWorkspace, id: &EntityId) -> TabId {
        session.tracker.record(id);
        let tab = session.tabs.open_document(id);
        let store = &self.inner.store;
        match store.get(EntityKind::Document, id).map(|e| e.state) {
            Some(EntryState::Fresh | EntryState::Pending) => {}
            Some(_) => {
                if session.scheduler.enqueue([id.clone()]) > 0 {
                    session.scheduler.trigger();
                }
            }
            None if !id.is_temporary() => {
                let api = Arc::clone(&self.inner.api);
                let store = Arc::clone(store);
                let workspace = session.workspace.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    if let Err(error) = fetch_body(api.as_ref(), &store, &workspace, &id).await {
                        tracing::warn!(%workspace, document = %id, %error, "opening document fetch failed");
                    }
                });
            }
            None => {}
        }
        tab
    }

    /// Breadcrumbs for the current route
    ///
    /// # Errors
    /// `SyncError::NotActive`, or a cycle / depth error
    pub fn breadcrumbs(&self) -> Result<Vec<Breadcrumb>, SyncError> {
        Ok(self.session()?.router.breadcrumbs()?)
    }

    /// Open tabs in display order; empty when no workspace is active
    #[must_use]
    pub fn tabs(&self) -> Vec<Tab> {
        self.session().map(|s| s.tabs.tabs()).unwrap_or_default()
    }

    /// Subscribe to cache changes
    pub fn subscribe<F>(&self, topic: Topic, callback: F) -> Subscription
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.inner.store.subscribe(topic, callback)
    }

    /// Consistent read-only view of every collection
    #[must_use]
    pub fn get_snapshot(&self) -> StoreSnapshot {
        self.inner.store.get_snapshot()
    }

    /// Current engine status
    #[must_use]
    pub fn status(&self) -> WorkspaceStatus {
        let session = self.session().ok();
        WorkspaceStatus {
            workspace: session.as_ref().map(|s| s.workspace.clone()),
            load: self.inner.loader.status(),
            pending_mutations: self.inner.coordinator.pending().len(),
            open_tabs: session.as_ref().map_or(0, |s| s.tabs.tabs().len()),
            prefetch_cycles: session.as_ref().map_or(0, |s| s.scheduler.cycles()),
            queued_prefetches: session.as_ref().map_or(0, |s| s.scheduler.queued().len()),
        }
    }

    /// Create a document optimistically
    ///
    /// # Errors
    /// `SyncError::NotActive` or the optimistic apply failure
    pub fn create_document(&self, document: NewDocument) -> Result<MutationTicket, SyncError> {
        self.session()?.runner.create_document(document)
    }

    /// Patch a document optimistically
    ///
    /// # Errors
    /// `SyncError::NotActive` or `NotFound`
    pub fn update_document(&self, id: &EntityId, patch: DocumentPatch) -> Result<MutationTicket, SyncError> {
        self.session()?.runner.update_document(id, patch)
    }

    /// Rename a document optimistically
    ///
    /// # Errors
    /// `SyncError::NotActive` or `NotFound`
    pub fn rename_document(&self, id: &EntityId, title: impl Into<String>) -> Result<MutationTicket, SyncError> {
        self.session()?.runner.rename_document(id, title)
    }

    /// Move a document optimistically
    ///
    /// # Errors
    /// `SyncError::NotActive` or `NotFound`
    pub fn move_document(&self, id: &EntityId, folder: Option<EntityId>) -> Result<MutationTicket, SyncError> {
        self.session()?.runner.move_document(id, folder)
    }

    /// Replace a document body optimistically
    ///
    /// # Errors
    /// `SyncError::NotActive` or `NotFound`
    pub fn edit_document(&self, id: &EntityId, content: impl Into<String>) -> Result<MutationTicket, SyncError> {
        self.session()?.runner.edit_document(id, content)
    }

    /// Delete a document optimistically
    ///
    /// # Errors
    /// `SyncError::NotActive` or `NotFound`
    pub fn delete_document(&self, id: &EntityId) -> Result<MutationTicket, SyncError> {
        self.session()?.runner.delete_document(id)
    }

    /// Create a folder optimistically
    ///
    /// # Errors
    /// `SyncError::NotActive` or the optimistic apply failure
    pub fn create_folder(&self, folder: NewFolder) -> Result<MutationTicket, SyncError> {
        self.session()?.runner.create_folder(folder)
    }

    /// Patch a folder optimistically
    ///
    /// # Errors
    /// `SyncError::NotActive` or `NotFound`
    pub fn update_folder(&self, id: &EntityId, patch: FolderPatch) -> Result<MutationTicket, SyncError> {
        self.session()?.runner.update_folder(id, patch)
    }

    /// Rename a folder optimistically
    ///
    /// # Errors
    /// `SyncError::NotActive` or `NotFound`
    pub fn rename_folder(&self, id: &EntityId, name: impl Into<String>) -> Result<MutationTicket, SyncError> {
        self.session()?.runner.rename_folder(id, name)
    }

    /// Delete a folder optimistically
    ///
    /// # Errors
    /// `SyncError::NotActive` or `NotFound`
    pub fn delete_folder(&self, id: &EntityId) -> Result<MutationTicket, SyncError> {
        self.session()?.runner.delete_folder(id)
    }

    /// Drafts left over from a previous session, classified against the cache
    ///
    /// # Errors
    /// `SyncError::NotActive` or a storage error
    pub async fn recover_drafts(&self) -> Result<Vec<Recovery>, SyncError> {
        let session = self.session()?;
        session.drafts.recover(&self.inner.store).await
    }

    /// Wait for persisted access history and tabs to reach storage
    pub async fn flush(&self) {
        if let Ok(session) = self.session() {
            session.tracker.flush().await;
            session.tabs.flush().await;
        }
    }

    /// Stop background work and flush state; the workspace becomes inactive
    pub async fn shutdown(&self) {
        let _switching = self.inner.switching.lock().await;
        let session = self.inner.session.write().take();
        if let Some(session) = session {
            session.close().await;
            tracing::info!(workspace = %session.workspace, "workspace closed");
        }
    }
}
