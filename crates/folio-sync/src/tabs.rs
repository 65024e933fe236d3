//! Open-tab state
//!
//! Tabs are a view over cache ids plus ordering and dirty metadata. They
//! follow the cache through subscriptions: titles update when the entity
//! changes, a tab moves with its entity when a temporary id is replaced,
//! and it closes when the entity is removed. A tab whose entity has not
//! arrived yet is an explicit loading placeholder.
//!
//! All workspaces share one storage key; each tab records its workspace and
//! only the active workspace's tabs are loaded.

use crate::error::SyncError;
use crate::kv::{decode, KvStore};
use crate::persist::PersistHandle;
use folio_cache::{CacheEvent, CacheStore, Change, Subscription, Topic};
use folio_model::{EntityId, EntityKind, WorkspaceId};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use ulid::Ulid;

/// Storage key shared by all workspaces
pub const TABS_KEY: &str = "tabs";

/// Tab identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub Ulid);

impl TabId {
    /// Generate new tab ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TabId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab-{}", self.0)
    }
}

/// What a tab shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabKind {
    /// A document editor
    Document,
    /// A folder listing
    Folder,
    /// The workspace overview
    Workspace,
}

impl TabKind {
    /// Cache collection backing this tab, if any
    #[must_use]
    pub fn entity_kind(self) -> Option<EntityKind> {
        match self {
            Self::Document => Some(EntityKind::Document),
            Self::Folder => Some(EntityKind::Folder),
            Self::Workspace => None,
        }
    }

    fn for_entity(kind: EntityKind) -> Option<Self> {
        match kind {
            EntityKind::Document => Some(Self::Document),
            EntityKind::Folder => Some(Self::Folder),
            EntityKind::Source => None,
        }
    }
}

/// One open tab
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    /// Tab id
    pub id: TabId,
    /// What the tab shows
    pub kind: TabKind,
    /// Entity shown (the workspace id for workspace tabs)
    pub entity_id: EntityId,
    /// Title as last seen in the cache
    pub title: String,
    /// Unsaved local edits
    pub is_dirty: bool,
    /// Workspace the tab belongs to
    pub workspace_id: WorkspaceId,
    /// Entity not in the cache yet
    #[serde(default)]
    pub loading: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedTabs {
    tabs: Vec<Tab>,
    #[serde(default)]
    active: BTreeMap<WorkspaceId, TabId>,
}

#[derive(Debug)]
struct TabState {
    workspace: WorkspaceId,
    tabs: IndexMap<TabId, Tab>,
    active: Option<TabId>,
    foreign: PersistedTabs,
}

impl TabState {
    fn find(&self, kind: TabKind, entity_id: &EntityId) -> Option<TabId> {
        self.tabs
            .values()
            .find(|t| t.kind == kind && &t.entity_id == entity_id)
            .map(|t| t.id)
    }

    fn remove(&mut self, id: TabId) -> bool {
        let Some(index) = self.tabs.get_index_of(&id) else {
            return false;
        };
        self.tabs.shift_remove_index(index);
        if self.active == Some(id) {
            let neighbour = index.min(self.tabs.len().saturating_sub(1));
            self.active = self.tabs.get_index(neighbour).map(|(id, _)| *id);
        }
        true
    }

    fn persisted(&self) -> PersistedTabs {
        let mut tabs = self.foreign.tabs.clone();
        tabs.extend(self.tabs.values().cloned());
        let mut active = self.foreign.active.clone();
        match self.active {
            Some(id) => {
                active.insert(self.workspace.clone(), id);
            }
            None => {
                active.remove(&self.workspace);
            }
        }
        PersistedTabs { tabs, active }
    }

    fn apply(&mut self, event: &CacheEvent) -> bool {
        let Some(kind) = TabKind::for_entity(event.kind) else {
            return false;
        };
        match &event.change {
            Change::Updated(entity) => {
                let mut changed = false;
                for tab in self.tabs.values_mut() {
                    if tab.kind == kind && tab.entity_id == event.id && (tab.title != entity.title() || tab.loading) {
                        tab.title = entity.title().to_string();
                        tab.loading = false;
                        changed = true;
                    }
                }
                changed
            }
            Change::Rekeyed { from, entity } => {
                let mut changed = false;
                for tab in self.tabs.values_mut() {
                    if tab.kind == kind && &tab.entity_id == from {
                        tracing::debug!(tab = %tab.id, from = %from, to = %event.id, "tab rekeyed");
                        tab.entity_id = event.id.clone();
                        tab.title = entity.title().to_string();
                        tab.loading = false;
                        changed = true;
                    }
                }
                changed
            }
            Change::Removed => {
                let doomed: Vec<TabId> = self
                    .tabs
                    .values()
                    .filter(|t| t.kind == kind && t.entity_id == event.id)
                    .map(|t| t.id)
                    .collect();
                for id in &doomed {
                    tracing::debug!(tab = %id, entity = %event.id, "closing tab of removed entity");
                    self.remove(*id);
                }
                !doomed.is_empty()
            }
            Change::Hidden | Change::StateChanged(_) => false,
        }
    }
}

/// Open tabs of the active workspace
pub struct TabStateManager {
    state: Arc<Mutex<TabState>>,
    store: Arc<CacheStore>,
    writer: PersistHandle,
    _subscriptions: Vec<Subscription>,
}

impl fmt::Debug for TabStateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TabStateManager")
            .field("workspace", &state.workspace)
            .field("tabs", &state.tabs.len())
            .field("active", &state.active)
            .finish_non_exhaustive()
    }
}

impl TabStateManager {
    /// Restore persisted tabs for `workspace` and start following the cache
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// Returns `SyncError::Storage` if the store cannot be read
    pub async fn load(workspace: WorkspaceId, store: Arc<CacheStore>, kv: Arc<dyn KvStore>) -> Result<Self, SyncError> {
        let persisted: PersistedTabs = match kv.get(TABS_KEY).await? {
            Some(value) => decode(TABS_KEY, value).unwrap_or_else(|error| {
                tracing::warn!(%error, "discarding unreadable tab state");
                PersistedTabs::default()
            }),
            None => PersistedTabs::default(),
        };

        let PersistedTabs { tabs, mut active } = persisted;
        let (ours, theirs): (Vec<Tab>, Vec<Tab>) = tabs.into_iter().partition(|t| t.workspace_id == workspace);
        let our_active = active.remove(&workspace);
        let mut state = TabState {
            workspace: workspace.clone(),
            tabs: IndexMap::new(),
            active: None,
            foreign: PersistedTabs { tabs: theirs, active },
        };
        for mut tab in ours {
            resolve(&store, &mut tab);
            state.tabs.insert(tab.id, tab);
        }
        state.active = our_active.filter(|id| state.tabs.contains_key(id));
        tracing::debug!(%workspace, tabs = state.tabs.len(), "tabs restored");

        let state = Arc::new(Mutex::new(state));
        let source = Arc::clone(&state);
        let writer = PersistHandle::spawn(kv, TABS_KEY, move || serde_json::to_value(source.lock().persisted()).ok());

        let subscriptions = [EntityKind::Document, EntityKind::Folder]
            .into_iter()
            .map(|kind| {
                let weak: Weak<Mutex<TabState>> = Arc::downgrade(&state);
                let writer = writer.clone();
                store.subscribe(Topic::all(kind), move |event| {
                    let Some(state) = weak.upgrade() else {
                        return;
                    };
                    let changed = state.lock().apply(event);
                    if changed {
                        writer.mark_dirty();
                    }
                })
            })
            .collect();

        Ok(Self {
            state,
            store,
            writer,
            _subscriptions: subscriptions,
        })
    }

    /// Open (or focus) a tab for an entity; returns its id
    pub fn open(&self, kind: TabKind, entity_id: &EntityId) -> TabId {
        let mut tab = Tab {
            id: TabId::new(),
            kind,
            entity_id: entity_id.clone(),
            title: String::new(),
            is_dirty: false,
            workspace_id: self.state.lock().workspace.clone(),
            loading: false,
        };
        resolve(&self.store, &mut tab);

        let id = {
            let mut state = self.state.lock();
            match state.find(kind, entity_id) {
                Some(existing) => {
                    state.active = Some(existing);
                    existing
                }
                None => {
                    let id = tab.id;
                    tracing::debug!(tab = %id, entity = %entity_id, loading = tab.loading, "tab opened");
                    state.tabs.insert(id, tab);
                    state.active = Some(id);
                    id
                }
            }
        };
        self.writer.mark_dirty();
        id
    }

    /// Open (or focus) a document tab
    pub fn open_document(&self, id: &EntityId) -> TabId {
        self.open(TabKind::Document, id)
    }

    /// Open (or focus) the workspace overview tab
    pub fn open_workspace(&self) -> TabId {
        let workspace = EntityId::new(self.state.lock().workspace.as_str());
        self.open(TabKind::Workspace, &workspace)
    }

    /// Close a tab; the next tab to the right (or left) becomes active
    pub fn close(&self, id: TabId) -> bool {
        let closed = self.state.lock().remove(id);
        if closed {
            self.writer.mark_dirty();
        }
        closed
    }

    /// Make a tab active
    pub fn activate(&self, id: TabId) -> bool {
        let activated = {
            let mut state = self.state.lock();
            let known = state.tabs.contains_key(&id);
            if known {
                state.active = Some(id);
            }
            known
        };
        if activated {
            self.writer.mark_dirty();
        }
        activated
    }

    /// Move the tab at `from` to position `to`
    pub fn reorder(&self, from: usize, to: usize) -> bool {
        let moved = {
            let mut state = self.state.lock();
            let len = state.tabs.len();
            if from < len && to < len {
                state.tabs.move_index(from, to);
                true
            } else {
                false
            }
        };
        if moved {
            self.writer.mark_dirty();
        }
        moved
    }

    /// Flag unsaved edits
    pub fn set_dirty(&self, id: TabId, dirty: bool) -> bool {
        let updated = match self.state.lock().tabs.get_mut(&id) {
            Some(tab) => {
                tab.is_dirty = dirty;
                true
            }
            None => false,
        };
        if updated {
            self.writer.mark_dirty();
        }
        updated
    }

    /// Re-check every tab against the cache after a snapshot load
    ///
    /// Titles are refreshed and placeholders whose entity still does not
    /// exist are closed. Returns how many tabs were closed.
    pub fn reconcile(&self) -> usize {
        let current: Vec<Tab> = self.state.lock().tabs.values().cloned().collect();
        let mut missing = Vec::new();
        let mut refreshed = Vec::new();
        for mut tab in current {
            resolve(&self.store, &mut tab);
            if tab.loading {
                missing.push(tab.id);
            } else {
                refreshed.push(tab);
            }
        }
        {
            let mut state = self.state.lock();
            for tab in refreshed {
                if let Some(slot) = state.tabs.get_mut(&tab.id) {
                    slot.title = tab.title;
                    slot.loading = false;
                }
            }
            for id in &missing {
                state.remove(*id);
            }
        }
        if !missing.is_empty() {
            tracing::info!(closed = missing.len(), "closed tabs whose entity no longer exists");
        }
        self.writer.mark_dirty();
        missing.len()
    }

    /// Tabs in display order
    #[must_use]
    pub fn tabs(&self) -> Vec<Tab> {
        self.state.lock().tabs.values().cloned().collect()
    }

    /// Active tab
    #[must_use]
    pub fn active(&self) -> Option<Tab> {
        let state = self.state.lock();
        state.active.and_then(|id| state.tabs.get(&id).cloned())
    }

    /// Tab showing an entity
    #[must_use]
    pub fn find(&self, kind: TabKind, entity_id: &EntityId) -> Option<Tab> {
        let state = self.state.lock();
        state.find(kind, entity_id).and_then(|id| state.tabs.get(&id).cloned())
    }

    /// Wait for pending writes to reach storage
    pub async fn flush(&self) {
        self.writer.flush().await;
    }
}

/// Refresh title and placeholder flag from the cache
fn resolve(store: &CacheStore, tab: &mut Tab) {
    let Some(kind) = tab.kind.entity_kind() else {
        tab.title = tab.workspace_id.to_string();
        tab.loading = false;
        return;
    };
    match store.get(kind, &tab.entity_id) {
        Some(entry) => {
            tab.title = entry.data.title().to_string();
            tab.loading = false;
        }
        None => tab.loading = true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use chrono::{DateTime, Utc};
    use folio_model::{Document, Entity};

    fn doc(id: &str, title: &str) -> Entity {
        Entity::Document(Document {
            id: EntityId::new(id),
            title: title.to_string(),
            folder_id: None,
            content: None,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
            version: 1,
        })
    }

    async fn manager(store: &Arc<CacheStore>, kv: &Arc<MemoryKvStore>, ws: &str) -> TabStateManager {
        TabStateManager::load(WorkspaceId::new(ws), Arc::clone(store), kv.clone())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn open_dedups_and_activates() {
        let store = Arc::new(CacheStore::default());
        let kv = Arc::new(MemoryKvStore::new());
        store.upsert(EntityKind::Document, vec![doc("d1", "One")]).unwrap();
        let tabs = manager(&store, &kv, "w1").await;

        let a = tabs.open_document(&EntityId::new("d1"));
        let b = tabs.open_document(&EntityId::new("d2"));
        assert_eq!(tabs.open_document(&EntityId::new("d1")), a);
        assert_eq!(tabs.tabs().len(), 2);
        assert_eq!(tabs.active().unwrap().id, a);
        assert_eq!(tabs.tabs()[0].title, "One");
        assert!(tabs.find(TabKind::Document, &EntityId::new("d2")).unwrap().loading);
        assert!(tabs.close(b));
        assert!(!tabs.close(b));
    }

    #[tokio::test]
    async fn placeholder_resolves_and_title_follows_cache() {
        let store = Arc::new(CacheStore::default());
        let kv = Arc::new(MemoryKvStore::new());
        let tabs = manager(&store, &kv, "w1").await;
        tabs.open_document(&EntityId::new("d1"));
        assert!(tabs.tabs()[0].loading);

        store.upsert(EntityKind::Document, vec![doc("d1", "Arrived")]).unwrap();
        assert_eq!(tabs.tabs()[0].title, "Arrived");
        assert!(!tabs.tabs()[0].loading);

        store.upsert(EntityKind::Document, vec![doc("d1", "Renamed")]).unwrap();
        assert_eq!(tabs.tabs()[0].title, "Renamed");
    }

    #[tokio::test]
    async fn removal_closes_and_moves_focus() {
        let store = Arc::new(CacheStore::default());
        let kv = Arc::new(MemoryKvStore::new());
        store
            .upsert(EntityKind::Document, vec![doc("d1", "One"), doc("d2", "Two")])
            .unwrap();
        let tabs = manager(&store, &kv, "w1").await;
        let first = tabs.open_document(&EntityId::new("d1"));
        let second = tabs.open_document(&EntityId::new("d2"));
        tabs.activate(first);

        store.evict(EntityKind::Document, &EntityId::new("d1"), true);
        assert_eq!(tabs.tabs().len(), 1);
        assert_eq!(tabs.active().unwrap().id, second);
    }

    #[tokio::test]
    async fn reorder_and_dirty() {
        let store = Arc::new(CacheStore::default());
        let kv = Arc::new(MemoryKvStore::new());
        let tabs = manager(&store, &kv, "w1").await;
        let a = tabs.open_document(&EntityId::new("a"));
        let b = tabs.open_document(&EntityId::new("b"));
        assert!(tabs.reorder(1, 0));
        assert_eq!(tabs.tabs().iter().map(|t| t.id).collect::<Vec<_>>(), vec![b, a]);
        assert!(!tabs.reorder(5, 0));
        assert!(tabs.set_dirty(a, true));
        assert!(tabs.find(TabKind::Document, &EntityId::new("a")).unwrap().is_dirty);
    }

    #[tokio::test]
    async fn persisted_tabs_are_filtered_by_workspace() {
        let store = Arc::new(CacheStore::default());
        let kv = Arc::new(MemoryKvStore::new());
        {
            let w1 = manager(&store, &kv, "w1").await;
            w1.open_document(&EntityId::new("d1"));
            w1.flush().await;
        }
        {
            let w2 = manager(&store, &kv, "w2").await;
            assert!(w2.tabs().is_empty());
            w2.open_document(&EntityId::new("d9"));
            w2.flush().await;
        }
        let w1 = manager(&store, &kv, "w1").await;
        let restored = w1.tabs();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].entity_id, EntityId::new("d1"));
        assert_eq!(w1.active().unwrap().id, restored[0].id);
    }

    #[tokio::test]
    async fn reconcile_closes_missing_placeholders() {
        let store = Arc::new(CacheStore::default());
        let kv = Arc::new(MemoryKvStore::new());
        let tabs = manager(&store, &kv, "w1").await;
        tabs.open_document(&EntityId::new("gone"));
        tabs.open_workspace();
        assert_eq!(tabs.reconcile(), 1);
        assert_eq!(tabs.tabs().len(), 1);
        assert_eq!(tabs.tabs()[0].kind, TabKind::Workspace);
    }
}
