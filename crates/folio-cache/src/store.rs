//! Canonical workspace store
//!
//! [`CacheStore`] is the only mutable resource in the engine. Everything
//! else reads through `get`/`get_snapshot` and writes through `upsert`,
//! `patch`, `invalidate` and the layer operations used by the mutation
//! coordinator. Collections are persistent maps, so a snapshot is a cheap
//! clone that later writes never disturb.

use crate::entry::{landing_state, written_fields, CacheEntry, EntryState, Layer, LayerOp, LayerTag, PatchTag, Slot};
use crate::error::CacheError;
use crate::events::{CacheEvent, Change, Registry, Subscription, Topic};
use chrono::{DateTime, Duration, Utc};
use folio_model::{
    Clock, Document, Entity, EntityId, EntityKind, EntityPatch, Field, Folder, MutationId, Source,
    SystemClock, WorkspaceId, WorkspaceSnapshot,
};
use im::{HashSet, OrdMap};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default capacity of the async change channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Default)]
struct Collections {
    documents: OrdMap<EntityId, Slot>,
    folders: OrdMap<EntityId, Slot>,
    sources: OrdMap<EntityId, Slot>,
}

impl Collections {
    fn of(&self, kind: EntityKind) -> &OrdMap<EntityId, Slot> {
        match kind {
            EntityKind::Document => &self.documents,
            EntityKind::Folder => &self.folders,
            EntityKind::Source => &self.sources,
        }
    }

    fn of_mut(&mut self, kind: EntityKind) -> &mut OrdMap<EntityId, Slot> {
        match kind {
            EntityKind::Document => &mut self.documents,
            EntityKind::Folder => &mut self.folders,
            EntityKind::Source => &mut self.sources,
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    workspace: Option<WorkspaceId>,
    collections: Collections,
    tombstones: HashSet<(EntityKind, EntityId)>,
    fetched_at: Option<DateTime<Utc>>,
    generation: u64,
}

/// Point-in-time read view of the whole store
///
/// Taken in O(1); never observes a half-applied snapshot replacement.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    /// Active workspace
    pub workspace: Option<WorkspaceId>,
    /// Write counter at the time the snapshot was taken
    pub generation: u64,
    /// When the last full snapshot was fetched
    pub fetched_at: Option<DateTime<Utc>>,
    collections: Collections,
}

impl StoreSnapshot {
    /// Entry for one key
    #[must_use]
    pub fn get(&self, kind: EntityKind, id: &EntityId) -> Option<CacheEntry<Entity>> {
        self.collections.of(kind).get(id).and_then(Slot::entry)
    }

    /// Every visible entry of one kind, ordered by id
    #[must_use]
    pub fn entries(&self, kind: EntityKind) -> Vec<CacheEntry<Entity>> {
        self.collections
            .of(kind)
            .values()
            .filter_map(Slot::entry)
            .collect()
    }

    /// Every visible document
    #[must_use]
    pub fn documents(&self) -> Vec<CacheEntry<Document>> {
        self.entries(EntityKind::Document)
            .into_iter()
            .filter_map(CacheEntry::into_document)
            .collect()
    }

    /// Every visible folder
    #[must_use]
    pub fn folders(&self) -> Vec<CacheEntry<Folder>> {
        self.entries(EntityKind::Folder)
            .into_iter()
            .filter_map(CacheEntry::into_folder)
            .collect()
    }

    /// Every visible source
    #[must_use]
    pub fn sources(&self) -> Vec<CacheEntry<Source>> {
        self.entries(EntityKind::Source)
            .into_iter()
            .filter_map(CacheEntry::into_source)
            .collect()
    }

    /// Whether a full snapshot has ever been loaded
    #[inline]
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.fetched_at.is_some()
    }
}

/// Canonical keyed store for all cached entities
pub struct CacheStore {
    state: RwLock<StoreState>,
    subscribers: Arc<Registry>,
    events: broadcast::Sender<CacheEvent>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("CacheStore")
            .field("workspace", &state.workspace)
            .field("generation", &state.generation)
            .field("documents", &state.collections.documents.len())
            .field("folders", &state.collections.folders.len())
            .field("sources", &state.collections.sources.len())
            .field("subscribers", &self.subscribers)
            .finish()
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl CacheStore {
    /// Create an empty store
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(StoreState::default()),
            subscribers: Arc::new(Registry::default()),
            events,
            clock,
        }
    }

    /// Run a write under the lock, then publish its events with the lock released
    fn write<R>(&self, f: impl FnOnce(&mut StoreState, DateTime<Utc>, &mut Vec<CacheEvent>) -> R) -> R {
        let now = self.clock.now();
        let mut events = Vec::new();
        let result = {
            let mut state = self.state.write();
            let result = f(&mut state, now, &mut events);
            if !events.is_empty() {
                state.generation += 1;
            }
            result
        };
        self.publish(events);
        result
    }

    fn publish(&self, events: Vec<CacheEvent>) {
        for event in events {
            // no receivers is fine
            let _ = self.events.send(event.clone());
            self.subscribers.dispatch(&event);
        }
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Visible entry for a key; no side effects
    #[must_use]
    pub fn get(&self, kind: EntityKind, id: &EntityId) -> Option<CacheEntry<Entity>> {
        self.state.read().collections.of(kind).get(id).and_then(Slot::entry)
    }

    /// Typed document read
    #[must_use]
    pub fn get_document(&self, id: &EntityId) -> Option<CacheEntry<Document>> {
        self.get(EntityKind::Document, id)
            .and_then(CacheEntry::into_document)
    }

    /// Typed folder read
    #[must_use]
    pub fn get_folder(&self, id: &EntityId) -> Option<CacheEntry<Folder>> {
        self.get(EntityKind::Folder, id).and_then(CacheEntry::into_folder)
    }

    /// Typed source read
    #[must_use]
    pub fn get_source(&self, id: &EntityId) -> Option<CacheEntry<Source>> {
        self.get(EntityKind::Source, id).and_then(CacheEntry::into_source)
    }

    /// Visible ids of one kind
    #[must_use]
    pub fn ids(&self, kind: EntityKind) -> Vec<EntityId> {
        self.state
            .read()
            .collections
            .of(kind)
            .iter()
            .filter(|(_, slot)| slot.visible().is_some())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Whether a key is visible
    #[must_use]
    pub fn contains(&self, kind: EntityKind, id: &EntityId) -> bool {
        self.get(kind, id).is_some()
    }

    /// Provenance of one field of a visible entity
    #[must_use]
    pub fn field_tag(&self, kind: EntityKind, id: &EntityId, field: Field) -> Option<PatchTag> {
        self.state
            .read()
            .collections
            .of(kind)
            .get(id)
            .and_then(|slot| slot.field_tag(field))
    }

    /// Whether any live optimistic layer sits on a key
    #[must_use]
    pub fn has_pending_layers(&self, kind: EntityKind, id: &EntityId) -> bool {
        self.state
            .read()
            .collections
            .of(kind)
            .get(id)
            .is_some_and(Slot::has_live_layers)
    }

    /// Whether a confirmed delete removed this key
    #[must_use]
    pub fn is_tombstoned(&self, kind: EntityKind, id: &EntityId) -> bool {
        self.state.read().tombstones.contains(&(kind, id.clone()))
    }

    /// Active workspace
    #[must_use]
    pub fn workspace(&self) -> Option<WorkspaceId> {
        self.state.read().workspace.clone()
    }

    /// O(1) point-in-time view for synchronous rendering
    #[must_use]
    pub fn get_snapshot(&self) -> StoreSnapshot {
        let state = self.state.read();
        StoreSnapshot {
            workspace: state.workspace.clone(),
            generation: state.generation,
            fetched_at: state.fetched_at,
            collections: state.collections.clone(),
        }
    }

    // ---------------------------------------------------------------------
    // Subscriptions
    // ---------------------------------------------------------------------

    /// Register a callback for a topic; drop the returned guard to unsubscribe
    ///
    /// Callbacks run on the writing task after the store lock is released.
    pub fn subscribe<F>(&self, topic: Topic, callback: F) -> Subscription
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.subscribers.add(topic, Arc::new(callback))
    }

    /// Async stream of every change
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    // ---------------------------------------------------------------------
    // Authoritative writes
    // ---------------------------------------------------------------------

    /// Merge fetched entities by id
    ///
    /// Fields written here supersede every optimistic layer that wrote them.
    /// Tombstoned ids are skipped.
    ///
    /// # Errors
    /// Returns `CacheError::KindMismatch` if an entity is not of `kind`;
    /// nothing is written in that case
    pub fn upsert(&self, kind: EntityKind, entities: Vec<Entity>) -> Result<usize, CacheError> {
        if let Some(bad) = entities.iter().find(|e| e.kind() != kind) {
            return Err(CacheError::KindMismatch {
                expected: kind,
                found: bad.kind(),
            });
        }
        Ok(self.write(|state, now, events| {
            let mut written = 0;
            for entity in entities {
                let id = entity.id().clone();
                if state.tombstones.contains(&(kind, id.clone())) {
                    tracing::debug!(%kind, %id, "skipping upsert of deleted entity");
                    continue;
                }
                let collection = state.collections.of_mut(kind);
                let mut slot = collection.get(&id).cloned().unwrap_or_default();
                let before = slot.visible();
                let base = merge_base(slot.confirmed.as_ref(), entity);
                slot.strip(&written_fields(&base), None);
                slot.state = landing_state(&base);
                slot.confirmed = Some(base);
                slot.last_fetched = Some(now);
                let after = slot.visible();
                collection.insert(id.clone(), slot);
                push_visible_change(events, kind, id, before, after);
                written += 1;
            }
            written
        }))
    }

    /// Apply a partial update under a tag
    ///
    /// Optimistic patches become a new layer owned by the tag's mutation.
    /// Authoritative patches rewrite the confirmed value and supersede the
    /// written fields in every layer.
    ///
    /// # Errors
    /// - `CacheError::NotFound` if the key is not visible
    /// - `CacheError::KindMismatch` if the patch is for another kind
    pub fn patch(
        &self,
        kind: EntityKind,
        id: &EntityId,
        patch: EntityPatch,
        tag: PatchTag,
    ) -> Result<(), CacheError> {
        if patch.kind() != kind {
            return Err(CacheError::KindMismatch {
                expected: kind,
                found: patch.kind(),
            });
        }
        self.write(|state, now, events| {
            let collection = state.collections.of_mut(kind);
            let slot = collection
                .get_mut(id)
                .filter(|slot| slot.visible().is_some())
                .ok_or_else(|| CacheError::not_found(kind, id))?;
            let before = slot.visible();
            match tag {
                PatchTag::Optimistic(layer) => slot.layers.push(Layer {
                    tag: layer,
                    op: LayerOp::Patch(patch),
                }),
                PatchTag::Authoritative => {
                    let confirmed = slot
                        .confirmed
                        .as_mut()
                        .ok_or_else(|| CacheError::not_found(kind, id))?;
                    confirmed.apply(&patch).map_err(|_| CacheError::KindMismatch {
                        expected: kind,
                        found: patch.kind(),
                    })?;
                    slot.strip(&patch.fields(), None);
                    slot.last_fetched = Some(now);
                }
            }
            let after = slot.visible();
            push_visible_change(events, kind, id.clone(), before, after);
            Ok(())
        })
    }

    /// Mark one key, or every key of a kind, as stale
    ///
    /// Returns how many entries changed state.
    pub fn invalidate(&self, kind: EntityKind, id: Option<&EntityId>) -> usize {
        self.write(|state, _, events| {
            let collection = state.collections.of_mut(kind);
            let ids: Vec<EntityId> = match id {
                Some(id) => vec![id.clone()],
                None => collection.keys().cloned().collect(),
            };
            let mut changed = 0;
            for id in ids {
                if let Some(slot) = collection.get_mut(&id) {
                    if slot.state != EntryState::Stale {
                        slot.state = EntryState::Stale;
                        events.push(CacheEvent::new(kind, id, Change::StateChanged(EntryState::Stale)));
                        changed += 1;
                    }
                }
            }
            changed
        })
    }

    /// Replace every collection with a freshly fetched snapshot, atomically
    ///
    /// Pending optimistic layers are rebased onto the new confirmed values.
    /// Keys missing from the snapshot are dropped unless they exist only as
    /// optimistic creations.
    pub fn replace_snapshot(&self, snapshot: &WorkspaceSnapshot) {
        self.write(|state, now, events| {
            state.workspace = Some(snapshot.workspace_id.clone());
            for kind in EntityKind::ALL {
                let old = state.collections.of(kind).clone();
                let mut next = OrdMap::new();
                for entity in snapshot.entities(kind) {
                    let id = entity.id().clone();
                    if state.tombstones.contains(&(kind, id.clone())) {
                        continue;
                    }
                    let mut slot = old.get(&id).cloned().unwrap_or_default();
                    let before = slot.visible();
                    let base = merge_base(slot.confirmed.as_ref(), entity);
                    slot.state = landing_state(&base);
                    slot.confirmed = Some(base);
                    slot.last_fetched = Some(now);
                    push_visible_change(events, kind, id.clone(), before, slot.visible());
                    next.insert(id, slot);
                }
                for (id, slot) in old.iter() {
                    if next.contains_key(id) {
                        continue;
                    }
                    if slot.confirmed.is_none() && !slot.layers.is_empty() {
                        next.insert(id.clone(), slot.clone());
                    } else if slot.visible().is_some() {
                        events.push(CacheEvent::new(kind, id.clone(), Change::Removed));
                    }
                }
                *state.collections.of_mut(kind) = next;
            }
            state.fetched_at = Some(snapshot.fetched_at);
            tracing::debug!(
                workspace = %snapshot.workspace_id,
                entities = snapshot.len(),
                changes = events.len(),
                "snapshot replaced"
            );
        });
    }

    /// Drop a key; with `tombstone`, later upserts of it are ignored
    pub fn evict(&self, kind: EntityKind, id: &EntityId, tombstone: bool) -> bool {
        self.write(|state, _, events| {
            if tombstone {
                state.tombstones.insert((kind, id.clone()));
            }
            let removed = state.collections.of_mut(kind).remove(id);
            match removed {
                Some(slot) => {
                    if slot.visible().is_some() || tombstone {
                        events.push(CacheEvent::new(kind, id.clone(), Change::Removed));
                    }
                    true
                }
                None => false,
            }
        })
    }

    /// Mark a key as having a fetch in flight
    pub fn mark_pending(&self, kind: EntityKind, id: &EntityId) {
        self.set_state(kind, id, EntryState::Pending);
    }

    /// Mark a key whose last fetch failed
    pub fn mark_error(&self, kind: EntityKind, id: &EntityId) {
        self.set_state(kind, id, EntryState::Error);
    }

    fn set_state(&self, kind: EntityKind, id: &EntityId, to: EntryState) {
        self.write(|state, _, events| {
            if let Some(slot) = state.collections.of_mut(kind).get_mut(id) {
                if slot.state != to {
                    slot.state = to;
                    events.push(CacheEvent::new(kind, id.clone(), Change::StateChanged(to)));
                }
            }
        });
    }

    /// Expire entries whose authoritative data is older than `ttl`
    ///
    /// Expired documents lose their cached body; every expired entry becomes
    /// stale. Keys with live optimistic layers are left alone.
    pub fn sweep_expired(&self, ttl: Duration) -> usize {
        self.write(|state, now, events| {
            let mut expired = 0;
            for kind in EntityKind::ALL {
                let collection = state.collections.of_mut(kind);
                let ids: Vec<EntityId> = collection
                    .iter()
                    .filter(|(_, slot)| {
                        !slot.has_live_layers()
                            && slot.state != EntryState::Pending
                            && slot.last_fetched.is_some_and(|at| now - at > ttl)
                    })
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in ids {
                    let Some(slot) = collection.get_mut(&id) else {
                        continue;
                    };
                    if let Some(Entity::Document(doc)) = slot.confirmed.as_mut() {
                        doc.content = None;
                    }
                    if slot.state != EntryState::Stale {
                        slot.state = EntryState::Stale;
                        events.push(CacheEvent::new(kind, id, Change::StateChanged(EntryState::Stale)));
                    }
                    expired += 1;
                }
            }
            expired
        })
    }

    /// Forget everything and bind the store to another workspace (or none)
    pub fn clear(&self, workspace: Option<WorkspaceId>) {
        self.write(|state, _, _| {
            let generation = state.generation + 1;
            *state = StoreState {
                workspace,
                generation,
                ..StoreState::default()
            };
        });
    }

    // ---------------------------------------------------------------------
    // Optimistic layers
    // ---------------------------------------------------------------------

    /// Insert an entity that exists only on the client
    ///
    /// # Errors
    /// - `CacheError::AlreadyExists` if the id is visible
    /// - `CacheError::KindMismatch` if the entity is not of `kind`
    pub fn insert_optimistic(&self, kind: EntityKind, entity: Entity, tag: LayerTag) -> Result<(), CacheError> {
        if entity.kind() != kind {
            return Err(CacheError::KindMismatch {
                expected: kind,
                found: entity.kind(),
            });
        }
        self.write(|state, _, events| {
            let id = entity.id().clone();
            let collection = state.collections.of_mut(kind);
            if collection.get(&id).is_some_and(|s| s.visible().is_some()) {
                return Err(CacheError::AlreadyExists { kind, id });
            }
            collection.insert(id.clone(), Slot::optimistic(entity.clone(), tag));
            events.push(CacheEvent::new(kind, id, Change::Updated(entity)));
            Ok(())
        })
    }

    /// Hide a key behind a pending delete layer
    ///
    /// # Errors
    /// Returns `CacheError::NotFound` if the key is not visible
    pub fn push_delete(&self, kind: EntityKind, id: &EntityId, tag: LayerTag) -> Result<(), CacheError> {
        self.write(|state, _, events| {
            let slot = state
                .collections
                .of_mut(kind)
                .get_mut(id)
                .filter(|slot| slot.visible().is_some())
                .ok_or_else(|| CacheError::not_found(kind, id))?;
            slot.layers.push(Layer {
                tag,
                op: LayerOp::Delete,
            });
            events.push(CacheEvent::new(kind, id.clone(), Change::Hidden));
            Ok(())
        })
    }

    /// Drop one mutation's layer, restoring whatever lies beneath it
    ///
    /// Returns `false` if the layer was already gone. A key left with
    /// neither confirmed data nor layers is removed.
    pub fn revert_layer(&self, kind: EntityKind, id: &EntityId, mutation: MutationId) -> bool {
        self.write(|state, _, events| {
            let collection = state.collections.of_mut(kind);
            let Some(slot) = collection.get_mut(id) else {
                return false;
            };
            let before = slot.visible();
            if slot.remove_layer(mutation).is_none() {
                return false;
            }
            let after = slot.visible();
            if slot.is_vacant() {
                collection.remove(id);
            }
            push_visible_change(events, kind, id.clone(), before, after);
            true
        })
    }

    /// Replace one mutation's layer with the server's answer
    ///
    /// Layers at or below `sequence` lose the fields the server value
    /// writes; newer layers stay on top.
    ///
    /// # Errors
    /// Returns `CacheError::NotFound` if the key is gone
    pub fn confirm_layer(
        &self,
        kind: EntityKind,
        id: &EntityId,
        mutation: MutationId,
        authoritative: Option<Entity>,
        sequence: u64,
    ) -> Result<(), CacheError> {
        self.write(|state, now, events| {
            let slot = state
                .collections
                .of_mut(kind)
                .get_mut(id)
                .ok_or_else(|| CacheError::not_found(kind, id))?;
            let before = slot.visible();
            slot.remove_layer(mutation);
            if let Some(entity) = authoritative {
                let base = retain_body(slot.confirmed.as_ref(), entity);
                slot.strip(&written_fields(&base), Some(sequence));
                slot.state = landing_state(&base);
                slot.confirmed = Some(base);
                slot.last_fetched = Some(now);
            }
            push_visible_change(events, kind, id.clone(), before, slot.visible());
            Ok(())
        })
    }

    /// Accept one mutation's layer as confirmed without a server echo
    ///
    /// The layer's writes move into the confirmed value; layers at or below
    /// `sequence` lose those fields.
    ///
    /// # Errors
    /// Returns `CacheError::NotFound` if the key is gone
    pub fn promote_layer(
        &self,
        kind: EntityKind,
        id: &EntityId,
        mutation: MutationId,
        sequence: u64,
    ) -> Result<(), CacheError> {
        self.write(|state, now, events| {
            let slot = state
                .collections
                .of_mut(kind)
                .get_mut(id)
                .ok_or_else(|| CacheError::not_found(kind, id))?;
            let before = slot.visible();
            match slot.remove_layer(mutation).map(|layer| layer.op) {
                Some(LayerOp::Patch(patch)) => {
                    if let Some(confirmed) = slot.confirmed.as_mut() {
                        confirmed.apply(&patch).map_err(|_| CacheError::KindMismatch {
                            expected: kind,
                            found: patch.kind(),
                        })?;
                    }
                    slot.strip(&patch.fields(), Some(sequence));
                }
                Some(LayerOp::Create(entity)) => {
                    slot.strip(&written_fields(&entity), Some(sequence));
                    slot.state = landing_state(&entity);
                    slot.confirmed = Some(entity);
                }
                Some(LayerOp::Delete) | None => return Ok(()),
            }
            slot.last_fetched = Some(now);
            push_visible_change(events, kind, id.clone(), before, slot.visible());
            Ok(())
        })
    }

    /// Move an optimistic creation from its temporary id to the server id
    ///
    /// The creation layer is replaced by `authoritative`; later layers (for
    /// example a rename issued while the create was in flight) move along
    /// and stay on top.
    ///
    /// # Errors
    /// Returns `CacheError::NotFound` if nothing is cached under `from`
    pub fn rekey(
        &self,
        kind: EntityKind,
        from: &EntityId,
        authoritative: Entity,
        mutation: MutationId,
        sequence: u64,
    ) -> Result<(), CacheError> {
        if authoritative.kind() != kind {
            return Err(CacheError::KindMismatch {
                expected: kind,
                found: authoritative.kind(),
            });
        }
        self.write(|state, now, events| {
            let collection = state.collections.of_mut(kind);
            let mut slot = collection
                .remove(from)
                .ok_or_else(|| CacheError::not_found(kind, from))?;
            debug_assert_eq!(slot.kind(), Some(kind));
            slot.remove_layer(mutation);
            let to = authoritative.id().clone();
            if let Some(existing) = collection.remove(&to) {
                // the server id already arrived through a refresh
                let mut layers = existing.layers;
                layers.append(&mut slot.layers);
                slot.layers = layers;
            }
            slot.strip(&written_fields(&authoritative), Some(sequence));
            slot.state = landing_state(&authoritative);
            slot.confirmed = Some(authoritative);
            slot.last_fetched = Some(now);
            let visible = slot.visible();
            collection.insert(to.clone(), slot);
            tracing::debug!(%kind, from = %from, to = %to, "rekeyed optimistic creation");
            match visible {
                Some(entity) => events.push(CacheEvent::new(
                    kind,
                    to,
                    Change::Rekeyed {
                        from: from.clone(),
                        entity,
                    },
                )),
                None => events.push(CacheEvent::new(kind, from.clone(), Change::Removed)),
            }
            Ok(())
        })
    }
}

/// Authoritative base for a key, keeping a cached body when still valid
fn merge_base(previous: Option<&Entity>, incoming: Entity) -> Entity {
    match (previous, incoming) {
        (Some(Entity::Document(prev)), Entity::Document(next)) => Entity::Document(prev.merge_listing(next)),
        (_, incoming) => incoming,
    }
}

/// Server answer to our own write: a missing body means "unchanged"
fn retain_body(previous: Option<&Entity>, incoming: Entity) -> Entity {
    match (previous, incoming) {
        (Some(Entity::Document(prev)), Entity::Document(mut next)) if next.content.is_none() => {
            next.content.clone_from(&prev.content);
            Entity::Document(next)
        }
        (_, incoming) => incoming,
    }
}

fn push_visible_change(
    events: &mut Vec<CacheEvent>,
    kind: EntityKind,
    id: EntityId,
    before: Option<Entity>,
    after: Option<Entity>,
) {
    match (before, after) {
        (before, Some(after)) if before.as_ref() != Some(&after) => {
            events.push(CacheEvent::new(kind, id, Change::Updated(after)));
        }
        (Some(_), None) => events.push(CacheEvent::new(kind, id, Change::Removed)),
        _ => {}
    }
}
