//! Optimistic mutation coordinator
//!
//! Every mutation moves through `Pending -> Confirmed | RolledBack`:
//! - `begin` captures the pre-image, applies the change as an optimistic
//!   layer and hands out a [`MutationHandle`] with a monotonic sequence
//! - `complete` swaps the layer for the server's answer; creations move
//!   from their temporary id to the server id
//! - `fail` drops the layer, restoring whatever lies beneath it
//!
//! Settlement is idempotent. Confirmations older than one already applied
//! for the same entity are ignored, and once a delete is confirmed no late
//! confirmation can bring the entity back.

use crate::error::SyncError;
use dashmap::{DashMap, DashSet};
use folio_cache::{CacheError, CacheStore, LayerTag, PatchTag};
use folio_model::{Entity, EntityId, EntityKind, EntityPatch, MutationId};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Settled mutations remembered for idempotency checks
const SETTLED_CAPACITY: u64 = 10_000;

/// Requested change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOp {
    /// Create an entity under a temporary id
    Create(Entity),
    /// Patch fields of an existing entity
    Update(EntityPatch),
    /// Delete an entity
    Delete,
}

/// What a mutation does, without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationAction {
    /// Creation
    Create,
    /// Field update
    Update,
    /// Deletion
    Delete,
}

impl MutationAction {
    /// Lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MutationStatus {
    /// Applied locally, waiting for the server
    Pending,
    /// Server accepted; authoritative data merged
    Confirmed,
    /// Reverted to the pre-image
    RolledBack,
}

/// Ticket for settling one mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationHandle {
    /// Mutation id
    pub id: MutationId,
    /// Entity kind
    pub kind: EntityKind,
    /// Target as given to `begin` (may be a temporary id)
    pub target: EntityId,
    /// What the mutation does
    pub action: MutationAction,
    /// Monotonic sequence number
    pub sequence: u64,
    epoch: u64,
}

/// A mutation still waiting for the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    /// Mutation id
    pub id: MutationId,
    /// Entity kind
    pub kind: EntityKind,
    /// Target as given to `begin`
    pub target: EntityId,
    /// What the mutation does
    pub action: MutationAction,
    /// Fields written optimistically
    pub optimistic_patch: Option<EntityPatch>,
    /// Visible value before the mutation; `None` for creations
    pub rollback_snapshot: Option<Entity>,
    /// Monotonic sequence number
    pub sequence: u64,
    /// Always `Pending` while listed
    pub status: MutationStatus,
}

/// Why a settlement changed nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IgnoreReason {
    /// Already confirmed or rolled back
    AlreadySettled,
    /// A newer mutation on the same entity was confirmed first
    StaleSequence,
    /// The entity was deleted
    TargetDeleted,
    /// The handle belongs to a workspace that is no longer active
    PreviousWorkspace,
    /// The coordinator never issued this handle
    Unknown,
}

/// Result of `complete` or `fail`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Authoritative data merged; carries the entity's final id
    Confirmed(EntityId),
    /// Optimistic change reverted
    RolledBack,
    /// Nothing changed
    Ignored(IgnoreReason),
}

impl Settlement {
    /// Whether the settlement changed nothing
    #[inline]
    #[must_use]
    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum IdState {
    Pending,
    Assigned(EntityId),
    Failed,
}

/// Applies, confirms and rolls back optimistic mutations
pub struct MutationCoordinator {
    store: Arc<CacheStore>,
    sequence: AtomicU64,
    epoch: AtomicU64,
    pending: DashMap<MutationId, PendingMutation>,
    settled: moka::sync::Cache<MutationId, MutationStatus>,
    confirmed: DashMap<(EntityKind, EntityId), u64>,
    deleted: DashSet<(EntityKind, EntityId)>,
    aliases: DashMap<EntityId, EntityId>,
    server_ids: DashMap<EntityId, watch::Sender<IdState>>,
}

impl fmt::Debug for MutationCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationCoordinator")
            .field("sequence", &self.sequence.load(Ordering::SeqCst))
            .field("epoch", &self.epoch.load(Ordering::SeqCst))
            .field("pending", &self.pending.len())
            .field("aliases", &self.aliases.len())
            .finish_non_exhaustive()
    }
}

impl MutationCoordinator {
    /// Create a coordinator writing into `store`
    #[must_use]
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self {
            store,
            sequence: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            pending: DashMap::new(),
            settled: moka::sync::Cache::builder().max_capacity(SETTLED_CAPACITY).build(),
            confirmed: DashMap::new(),
            deleted: DashSet::new(),
            aliases: DashMap::new(),
            server_ids: DashMap::new(),
        }
    }

    /// Apply a mutation optimistically
    ///
    /// # Errors
    /// - `CacheError::NotFound` if an update or delete targets an entity
    ///   that is not visible or was deleted
    /// - `CacheError::AlreadyExists` if a creation reuses a visible id
    /// - `CacheError::KindMismatch` if the payload is for another kind
    pub fn begin(&self, kind: EntityKind, target: EntityId, op: MutationOp) -> Result<MutationHandle, SyncError> {
        let resolved = self.resolve(&target);
        let id = MutationId::new();
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let tag = LayerTag { mutation: id, sequence };

        let (action, optimistic_patch, rollback_snapshot) = match op {
            MutationOp::Create(entity) => {
                let entity = if entity.id() == &target { entity } else { entity.with_id(target.clone()) };
                self.store.insert_optimistic(kind, entity, tag)?;
                self.server_ids.insert(target.clone(), watch::channel(IdState::Pending).0);
                (MutationAction::Create, None, None)
            }
            MutationOp::Update(patch) => {
                let pre_image = self.visible(kind, &resolved)?;
                self.store
                    .patch(kind, &resolved, patch.clone(), PatchTag::Optimistic(tag))?;
                (MutationAction::Update, Some(patch), Some(pre_image))
            }
            MutationOp::Delete => {
                let pre_image = self.visible(kind, &resolved)?;
                self.store.push_delete(kind, &resolved, tag)?;
                (MutationAction::Delete, None, Some(pre_image))
            }
        };

        self.pending.insert(
            id,
            PendingMutation {
                id,
                kind,
                target: target.clone(),
                action,
                optimistic_patch,
                rollback_snapshot,
                sequence,
                status: MutationStatus::Pending,
            },
        );
        tracing::info!(mutation = %id, %kind, target = %target, %action, sequence, "mutation applied optimistically");
        Ok(MutationHandle {
            id,
            kind,
            target,
            action,
            sequence,
            epoch: self.epoch.load(Ordering::SeqCst),
        })
    }

    /// Merge the server's answer for a mutation
    ///
    /// `server` is the entity as stored by the server. Updates may pass
    /// `None` to accept the optimistic value as-is; deletions ignore it;
    /// a creation without a server entity is rolled back.
    pub fn complete(&self, handle: &MutationHandle, server: Option<Entity>) -> Settlement {
        if let Some(reason) = self.precheck(handle) {
            return self.ignored(handle, reason);
        }
        if self.pending.remove(&handle.id).is_none() {
            return self.ignored(handle, self.missing_reason(handle));
        }
        let kind = handle.kind;
        let target = self.resolve(&handle.target);
        let key = (kind, target.clone());

        if handle.action == MutationAction::Delete {
            self.store.revert_layer(kind, &target, handle.id);
            self.store.evict(kind, &target, true);
            self.deleted.insert(key.clone());
            self.bump_confirmed(key, handle.sequence);
            return self.settle(handle, MutationStatus::Confirmed, Settlement::Confirmed(target));
        }
        if self.deleted.contains(&key) {
            self.store.revert_layer(kind, &target, handle.id);
            self.settled.insert(handle.id, MutationStatus::RolledBack);
            return self.ignored(handle, IgnoreReason::TargetDeleted);
        }
        if self.is_stale(&key, handle.sequence) {
            self.store.revert_layer(kind, &target, handle.id);
            self.settled.insert(handle.id, MutationStatus::RolledBack);
            return self.ignored(handle, IgnoreReason::StaleSequence);
        }

        match handle.action {
            MutationAction::Create => self.confirm_create(handle, &target, server),
            _ => {
                let applied = match server {
                    Some(entity) => self
                        .store
                        .confirm_layer(kind, &target, handle.id, Some(entity), handle.sequence),
                    None => self.store.promote_layer(kind, &target, handle.id, handle.sequence),
                };
                if let Err(error) = applied {
                    tracing::warn!(mutation = %handle.id, target = %target, %error, "confirmed entity left the cache");
                    self.settled.insert(handle.id, MutationStatus::RolledBack);
                    return self.ignored(handle, IgnoreReason::TargetDeleted);
                }
                self.bump_confirmed(key, handle.sequence);
                self.settle(handle, MutationStatus::Confirmed, Settlement::Confirmed(target))
            }
        }
    }

    fn confirm_create(&self, handle: &MutationHandle, temporary: &EntityId, server: Option<Entity>) -> Settlement {
        let Some(entity) = server else {
            tracing::warn!(mutation = %handle.id, target = %temporary, "creation confirmed without an entity, rolling back");
            return self.roll_back(handle, temporary);
        };
        let real = entity.id().clone();
        if let Err(error) = self
            .store
            .rekey(handle.kind, temporary, entity, handle.id, handle.sequence)
        {
            tracing::warn!(mutation = %handle.id, target = %temporary, %error, "creation target left the cache");
            self.signal(temporary, IdState::Failed);
            self.settled.insert(handle.id, MutationStatus::RolledBack);
            return self.ignored(handle, IgnoreReason::TargetDeleted);
        }
        if real != *temporary {
            self.aliases.insert(temporary.clone(), real.clone());
        }
        self.signal(temporary, IdState::Assigned(real.clone()));
        self.bump_confirmed((handle.kind, real.clone()), handle.sequence);
        tracing::info!(mutation = %handle.id, from = %temporary, to = %real, "temporary id replaced");
        self.settle(handle, MutationStatus::Confirmed, Settlement::Confirmed(real))
    }

    /// Revert a mutation; calling it again changes nothing
    pub fn fail(&self, handle: &MutationHandle) -> Settlement {
        if let Some(reason) = self.precheck(handle) {
            return self.ignored(handle, reason);
        }
        if self.pending.remove(&handle.id).is_none() {
            return self.ignored(handle, self.missing_reason(handle));
        }
        let target = self.resolve(&handle.target);
        if self.is_stale(&(handle.kind, target.clone()), handle.sequence) {
            self.store.revert_layer(handle.kind, &target, handle.id);
            self.settled.insert(handle.id, MutationStatus::RolledBack);
            return self.ignored(handle, IgnoreReason::StaleSequence);
        }
        self.roll_back(handle, &target)
    }

    fn roll_back(&self, handle: &MutationHandle, target: &EntityId) -> Settlement {
        self.store.revert_layer(handle.kind, target, handle.id);
        if handle.action == MutationAction::Create {
            self.signal(&handle.target, IdState::Failed);
        }
        self.settle(handle, MutationStatus::RolledBack, Settlement::RolledBack)
    }

    /// Wait until a temporary id has a server id; other ids resolve immediately
    ///
    /// # Errors
    /// Returns `SyncError::CreationFailed` if the creation was rolled back
    /// or the id was never issued
    pub async fn await_server_id(&self, id: &EntityId) -> Result<EntityId, SyncError> {
        if !id.is_temporary() {
            return Ok(id.clone());
        }
        if let Some(real) = self.aliases.get(id).map(|r| r.value().clone()) {
            return Ok(real);
        }
        let Some(mut rx) = self.server_ids.get(id).map(|tx| tx.subscribe()) else {
            return Err(SyncError::CreationFailed(id.clone()));
        };
        rx.wait_for(|state| *state != IdState::Pending)
            .await
            .map_err(|_| SyncError::CreationFailed(id.clone()))
            .and_then(|state| match &*state {
                IdState::Assigned(real) => Ok(real.clone()),
                IdState::Pending | IdState::Failed => Err(SyncError::CreationFailed(id.clone())),
            })
    }

    /// Current id for a possibly temporary id
    #[must_use]
    pub fn resolve(&self, id: &EntityId) -> EntityId {
        self.aliases
            .get(id)
            .map_or_else(|| id.clone(), |real| real.value().clone())
    }

    /// Status of a mutation, if still remembered
    #[must_use]
    pub fn status(&self, id: MutationId) -> Option<MutationStatus> {
        if self.pending.contains_key(&id) {
            return Some(MutationStatus::Pending);
        }
        self.settled.get(&id)
    }

    /// Every pending mutation, oldest first
    #[must_use]
    pub fn pending(&self) -> Vec<PendingMutation> {
        let mut list: Vec<PendingMutation> = self.pending.iter().map(|e| e.value().clone()).collect();
        list.sort_by_key(|m| m.sequence);
        list
    }

    /// Pending mutations on one entity, by current or temporary id
    #[must_use]
    pub fn pending_for(&self, kind: EntityKind, id: &EntityId) -> Vec<PendingMutation> {
        let wanted = self.resolve(id);
        self.pending()
            .into_iter()
            .filter(|m| m.kind == kind && self.resolve(&m.target) == wanted)
            .collect()
    }

    /// Whether a confirmed delete removed this entity
    #[must_use]
    pub fn is_deleted(&self, kind: EntityKind, id: &EntityId) -> bool {
        self.deleted.contains(&(kind, self.resolve(id)))
    }

    /// Forget every mutation; outstanding handles settle as `PreviousWorkspace`
    pub fn reset(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let dropped = self.pending.len();
        self.pending.clear();
        let waiting: Vec<EntityId> = self.server_ids.iter().map(|e| e.key().clone()).collect();
        for id in waiting {
            self.signal(&id, IdState::Failed);
        }
        self.confirmed.clear();
        self.deleted.clear();
        self.aliases.clear();
        self.settled.invalidate_all();
        if dropped > 0 {
            tracing::info!(dropped, "pending mutations discarded on workspace switch");
        }
    }

    fn visible(&self, kind: EntityKind, id: &EntityId) -> Result<Entity, SyncError> {
        if self.deleted.contains(&(kind, id.clone())) {
            return Err(not_found(kind, id));
        }
        self.store
            .get(kind, id)
            .map(|entry| entry.data)
            .ok_or_else(|| not_found(kind, id))
    }

    fn precheck(&self, handle: &MutationHandle) -> Option<IgnoreReason> {
        if handle.epoch != self.epoch.load(Ordering::SeqCst) {
            return Some(IgnoreReason::PreviousWorkspace);
        }
        self.settled
            .contains_key(&handle.id)
            .then_some(IgnoreReason::AlreadySettled)
    }

    fn missing_reason(&self, handle: &MutationHandle) -> IgnoreReason {
        if self.settled.contains_key(&handle.id) {
            IgnoreReason::AlreadySettled
        } else {
            IgnoreReason::Unknown
        }
    }

    fn is_stale(&self, key: &(EntityKind, EntityId), sequence: u64) -> bool {
        self.confirmed.get(key).is_some_and(|latest| *latest > sequence)
    }

    fn bump_confirmed(&self, key: (EntityKind, EntityId), sequence: u64) {
        self.confirmed
            .entry(key)
            .and_modify(|latest| *latest = (*latest).max(sequence))
            .or_insert(sequence);
    }

    fn signal(&self, temporary: &EntityId, state: IdState) {
        if let Some((_, tx)) = self.server_ids.remove(temporary) {
            tx.send_replace(state);
        }
    }

    fn settle(&self, handle: &MutationHandle, status: MutationStatus, settlement: Settlement) -> Settlement {
        self.settled.insert(handle.id, status);
        match status {
            MutationStatus::RolledBack => tracing::info!(
                mutation = %handle.id,
                target = %handle.target,
                action = %handle.action,
                sequence = handle.sequence,
                "mutation rolled back"
            ),
            _ => tracing::info!(
                mutation = %handle.id,
                target = %handle.target,
                action = %handle.action,
                sequence = handle.sequence,
                "mutation confirmed"
            ),
        }
        settlement
    }

    fn ignored(&self, handle: &MutationHandle, reason: IgnoreReason) -> Settlement {
        tracing::debug!(mutation = %handle.id, target = %handle.target, ?reason, "settlement ignored");
        Settlement::Ignored(reason)
    }
}

fn not_found(kind: EntityKind, id: &EntityId) -> SyncError {
    SyncError::Cache(CacheError::NotFound { kind, id: id.clone() })
}
