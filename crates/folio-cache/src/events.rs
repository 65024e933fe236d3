//! Typed change topics
//!
//! UI surfaces subscribe to an entity kind, optionally narrowed to one id.
//! Callbacks run synchronously after the store lock has been released, so
//! they may read (or even write) the store. Async consumers use the
//! broadcast receiver from [`crate::CacheStore::events`] instead.

use crate::entry::EntryState;
use folio_model::{Entity, EntityId, EntityKind};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// What happened to a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Visible value changed (authoritative write, optimistic write or rollback)
    Updated(Entity),
    /// Hidden by a pending optimistic delete
    Hidden,
    /// Gone from the cache
    Removed,
    /// Temporary id replaced by a server-assigned id
    Rekeyed {
        /// Previous (temporary) id
        from: EntityId,
        /// Visible value under the new id
        entity: Entity,
    },
    /// Freshness changed without a value change
    StateChanged(EntryState),
}

/// Change notification for one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    /// Entity kind
    pub kind: EntityKind,
    /// Entity id (the new id for [`Change::Rekeyed`])
    pub id: EntityId,
    /// What happened
    pub change: Change,
}

impl CacheEvent {
    pub(crate) fn new(kind: EntityKind, id: EntityId, change: Change) -> Self {
        Self { kind, id, change }
    }
}

/// Subscription filter: an entity kind and optionally one id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    /// Entity kind
    pub kind: EntityKind,
    /// Specific id, or every id of the kind
    pub id: Option<EntityId>,
}

impl Topic {
    /// Every entity of a kind
    #[inline]
    #[must_use]
    pub fn all(kind: EntityKind) -> Self {
        Self { kind, id: None }
    }

    /// One entity
    #[inline]
    #[must_use]
    pub fn entity(kind: EntityKind, id: impl Into<EntityId>) -> Self {
        Self {
            kind,
            id: Some(id.into()),
        }
    }

    /// Whether an event is delivered to this topic
    ///
    /// A rekey is delivered to subscribers of both the old and the new id.
    #[must_use]
    pub fn matches(&self, event: &CacheEvent) -> bool {
        if self.kind != event.kind {
            return false;
        }
        match &self.id {
            None => true,
            Some(id) => {
                *id == event.id
                    || matches!(&event.change, Change::Rekeyed { from, .. } if from == id)
            }
        }
    }
}

type Callback = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Registry {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(u64, Topic, Callback)>>,
}

impl Registry {
    pub(crate) fn add(self: &Arc<Self>, topic: Topic, callback: Callback) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, topic.clone(), callback));
        Subscription {
            id,
            topic,
            registry: Arc::downgrade(self),
        }
    }

    fn remove(&self, id: u64) {
        self.listeners.write().retain(|(lid, _, _)| *lid != id);
    }

    pub(crate) fn dispatch(&self, event: &CacheEvent) {
        // clone out so callbacks can subscribe or unsubscribe
        let targets: Vec<Callback> = self
            .listeners
            .read()
            .iter()
            .filter(|(_, topic, _)| topic.matches(event))
            .map(|(_, _, cb)| Arc::clone(cb))
            .collect();
        for callback in targets {
            callback(event);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.read().len()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("listeners", &self.len())
            .finish()
    }
}

/// Live subscription; dropping it unsubscribes
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    topic: Topic,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Topic this subscription listens on
    #[inline]
    #[must_use]
    pub fn topic(&self) -> &Topic {
        &self.topic
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_matches_kind_and_id() {
        let event = CacheEvent::new(EntityKind::Document, EntityId::new("a"), Change::Removed);
        assert!(Topic::all(EntityKind::Document).matches(&event));
        assert!(Topic::entity(EntityKind::Document, "a").matches(&event));
        assert!(!Topic::entity(EntityKind::Document, "b").matches(&event));
        assert!(!Topic::all(EntityKind::Folder).matches(&event));
    }

    #[test]
    fn rekey_reaches_old_id_subscribers() {
        let entity = Entity::Folder(folio_model::Folder {
            id: EntityId::new("fld-9"),
            name: "n".into(),
            parent_folder_id: None,
        });
        let event = CacheEvent::new(
            EntityKind::Folder,
            EntityId::new("fld-9"),
            Change::Rekeyed {
                from: EntityId::new("tmp-1"),
                entity,
            },
        );
        assert!(Topic::entity(EntityKind::Folder, "tmp-1").matches(&event));
        assert!(Topic::entity(EntityKind::Folder, "fld-9").matches(&event));
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let registry = Arc::new(Registry::default());
        let sub = registry.add(Topic::all(EntityKind::Source), Arc::new(|_| {}));
        assert_eq!(registry.len(), 1);
        drop(sub);
        assert_eq!(registry.len(), 0);
    }
}
