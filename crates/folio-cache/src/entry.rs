//! Cache entries and optimistic layers
//!
//! Every key holds a [`Slot`]: the last server-confirmed value plus an
//! ordered stack of optimistic layers. Readers never see the slot itself,
//! only the [`CacheEntry`] it resolves to.

use chrono::{DateTime, Utc};
use folio_model::{Document, Entity, EntityKind, EntityPatch, Field, Folder, MutationId, Source};

/// Freshness of a cached entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EntryState {
    /// Matches the server as of `last_fetched`
    Fresh,
    /// Known to be outdated or incomplete; refetched on next access
    #[default]
    Stale,
    /// A fetch for this entity is in flight
    Pending,
    /// The last fetch failed
    Error,
}

/// Identity of one optimistic write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerTag {
    /// Mutation that owns the layer
    pub mutation: MutationId,
    /// Monotonic sequence assigned when the mutation began
    pub sequence: u64,
}

/// Provenance of a write or of a single field's visible value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchTag {
    /// Server-confirmed data
    Authoritative,
    /// Speculative local edit that can still be reverted
    Optimistic(LayerTag),
}

impl PatchTag {
    /// Whether this is an optimistic tag
    #[inline]
    #[must_use]
    pub fn is_optimistic(&self) -> bool {
        matches!(self, Self::Optimistic(_))
    }
}

/// What an optimistic layer does to the value below it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerOp {
    /// Entity exists only on the client so far
    Create(Entity),
    /// Field writes
    Patch(EntityPatch),
    /// Entity hidden until the delete is confirmed or reverted
    Delete,
}

/// One optimistic write retained separately from confirmed data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    /// Owner and ordering
    pub tag: LayerTag,
    /// Effect
    pub op: LayerOp,
}

impl Layer {
    fn is_inert(&self) -> bool {
        matches!(&self.op, LayerOp::Patch(p) if p.is_empty())
    }
}

/// Whether the visible value contains any speculative data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// Entirely server-confirmed
    Authoritative,
    /// At least one optimistic layer still shapes the value
    Optimistic {
        /// Mutations whose layers are still live, oldest first
        mutations: Vec<MutationId>,
    },
}

/// Snapshot of a cached entity as seen by readers
///
/// Returned by value; writing to it never touches the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<T> {
    /// Visible value (confirmed data with optimistic layers applied)
    pub data: T,
    /// Freshness
    pub state: EntryState,
    /// Last time authoritative data was written
    pub last_fetched: Option<DateTime<Utc>>,
    /// Whether `data` includes optimistic writes
    pub provenance: Provenance,
}

impl<T> CacheEntry<T> {
    /// Whether `data` includes optimistic writes
    #[inline]
    #[must_use]
    pub fn is_optimistic(&self) -> bool {
        matches!(self.provenance, Provenance::Optimistic { .. })
    }

    /// Whether the entity is fresh
    #[inline]
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.state == EntryState::Fresh
    }

    fn try_map<U>(self, f: impl FnOnce(T) -> Option<U>) -> Option<CacheEntry<U>> {
        Some(CacheEntry {
            data: f(self.data)?,
            state: self.state,
            last_fetched: self.last_fetched,
            provenance: self.provenance,
        })
    }
}

impl CacheEntry<Entity> {
    /// Narrow to a document entry
    #[must_use]
    pub fn into_document(self) -> Option<CacheEntry<Document>> {
        self.try_map(|e| match e {
            Entity::Document(d) => Some(d),
            _ => None,
        })
    }

    /// Narrow to a folder entry
    #[must_use]
    pub fn into_folder(self) -> Option<CacheEntry<Folder>> {
        self.try_map(|e| match e {
            Entity::Folder(f) => Some(f),
            _ => None,
        })
    }

    /// Narrow to a source entry
    #[must_use]
    pub fn into_source(self) -> Option<CacheEntry<Source>> {
        self.try_map(|e| match e {
            Entity::Source(s) => Some(s),
            _ => None,
        })
    }
}

/// Fields an authoritative entity value writes
///
/// A document without a body does not write `content`.
pub(crate) fn written_fields(entity: &Entity) -> Vec<Field> {
    match entity {
        Entity::Document(d) if d.content.is_none() => vec![Field::Title, Field::FolderId],
        other => Field::all_for(other.kind()).to_vec(),
    }
}

/// State an authoritative value lands in
pub(crate) fn landing_state(entity: &Entity) -> EntryState {
    match entity {
        Entity::Document(d) if !d.has_body() => EntryState::Stale,
        _ => EntryState::Fresh,
    }
}

/// Storage cell behind one cache key
#[derive(Debug, Clone, Default)]
pub(crate) struct Slot {
    pub(crate) confirmed: Option<Entity>,
    pub(crate) layers: Vec<Layer>,
    pub(crate) state: EntryState,
    pub(crate) last_fetched: Option<DateTime<Utc>>,
}

impl Slot {
    #[cfg(test)]
    pub(crate) fn confirmed(entity: Entity, at: DateTime<Utc>) -> Self {
        Self {
            state: landing_state(&entity),
            confirmed: Some(entity),
            layers: Vec::new(),
            last_fetched: Some(at),
        }
    }

    pub(crate) fn optimistic(entity: Entity, tag: LayerTag) -> Self {
        Self {
            confirmed: None,
            layers: vec![Layer {
                tag,
                op: LayerOp::Create(entity),
            }],
            state: EntryState::Pending,
            last_fetched: None,
        }
    }

    /// Confirmed value with every layer applied in order
    pub(crate) fn visible(&self) -> Option<Entity> {
        let mut current = self.confirmed.clone();
        for layer in &self.layers {
            match &layer.op {
                LayerOp::Create(entity) => current = Some(entity.clone()),
                LayerOp::Patch(patch) => {
                    if let Some(entity) = current.as_mut() {
                        // kind was checked when the layer was pushed
                        let _ = entity.apply(patch);
                    }
                }
                LayerOp::Delete => current = None,
            }
        }
        current
    }

    pub(crate) fn provenance(&self) -> Provenance {
        let mutations: Vec<MutationId> = self
            .layers
            .iter()
            .filter(|l| !l.is_inert())
            .map(|l| l.tag.mutation)
            .collect();
        if mutations.is_empty() {
            Provenance::Authoritative
        } else {
            Provenance::Optimistic { mutations }
        }
    }

    pub(crate) fn entry(&self) -> Option<CacheEntry<Entity>> {
        Some(CacheEntry {
            data: self.visible()?,
            state: self.state,
            last_fetched: self.last_fetched,
            provenance: self.provenance(),
        })
    }

    /// Provenance of one field of the visible value
    pub(crate) fn field_tag(&self, field: Field) -> Option<PatchTag> {
        self.visible()?;
        let owner = self.layers.iter().rev().find(|l| match &l.op {
            LayerOp::Create(_) => true,
            LayerOp::Patch(p) => p.touches(field),
            LayerOp::Delete => false,
        });
        Some(owner.map_or(PatchTag::Authoritative, |l| PatchTag::Optimistic(l.tag)))
    }

    /// Retire `fields` from layers an authoritative write supersedes
    ///
    /// `up_to` limits stripping to layers with a sequence at or below it;
    /// `None` strips every layer.
    pub(crate) fn strip(&mut self, fields: &[Field], up_to: Option<u64>) {
        for layer in &mut self.layers {
            if up_to.is_some_and(|s| layer.tag.sequence > s) {
                continue;
            }
            if let LayerOp::Patch(patch) = &mut layer.op {
                patch.strip(fields);
            }
        }
    }

    pub(crate) fn remove_layer(&mut self, mutation: MutationId) -> Option<Layer> {
        let idx = self.layers.iter().position(|l| l.tag.mutation == mutation)?;
        Some(self.layers.remove(idx))
    }

    pub(crate) fn has_live_layers(&self) -> bool {
        self.layers.iter().any(|l| !l.is_inert())
    }

    pub(crate) fn is_vacant(&self) -> bool {
        self.confirmed.is_none() && self.layers.is_empty()
    }

    pub(crate) fn kind(&self) -> Option<EntityKind> {
        self.confirmed.as_ref().map(Entity::kind).or_else(|| {
            self.layers.iter().find_map(|l| match &l.op {
                LayerOp::Create(e) => Some(e.kind()),
                _ => None,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_model::{DocumentPatch, EntityId};

    fn doc(title: &str) -> Entity {
        Entity::Document(Document {
            id: EntityId::new("doc-1"),
            title: title.to_string(),
            folder_id: None,
            content: Some("body".to_string()),
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
            version: 1,
        })
    }

    fn tag(sequence: u64) -> LayerTag {
        LayerTag {
            mutation: MutationId::new(),
            sequence,
        }
    }

    fn rename_layer(title: &str, sequence: u64) -> Layer {
        Layer {
            tag: tag(sequence),
            op: LayerOp::Patch(DocumentPatch::rename(title).into()),
        }
    }

    #[test]
    fn visible_applies_layers_in_order() {
        let mut slot = Slot::confirmed(doc("base"), DateTime::<Utc>::UNIX_EPOCH);
        slot.layers.push(rename_layer("first", 1));
        slot.layers.push(rename_layer("second", 2));
        assert_eq!(slot.visible().unwrap().title(), "second");
    }

    #[test]
    fn delete_layer_hides_entity() {
        let mut slot = Slot::confirmed(doc("base"), DateTime::<Utc>::UNIX_EPOCH);
        slot.layers.push(Layer {
            tag: tag(1),
            op: LayerOp::Delete,
        });
        assert!(slot.visible().is_none());
        assert!(slot.entry().is_none());
    }

    #[test]
    fn bounded_strip_keeps_newer_layers() {
        let mut slot = Slot::confirmed(doc("base"), DateTime::<Utc>::UNIX_EPOCH);
        slot.layers.push(rename_layer("old", 1));
        slot.layers.push(rename_layer("new", 3));
        slot.strip(&[Field::Title], Some(2));
        assert_eq!(slot.visible().unwrap().title(), "new");
        assert!(matches!(slot.field_tag(Field::Title), Some(PatchTag::Optimistic(t)) if t.sequence == 3));
    }

    #[test]
    fn inert_layers_do_not_count_as_optimistic() {
        let mut slot = Slot::confirmed(doc("base"), DateTime::<Utc>::UNIX_EPOCH);
        slot.layers.push(rename_layer("x", 1));
        slot.strip(&[Field::Title], None);
        assert_eq!(slot.provenance(), Provenance::Authoritative);
        assert_eq!(slot.field_tag(Field::Title), Some(PatchTag::Authoritative));
    }
}
