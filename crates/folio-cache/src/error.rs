//! Cache store errors

use folio_model::{EntityId, EntityKind};

/// Errors reported by [`crate::CacheStore`] writes
///
/// Reads never fail; they return `None` instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// No visible entry under this key
    #[error("{kind} {id} not found in cache")]
    NotFound {
        /// Entity kind
        kind: EntityKind,
        /// Entity id
        id: EntityId,
    },

    /// Entity or patch kind does not match the collection it was written to
    #[error("expected {expected}, got {found}")]
    KindMismatch {
        /// Collection kind
        expected: EntityKind,
        /// Kind actually supplied
        found: EntityKind,
    },

    /// An optimistic creation reused a visible id
    #[error("{kind} {id} already exists")]
    AlreadyExists {
        /// Entity kind
        kind: EntityKind,
        /// Entity id
        id: EntityId,
    },
}

impl CacheError {
    pub(crate) fn not_found(kind: EntityKind, id: &EntityId) -> Self {
        Self::NotFound {
            kind,
            id: id.clone(),
        }
    }
}
