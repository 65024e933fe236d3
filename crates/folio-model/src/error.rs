//! Boundary validation errors

use crate::entity::EntityKind;

/// A payload from the workspace API that could not be turned into a typed entity
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Payload does not have the expected shape
    #[error("malformed {kind} payload: {reason}")]
    Malformed {
        /// Entity kind being parsed
        kind: EntityKind,
        /// Deserializer message
        reason: String,
    },

    /// A required field is present but empty
    #[error("{kind} field `{field}` must not be empty")]
    EmptyField {
        /// Entity kind being parsed
        kind: EntityKind,
        /// Offending field
        field: &'static str,
    },

    /// Server payload carries a client-side temporary id
    #[error("{kind} payload carries temporary id {id}")]
    TemporaryId {
        /// Entity kind being parsed
        kind: EntityKind,
        /// Offending id
        id: String,
    },

    /// Folder lists itself as its own parent
    #[error("folder {0} is its own parent")]
    SelfParent(String),

    /// Patch does not apply to the entity it targets
    #[error("{patch} patch cannot apply to {entity}")]
    KindMismatch {
        /// Kind of the patch
        patch: EntityKind,
        /// Kind of the target entity
        entity: EntityKind,
    },
}
