//! Boundary validation
//!
//! The workspace API hands back JSON. These functions are the only way
//! untyped payloads become entities: shape is checked by serde, then the
//! invariants serde cannot express are checked by hand.

use crate::entity::{Document, Entity, EntityKind, Folder, Source};
use crate::error::ValidationError;
use crate::ids::EntityId;
use serde::de::DeserializeOwned;
use serde_json::Value;

fn decode<T: DeserializeOwned>(kind: EntityKind, value: Value) -> Result<T, ValidationError> {
    serde_json::from_value(value).map_err(|e| ValidationError::Malformed {
        kind,
        reason: e.to_string(),
    })
}

fn check_id(kind: EntityKind, id: &EntityId) -> Result<(), ValidationError> {
    if id.as_str().trim().is_empty() {
        return Err(ValidationError::EmptyField { kind, field: "id" });
    }
    if id.is_temporary() {
        return Err(ValidationError::TemporaryId {
            kind,
            id: id.to_string(),
        });
    }
    Ok(())
}

fn check_label(kind: EntityKind, field: &'static str, label: &str) -> Result<(), ValidationError> {
    if label.trim().is_empty() {
        Err(ValidationError::EmptyField { kind, field })
    } else {
        Ok(())
    }
}

/// Parse a document payload
///
/// # Errors
/// Returns `ValidationError` on malformed shape, empty id/title or a temporary id
pub fn parse_document(value: Value) -> Result<Document, ValidationError> {
    let doc: Document = decode(EntityKind::Document, value)?;
    check_id(EntityKind::Document, &doc.id)?;
    check_label(EntityKind::Document, "title", &doc.title)?;
    Ok(doc)
}

/// Parse a folder payload
///
/// # Errors
/// Returns `ValidationError` on malformed shape, empty id/name, a temporary id
/// or a folder that names itself as parent
pub fn parse_folder(value: Value) -> Result<Folder, ValidationError> {
    let folder: Folder = decode(EntityKind::Folder, value)?;
    check_id(EntityKind::Folder, &folder.id)?;
    check_label(EntityKind::Folder, "name", &folder.name)?;
    if folder.parent_folder_id.as_ref() == Some(&folder.id) {
        return Err(ValidationError::SelfParent(folder.id.to_string()));
    }
    Ok(folder)
}

/// Parse a source payload
///
/// # Errors
/// Returns `ValidationError` on malformed shape, empty id/name or a temporary id
pub fn parse_source(value: Value) -> Result<Source, ValidationError> {
    let source: Source = decode(EntityKind::Source, value)?;
    check_id(EntityKind::Source, &source.id)?;
    check_label(EntityKind::Source, "name", &source.name)?;
    Ok(source)
}

/// Parse a payload of a known kind into the entity union
///
/// # Errors
/// See the kind-specific parsers
pub fn parse_entity(kind: EntityKind, value: Value) -> Result<Entity, ValidationError> {
    match kind {
        EntityKind::Document => parse_document(value).map(Entity::from),
        EntityKind::Folder => parse_folder(value).map(Entity::from),
        EntityKind::Source => parse_source(value).map(Entity::from),
    }
}
