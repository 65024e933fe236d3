//! Workspace entities
//!
//! The cache only ever holds one of three closed kinds. [`Entity`] is the
//! tagged union used wherever code must handle any of them.

use crate::error::ValidationError;
use crate::ids::EntityId;
use crate::patch::EntityPatch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity kind, used as the first half of every cache key and topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Editable document
    Document,
    /// Folder in the sidebar tree
    Folder,
    /// External knowledge source
    Source,
}

impl EntityKind {
    /// All kinds, in snapshot order
    pub const ALL: [EntityKind; 3] = [Self::Document, Self::Folder, Self::Source];

    /// Lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Folder => "folder",
            Self::Source => "source",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document; `content` is absent when only the listing has been fetched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Document id
    pub id: EntityId,
    /// Display title
    pub title: String,
    /// Containing folder, `None` at workspace root
    #[serde(default)]
    pub folder_id: Option<EntityId>,
    /// Body, loaded lazily
    #[serde(default)]
    pub content: Option<String>,
    /// Last server-side modification
    pub updated_at: DateTime<Utc>,
    /// Server version, bumped on every write
    #[serde(default)]
    pub version: u64,
}

impl Document {
    /// Whether the body has been fetched
    #[inline]
    #[must_use]
    pub fn has_body(&self) -> bool {
        self.content.is_some()
    }

    /// Fold a listing entry (no body) into this cached document
    ///
    /// The cached body survives only if the listing reports the same version.
    #[must_use]
    pub fn merge_listing(&self, listing: Document) -> Document {
        if listing.content.is_none() && listing.version == self.version {
            Document {
                content: self.content.clone(),
                ..listing
            }
        } else {
            listing
        }
    }
}

/// A folder in the workspace tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    /// Folder id
    pub id: EntityId,
    /// Display name
    pub name: String,
    /// Parent folder, `None` at workspace root
    #[serde(default)]
    pub parent_folder_id: Option<EntityId>,
}

/// Source type reported by the API
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Uploaded file
    File,
    /// Crawled web page
    Url,
    /// Pasted text
    Text,
    /// Anything this client does not know about
    #[serde(untagged)]
    Other(String),
}

/// An external source attached to the workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Source id
    pub id: EntityId,
    /// Display name
    pub name: String,
    /// Source type
    #[serde(rename = "type")]
    pub source_type: SourceType,
}

/// Closed union of every cacheable entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Entity {
    /// A document
    Document(Document),
    /// A folder
    Folder(Folder),
    /// A source
    Source(Source),
}

impl Entity {
    /// Entity id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &EntityId {
        match self {
            Self::Document(d) => &d.id,
            Self::Folder(f) => &f.id,
            Self::Source(s) => &s.id,
        }
    }

    /// Entity kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Document(_) => EntityKind::Document,
            Self::Folder(_) => EntityKind::Folder,
            Self::Source(_) => EntityKind::Source,
        }
    }

    /// Human-readable label (document title, folder or source name)
    #[inline]
    #[must_use]
    pub fn title(&self) -> &str {
        match self {
            Self::Document(d) => &d.title,
            Self::Folder(f) => &f.name,
            Self::Source(s) => &s.name,
        }
    }

    /// Copy of this entity under another id
    #[must_use]
    pub fn with_id(&self, id: EntityId) -> Entity {
        let mut entity = self.clone();
        match &mut entity {
            Self::Document(d) => d.id = id,
            Self::Folder(f) => f.id = id,
            Self::Source(s) => s.id = id,
        }
        entity
    }

    /// Apply a field patch in place
    ///
    /// # Errors
    /// Returns `ValidationError::KindMismatch` if the patch targets another kind
    pub fn apply(&mut self, patch: &EntityPatch) -> Result<(), ValidationError> {
        match (self, patch) {
            (Self::Document(d), EntityPatch::Document(p)) => {
                p.apply_to(d);
                Ok(())
            }
            (Self::Folder(f), EntityPatch::Folder(p)) => {
                p.apply_to(f);
                Ok(())
            }
            (Self::Source(s), EntityPatch::Source(p)) => {
                p.apply_to(s);
                Ok(())
            }
            (entity, patch) => Err(ValidationError::KindMismatch {
                patch: patch.kind(),
                entity: entity.kind(),
            }),
        }
    }

    /// Borrow as a document
    #[inline]
    #[must_use]
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Self::Document(d) => Some(d),
            _ => None,
        }
    }

    /// Borrow as a folder
    #[inline]
    #[must_use]
    pub fn as_folder(&self) -> Option<&Folder> {
        match self {
            Self::Folder(f) => Some(f),
            _ => None,
        }
    }

    /// Borrow as a source
    #[inline]
    #[must_use]
    pub fn as_source(&self) -> Option<&Source> {
        match self {
            Self::Source(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Document> for Entity {
    fn from(value: Document) -> Self {
        Self::Document(value)
    }
}

impl From<Folder> for Entity {
    fn from(value: Folder) -> Self {
        Self::Folder(value)
    }
}

impl From<Source> for Entity {
    fn from(value: Source) -> Self {
        Self::Source(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{DocumentPatch, FolderPatch};

    fn doc(version: u64, content: Option<&str>) -> Document {
        Document {
            id: EntityId::new("doc-1"),
            title: "Notes".to_string(),
            folder_id: None,
            content: content.map(str::to_string),
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
            version,
        }
    }

    #[test]
    fn merge_listing_keeps_body_for_same_version() {
        let cached = doc(3, Some("body"));
        let merged = cached.merge_listing(doc(3, None));
        assert_eq!(merged.content.as_deref(), Some("body"));
    }

    #[test]
    fn merge_listing_drops_body_for_newer_version() {
        let cached = doc(3, Some("body"));
        let merged = cached.merge_listing(doc(4, None));
        assert!(merged.content.is_none());
    }

    #[test]
    fn apply_rejects_mismatched_kind() {
        let mut entity = Entity::from(doc(1, None));
        let err = entity
            .apply(&EntityPatch::Folder(FolderPatch::rename("x")))
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::KindMismatch {
                patch: EntityKind::Folder,
                entity: EntityKind::Document,
            }
        );
    }

    #[test]
    fn apply_patches_title() {
        let mut entity = Entity::from(doc(1, None));
        entity
            .apply(&EntityPatch::Document(DocumentPatch::rename("Renamed")))
            .unwrap();
        assert_eq!(entity.title(), "Renamed");
    }

    #[test]
    fn unknown_source_type_is_preserved() {
        let parsed: SourceType = serde_json::from_str("\"notion\"").unwrap();
        assert_eq!(parsed, SourceType::Other("notion".to_string()));
        let known: SourceType = serde_json::from_str("\"url\"").unwrap();
        assert_eq!(known, SourceType::Url);
    }
}
