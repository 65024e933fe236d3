//! Field-level patches
//!
//! A patch names exactly the fields it writes. The cache uses
//! [`EntityPatch::fields`] to track which write owns each field and
//! [`EntityPatch::strip`] to retire fields that a later authoritative write
//! has superseded.

use crate::entity::{Document, EntityKind, Folder, Source};
use crate::ids::EntityId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A patchable field
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    /// `Document::title`
    Title,
    /// `Document::folder_id`
    FolderId,
    /// `Document::content`
    Content,
    /// `Folder::name` / `Source::name`
    Name,
    /// `Folder::parent_folder_id`
    ParentFolderId,
}

impl Field {
    /// Every patchable field of an entity kind
    #[must_use]
    pub fn all_for(kind: EntityKind) -> &'static [Field] {
        match kind {
            EntityKind::Document => &[Field::Title, Field::FolderId, Field::Content],
            EntityKind::Folder => &[Field::Name, Field::ParentFolderId],
            EntityKind::Source => &[Field::Name],
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Title => "title",
            Field::FolderId => "folderId",
            Field::Content => "content",
            Field::Name => "name",
            Field::ParentFolderId => "parentFolderId",
        };
        f.write_str(name)
    }
}

/// Partial update of a document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPatch {
    /// New title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New folder (`Some(None)` moves to the workspace root)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<Option<EntityId>>,
    /// New body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl DocumentPatch {
    /// Patch that only renames
    #[must_use]
    pub fn rename(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Patch that only moves
    #[must_use]
    pub fn move_to(folder_id: Option<EntityId>) -> Self {
        Self {
            folder_id: Some(folder_id),
            ..Self::default()
        }
    }

    /// Patch that only replaces the body
    #[must_use]
    pub fn edit(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub(crate) fn apply_to(&self, doc: &mut Document) {
        if let Some(title) = &self.title {
            doc.title.clone_from(title);
        }
        if let Some(folder_id) = &self.folder_id {
            doc.folder_id.clone_from(folder_id);
        }
        if let Some(content) = &self.content {
            doc.content = Some(content.clone());
        }
    }

    fn fields(&self) -> Vec<Field> {
        let mut fields = Vec::new();
        if self.title.is_some() {
            fields.push(Field::Title);
        }
        if self.folder_id.is_some() {
            fields.push(Field::FolderId);
        }
        if self.content.is_some() {
            fields.push(Field::Content);
        }
        fields
    }

    fn strip(&mut self, fields: &[Field]) {
        for field in fields {
            match field {
                Field::Title => self.title = None,
                Field::FolderId => self.folder_id = None,
                Field::Content => self.content = None,
                Field::Name | Field::ParentFolderId => {}
            }
        }
    }
}

/// Partial update of a folder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderPatch {
    /// New name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New parent (`Some(None)` moves to the workspace root)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_folder_id: Option<Option<EntityId>>,
}

impl FolderPatch {
    /// Patch that only renames
    #[must_use]
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Patch that only re-parents
    #[must_use]
    pub fn move_to(parent: Option<EntityId>) -> Self {
        Self {
            parent_folder_id: Some(parent),
            ..Self::default()
        }
    }

    pub(crate) fn apply_to(&self, folder: &mut Folder) {
        if let Some(name) = &self.name {
            folder.name.clone_from(name);
        }
        if let Some(parent) = &self.parent_folder_id {
            folder.parent_folder_id.clone_from(parent);
        }
    }

    fn fields(&self) -> Vec<Field> {
        let mut fields = Vec::new();
        if self.name.is_some() {
            fields.push(Field::Name);
        }
        if self.parent_folder_id.is_some() {
            fields.push(Field::ParentFolderId);
        }
        fields
    }

    fn strip(&mut self, fields: &[Field]) {
        for field in fields {
            match field {
                Field::Name => self.name = None,
                Field::ParentFolderId => self.parent_folder_id = None,
                Field::Title | Field::FolderId | Field::Content => {}
            }
        }
    }
}

/// Partial update of a source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcePatch {
    /// New name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SourcePatch {
    pub(crate) fn apply_to(&self, source: &mut Source) {
        if let Some(name) = &self.name {
            source.name.clone_from(name);
        }
    }
}

/// Partial update of any entity kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntityPatch {
    /// Document patch
    Document(DocumentPatch),
    /// Folder patch
    Folder(FolderPatch),
    /// Source patch
    Source(SourcePatch),
}

impl EntityPatch {
    /// Kind this patch applies to
    #[inline]
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Document(_) => EntityKind::Document,
            Self::Folder(_) => EntityKind::Folder,
            Self::Source(_) => EntityKind::Source,
        }
    }

    /// Fields this patch writes
    #[must_use]
    pub fn fields(&self) -> Vec<Field> {
        match self {
            Self::Document(p) => p.fields(),
            Self::Folder(p) => p.fields(),
            Self::Source(p) => {
                if p.name.is_some() {
                    vec![Field::Name]
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Whether this patch writes `field`
    #[inline]
    #[must_use]
    pub fn touches(&self, field: Field) -> bool {
        self.fields().contains(&field)
    }

    /// Remove the given fields from this patch
    pub fn strip(&mut self, fields: &[Field]) {
        match self {
            Self::Document(p) => p.strip(fields),
            Self::Folder(p) => p.strip(fields),
            Self::Source(p) => {
                if fields.contains(&Field::Name) {
                    p.name = None;
                }
            }
        }
    }

    /// Whether this patch no longer writes anything
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }
}

impl From<DocumentPatch> for EntityPatch {
    fn from(value: DocumentPatch) -> Self {
        Self::Document(value)
    }
}

impl From<FolderPatch> for EntityPatch {
    fn from(value: FolderPatch) -> Self {
        Self::Folder(value)
    }
}

impl From<SourcePatch> for EntityPatch {
    fn from(value: SourcePatch) -> Self {
        Self::Source(value)
    }
}
