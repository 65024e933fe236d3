//! Workspace API collaborator
//!
//! The engine never talks HTTP itself. It consumes this trait and receives
//! raw JSON payloads, which are validated by [`folio_model::parse`] before
//! anything reaches the cache.

use crate::error::ApiError;
use async_trait::async_trait;
use folio_model::{DocumentPatch, EntityId, FolderPatch, WorkspaceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One page of a list endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Total items across all pages
    pub total: usize,
    /// Whether another page follows
    pub has_more: bool,
}

/// Offset/limit window for list endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Items to skip
    pub offset: usize,
    /// Maximum items to return
    pub limit: usize,
}

impl PageRequest {
    /// First page of the given size
    #[inline]
    #[must_use]
    pub fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }

    /// Page after one that returned `received` items
    #[inline]
    #[must_use]
    pub fn next(self, received: usize) -> Self {
        Self {
            offset: self.offset + received,
            limit: self.limit,
        }
    }
}

/// Payload for creating a document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDocument {
    /// Initial title
    pub title: String,
    /// Containing folder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<EntityId>,
    /// Initial body
    #[serde(default)]
    pub content: String,
}

impl NewDocument {
    /// Empty document with a title
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Place the document in a folder
    #[must_use]
    pub fn in_folder(mut self, folder_id: EntityId) -> Self {
        self.folder_id = Some(folder_id);
        self
    }
}

/// Payload for creating a folder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFolder {
    /// Folder name
    pub name: String,
    /// Parent folder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_folder_id: Option<EntityId>,
}

impl NewFolder {
    /// Top-level folder with a name
    #[inline]
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent_folder_id: None,
        }
    }

    /// Place the folder under a parent
    #[inline]
    #[must_use]
    pub fn child_of(mut self, parent: EntityId) -> Self {
        self.parent_folder_id = Some(parent);
        self
    }
}

/// Remote workspace API
///
/// Entity payloads are returned untyped; callers validate them.
#[async_trait]
pub trait WorkspaceApi: Send + Sync + 'static {
    /// List document metadata (bodies usually omitted)
    async fn list_documents(&self, workspace: &WorkspaceId, page: PageRequest) -> Result<Page<Value>, ApiError>;

    /// Fetch one document including its body
    async fn get_document(&self, workspace: &WorkspaceId, id: &EntityId) -> Result<Value, ApiError>;

    /// Create a document; returns it with its server id
    async fn create_document(&self, workspace: &WorkspaceId, document: &NewDocument) -> Result<Value, ApiError>;

    /// Update a document; returns the stored result
    async fn update_document(
        &self,
        workspace: &WorkspaceId,
        id: &EntityId,
        patch: &DocumentPatch,
    ) -> Result<Value, ApiError>;

    /// Delete a document
    async fn delete_document(&self, workspace: &WorkspaceId, id: &EntityId) -> Result<(), ApiError>;

    /// List folders
    async fn list_folders(&self, workspace: &WorkspaceId, page: PageRequest) -> Result<Page<Value>, ApiError>;

    /// Create a folder; returns it with its server id
    async fn create_folder(&self, workspace: &WorkspaceId, folder: &NewFolder) -> Result<Value, ApiError>;

    /// Update a folder; returns the stored result
    async fn update_folder(
        &self,
        workspace: &WorkspaceId,
        id: &EntityId,
        patch: &FolderPatch,
    ) -> Result<Value, ApiError>;

    /// Delete a folder
    async fn delete_folder(&self, workspace: &WorkspaceId, id: &EntityId) -> Result<(), ApiError>;

    /// List sources
    async fn list_sources(&self, workspace: &WorkspaceId, page: PageRequest) -> Result<Page<Value>, ApiError>;
}
