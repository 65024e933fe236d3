//! Full-load workspace snapshot

use crate::entity::{Document, Entity, EntityKind, Folder, Source};
use crate::ids::WorkspaceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authoritative full-load payload for one workspace
///
/// Produced by the loader after every item has passed boundary validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSnapshot {
    /// Workspace this snapshot belongs to
    pub workspace_id: WorkspaceId,
    /// All documents (listing shape, bodies usually absent)
    pub documents: Vec<Document>,
    /// All folders
    pub folders: Vec<Folder>,
    /// All sources
    pub sources: Vec<Source>,
    /// When the fetch completed
    pub fetched_at: DateTime<Utc>,
    /// Items dropped at the boundary because they failed validation
    #[serde(default)]
    pub rejected: usize,
}

impl WorkspaceSnapshot {
    /// Empty snapshot
    #[must_use]
    pub fn empty(workspace_id: WorkspaceId, fetched_at: DateTime<Utc>) -> Self {
        Self {
            workspace_id,
            documents: Vec::new(),
            folders: Vec::new(),
            sources: Vec::new(),
            fetched_at,
            rejected: 0,
        }
    }

    /// Entities of one kind, wrapped in the union
    #[must_use]
    pub fn entities(&self, kind: EntityKind) -> Vec<Entity> {
        match kind {
            EntityKind::Document => self.documents.iter().cloned().map(Entity::from).collect(),
            EntityKind::Folder => self.folders.iter().cloned().map(Entity::from).collect(),
            EntityKind::Source => self.sources.iter().cloned().map(Entity::from).collect(),
        }
    }

    /// Total entity count
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len() + self.folders.len() + self.sources.len()
    }

    /// Whether the workspace holds nothing
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
