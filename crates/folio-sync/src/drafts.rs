//! Local drafts of unsaved document bodies
//!
//! Drafts are a cold-start fallback only. While a session is live the
//! mutation coordinator owns every speculative value and drafts never touch
//! the cache; after a restart [`DraftStore::recover`] offers each draft
//! together with whether the document moved on since it was written.

use crate::error::{StorageError, SyncError};
use crate::kv::{decode, KvStore};
use chrono::{DateTime, Utc};
use folio_cache::CacheStore;
use folio_model::{Clock, EntityId, WorkspaceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Storage key for a workspace's drafts
#[must_use]
pub fn storage_key(workspace: &WorkspaceId) -> String {
    format!("drafts:{workspace}")
}

/// Unsaved body of one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    /// Document the draft belongs to
    pub document_id: EntityId,
    /// Unsaved body
    pub content: String,
    /// Document version the edit started from
    pub base_version: u64,
    /// When the draft was written
    pub saved_at: DateTime<Utc>,
}

/// What to do with a draft found at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// The document is still at the draft's base version
    Recoverable(Draft),
    /// The document changed or disappeared since the draft was written
    Outdated {
        /// The draft
        draft: Draft,
        /// Version now cached, `None` if the document is gone
        current_version: Option<u64>,
    },
}

impl Recovery {
    /// The draft either way
    #[must_use]
    pub fn draft(&self) -> &Draft {
        match self {
            Self::Recoverable(draft) | Self::Outdated { draft, .. } => draft,
        }
    }
}

/// Durable drafts for one workspace
pub struct DraftStore {
    key: String,
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    // serializes read-modify-write of the key
    lock: Mutex<()>,
}

impl std::fmt::Debug for DraftStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DraftStore")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl DraftStore {
    /// Drafts of `workspace`
    #[must_use]
    pub fn new(workspace: &WorkspaceId, kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            key: storage_key(workspace),
            kv,
            clock,
            lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> Result<BTreeMap<EntityId, Draft>, SyncError> {
        match self.kv.get(&self.key).await? {
            Some(value) => Ok(decode(&self.key, value)?),
            None => Ok(BTreeMap::new()),
        }
    }

    async fn write(&self, drafts: &BTreeMap<EntityId, Draft>) -> Result<(), SyncError> {
        if drafts.is_empty() {
            self.kv.remove(&self.key).await?;
        } else {
            let value = serde_json::to_value(drafts).map_err(|e| StorageError::Corrupt {
                key: self.key.clone(),
                reason: e.to_string(),
            })?;
            self.kv.set(&self.key, value).await?;
        }
        Ok(())
    }

    /// Store (or replace) the draft of a document
    ///
    /// # Errors
    /// Returns `SyncError::Storage` if the store fails or holds unreadable data
    pub async fn save(&self, document_id: &EntityId, content: impl Into<String>, base_version: u64) -> Result<Draft, SyncError> {
        let _guard = self.lock.lock().await;
        let mut drafts = self.read().await?;
        let draft = Draft {
            document_id: document_id.clone(),
            content: content.into(),
            base_version,
            saved_at: self.clock.now(),
        };
        drafts.insert(document_id.clone(), draft.clone());
        self.write(&drafts).await?;
        tracing::debug!(document = %document_id, base_version, "draft saved");
        Ok(draft)
    }

    /// Drop the draft of a document; returns whether one existed
    ///
    /// # Errors
    /// Returns `SyncError::Storage` if the store fails or holds unreadable data
    pub async fn discard(&self, document_id: &EntityId) -> Result<bool, SyncError> {
        let _guard = self.lock.lock().await;
        let mut drafts = self.read().await?;
        let existed = drafts.remove(document_id).is_some();
        if existed {
            self.write(&drafts).await?;
        }
        Ok(existed)
    }

    /// Every stored draft, ordered by document id
    ///
    /// # Errors
    /// Returns `SyncError::Storage` if the store fails or holds unreadable data
    pub async fn list(&self) -> Result<Vec<Draft>, SyncError> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.into_values().collect())
    }

    /// Classify stored drafts against the cached documents
    ///
    /// Call after the first snapshot load. Nothing is written to the cache.
    ///
    /// # Errors
    /// Returns `SyncError::Storage` if the store fails or holds unreadable data
    pub async fn recover(&self, store: &CacheStore) -> Result<Vec<Recovery>, SyncError> {
        let drafts = self.list().await?;
        let recoveries: Vec<Recovery> = drafts
            .into_iter()
            .map(|draft| {
                let current_version = store.get_document(&draft.document_id).map(|e| e.data.version);
                if current_version == Some(draft.base_version) {
                    Recovery::Recoverable(draft)
                } else {
                    Recovery::Outdated { draft, current_version }
                }
            })
            .collect();
        if !recoveries.is_empty() {
            tracing::info!(
                drafts = recoveries.len(),
                recoverable = recoveries.iter().filter(|r| matches!(r, Recovery::Recoverable(_))).count(),
                "local drafts found"
            );
        }
        Ok(recoveries)
    }
}
