//! Workspace snapshot loader
//!
//! Fetches documents, folders and sources in parallel as one logical
//! snapshot and replaces the cache contents in a single atomic write.
//!
//! - Concurrent `load` calls for a workspace share one in-flight fetch
//! - Every fetch carries a sequence number; only the most recently issued
//!   fetch may write, a late result from an older one is discarded
//! - Transient network errors are retried with exponential backoff
//! - On failure the previous snapshot stays in place and the status
//!   reports the fault

use crate::api::{Page, PageRequest, WorkspaceApi};
use crate::config::SyncConfig;
use crate::error::{ApiError, SyncError};
use chrono::{DateTime, Utc};
use folio_cache::CacheStore;
use folio_model::{parse, Clock, EntityKind, ValidationError, WorkspaceId, WorkspaceSnapshot};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Result shared by every caller of one load
pub type LoadResult = Result<Arc<WorkspaceSnapshot>, SyncError>;

type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

/// Load state as seen by the UI
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadStatus {
    /// Nothing requested yet
    #[default]
    Idle,
    /// A fetch is in flight
    Loading {
        /// Workspace being loaded
        workspace: WorkspaceId,
        /// Sequence of the fetch
        sequence: u64,
    },
    /// Last fetch succeeded
    Loaded {
        /// Workspace loaded
        workspace: WorkspaceId,
        /// When the snapshot was fetched
        fetched_at: DateTime<Utc>,
        /// Entities written
        entities: usize,
        /// Items dropped at validation
        rejected: usize,
    },
    /// Last fetch failed
    Faulted {
        /// Workspace that failed
        workspace: WorkspaceId,
        /// Final error after retries
        error: SyncError,
        /// Whether an older snapshot is still being served
        serving_stale: bool,
    },
}

impl LoadStatus {
    /// Whether the last load failed
    #[inline]
    #[must_use]
    pub fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted { .. })
    }

    /// Whether a load is running
    #[inline]
    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading { .. })
    }
}

struct InFlight {
    sequence: u64,
    future: SharedLoad,
}

struct Inner {
    api: Arc<dyn WorkspaceApi>,
    store: Arc<CacheStore>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    issued: AtomicU64,
    inflight: Mutex<HashMap<WorkspaceId, InFlight>>,
    commit: Mutex<()>,
    status: RwLock<LoadStatus>,
    fetches: AtomicU64,
}

/// Single-flight snapshot loader
#[derive(Clone)]
pub struct WorkspaceLoader {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WorkspaceLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceLoader")
            .field("issued", &self.inner.issued.load(Ordering::SeqCst))
            .field("fetches", &self.inner.fetches.load(Ordering::SeqCst))
            .field("status", &*self.inner.status.read())
            .finish_non_exhaustive()
    }
}

impl WorkspaceLoader {
    /// Create a loader writing into `store`
    #[must_use]
    pub fn new(api: Arc<dyn WorkspaceApi>, store: Arc<CacheStore>, clock: Arc<dyn Clock>, config: SyncConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                store,
                clock,
                config,
                issued: AtomicU64::new(0),
                inflight: Mutex::new(HashMap::new()),
                commit: Mutex::new(()),
                status: RwLock::new(LoadStatus::Idle),
                fetches: AtomicU64::new(0),
            }),
        }
    }

    /// Load a workspace, joining an in-flight fetch if one is current
    ///
    /// # Errors
    /// - `SyncError::Superseded` if a newer load was issued meanwhile
    /// - the final fetch error once retries are exhausted
    pub async fn load(&self, workspace: &WorkspaceId) -> LoadResult {
        self.start(workspace, false).await
    }

    /// Issue a new fetch even if one is in flight; the older one is superseded
    ///
    /// # Errors
    /// Same as [`WorkspaceLoader::load`]
    pub async fn reload(&self, workspace: &WorkspaceId) -> LoadResult {
        self.start(workspace, true).await
    }

    /// Current load status
    #[must_use]
    pub fn status(&self) -> LoadStatus {
        self.inner.status.read().clone()
    }

    /// Snapshot fetch attempts issued so far, retries included
    #[inline]
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.inner.fetches.load(Ordering::SeqCst)
    }

    /// Most recently issued sequence number
    #[inline]
    #[must_use]
    pub fn latest_sequence(&self) -> u64 {
        self.inner.issued.load(Ordering::SeqCst)
    }

    fn start(&self, workspace: &WorkspaceId, force: bool) -> SharedLoad {
        let mut inflight = self.inner.inflight.lock();
        if !force {
            if let Some(current) = inflight.get(workspace) {
                if current.sequence == self.inner.issued.load(Ordering::SeqCst) {
                    tracing::debug!(%workspace, sequence = current.sequence, "joining in-flight load");
                    return current.future.clone();
                }
            }
        }
        let sequence = self.inner.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(&self.inner);
        let target = workspace.clone();
        let future = async move { inner.run(target, sequence).await }.boxed().shared();
        inflight.insert(
            workspace.clone(),
            InFlight {
                sequence,
                future: future.clone(),
            },
        );
        *self.inner.status.write() = LoadStatus::Loading {
            workspace: workspace.clone(),
            sequence,
        };
        future
    }
}

impl Inner {
    fn is_current(&self, sequence: u64) -> bool {
        self.issued.load(Ordering::SeqCst) == sequence
    }

    async fn run(self: Arc<Self>, workspace: WorkspaceId, sequence: u64) -> LoadResult {
        tracing::info!(%workspace, sequence, "loading workspace snapshot");
        let fetched = self.fetch_with_retry(&workspace, sequence).await;

        let outcome = {
            let _commit = self.commit.lock();
            if self.is_current(sequence) {
                self.settle(&workspace, fetched)
            } else {
                tracing::info!(%workspace, sequence, "discarding superseded snapshot");
                Err(SyncError::Superseded {
                    workspace: workspace.clone(),
                    sequence,
                })
            }
        };

        let mut inflight = self.inflight.lock();
        if inflight.get(&workspace).is_some_and(|f| f.sequence == sequence) {
            inflight.remove(&workspace);
        }
        outcome
    }

    fn settle(&self, workspace: &WorkspaceId, fetched: Result<WorkspaceSnapshot, SyncError>) -> LoadResult {
        match fetched {
            Ok(snapshot) => {
                self.store.replace_snapshot(&snapshot);
                tracing::info!(
                    %workspace,
                    documents = snapshot.documents.len(),
                    folders = snapshot.folders.len(),
                    sources = snapshot.sources.len(),
                    rejected = snapshot.rejected,
                    "workspace snapshot loaded"
                );
                *self.status.write() = LoadStatus::Loaded {
                    workspace: workspace.clone(),
                    fetched_at: snapshot.fetched_at,
                    entities: snapshot.len(),
                    rejected: snapshot.rejected,
                };
                Ok(Arc::new(snapshot))
            }
            Err(error) => {
                let serving_stale = self.store.workspace().as_ref() == Some(workspace)
                    && self.store.get_snapshot().is_loaded();
                tracing::error!(%workspace, %error, serving_stale, "workspace load failed");
                *self.status.write() = LoadStatus::Faulted {
                    workspace: workspace.clone(),
                    error: error.clone(),
                    serving_stale,
                };
                Err(error)
            }
        }
    }

    async fn fetch_with_retry(&self, workspace: &WorkspaceId, sequence: u64) -> Result<WorkspaceSnapshot, SyncError> {
        let max_attempts = self.config.load_max_attempts.max(1);
        let mut attempt = 1;
        loop {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            match self.fetch_snapshot(workspace).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let delay = self.config.load_backoff(attempt);
                    tracing::warn!(
                        %workspace,
                        sequence,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        %error,
                        "snapshot fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    if !self.is_current(sequence) {
                        return Err(SyncError::Superseded {
                            workspace: workspace.clone(),
                            sequence,
                        });
                    }
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    async fn fetch_snapshot(&self, workspace: &WorkspaceId) -> Result<WorkspaceSnapshot, ApiError> {
        let (documents, folders, sources) = tokio::try_join!(
            self.list_all(workspace, EntityKind::Document),
            self.list_all(workspace, EntityKind::Folder),
            self.list_all(workspace, EntityKind::Source),
        )?;

        let mut snapshot = WorkspaceSnapshot::empty(workspace.clone(), self.clock.now());
        snapshot.documents = keep_valid(EntityKind::Document, documents, parse::parse_document, &mut snapshot.rejected);
        snapshot.folders = keep_valid(EntityKind::Folder, folders, parse::parse_folder, &mut snapshot.rejected);
        snapshot.sources = keep_valid(EntityKind::Source, sources, parse::parse_source, &mut snapshot.rejected);
        Ok(snapshot)
    }

    async fn list_all(&self, workspace: &WorkspaceId, kind: EntityKind) -> Result<Vec<Value>, ApiError> {
        let mut request = PageRequest::first(self.config.page_size.max(1));
        let mut items = Vec::new();
        loop {
            let page: Page<Value> = match kind {
                EntityKind::Document => self.api.list_documents(workspace, request).await?,
                EntityKind::Folder => self.api.list_folders(workspace, request).await?,
                EntityKind::Source => self.api.list_sources(workspace, request).await?,
            };
            let received = page.items.len();
            items.extend(page.items);
            if !page.has_more {
                break;
            }
            if received == 0 {
                tracing::warn!(%workspace, %kind, offset = request.offset, "empty page claims more items, stopping");
                break;
            }
            request = request.next(received);
        }
        Ok(items)
    }
}

fn keep_valid<T>(
    kind: EntityKind,
    raw: Vec<Value>,
    parse: fn(Value) -> Result<T, ValidationError>,
    rejected: &mut usize,
) -> Vec<T> {
    raw.into_iter()
        .filter_map(|value| match parse(value) {
            Ok(item) => Some(item),
            Err(error) => {
                tracing::warn!(%kind, %error, "dropping invalid item");
                *rejected += 1;
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_model::{Folder, SourceType};
    use serde_json::json;

    #[test]
    fn keep_valid_counts_rejections() {
        let mut rejected = 0;
        let folders: Vec<Folder> = keep_valid(
            EntityKind::Folder,
            vec![
                json!({"id": "f1", "name": "A"}),
                json!({"id": "", "name": "B"}),
                json!({"id": "f3", "name": "C", "parentFolderId": "f3"}),
            ],
            parse::parse_folder,
            &mut rejected,
        );
        assert_eq!(folders.len(), 1);
        assert_eq!(rejected, 2);
    }

    #[test]
    fn keep_valid_passes_sources_through() {
        let mut rejected = 0;
        let sources = keep_valid(
            EntityKind::Source,
            vec![json!({"id": "s1", "name": "Paper", "type": "url"})],
            parse::parse_source,
            &mut rejected,
        );
        assert_eq!(sources[0].source_type, SourceType::Url);
        assert_eq!(rejected, 0);
    }

    #[test]
    fn status_helpers() {
        assert!(!LoadStatus::Idle.is_loading());
        let loading = LoadStatus::Loading {
            workspace: WorkspaceId::new("w"),
            sequence: 1,
        };
        assert!(loading.is_loading());
        assert!(LoadStatus::Faulted {
            workspace: WorkspaceId::new("w"),
            error: SyncError::Cancelled,
            serving_stale: true,
        }
        .is_faulted());
    }
}
