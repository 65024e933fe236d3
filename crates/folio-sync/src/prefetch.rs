//! Background prefetch of document bodies
//!
//! Each cycle ranks candidates (most-accessed ids plus recently modified
//! documents), skips anything already fresh or carrying pending edits, and
//! drains the queue through a semaphore so at most `max_concurrent_prefetch`
//! bodies are in flight. A failed or slow fetch is logged and dropped for
//! the rest of the cycle; it becomes a candidate again next cycle. Ids the
//! server reports as gone are evicted and never retried this session.

use crate::access::AccessTracker;
use crate::api::WorkspaceApi;
use crate::config::SyncConfig;
use crate::error::{ApiError, SyncError};
use dashmap::{DashMap, DashSet};
use folio_cache::{CacheStore, EntryState};
use folio_model::{parse, Clock, Entity, EntityId, EntityKind, WorkspaceId};
use indexmap::IndexSet;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};

/// Summary of one prefetch cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrefetchReport {
    /// Candidates ranked at the start of the cycle
    pub candidates: usize,
    /// Bodies fetched and cached
    pub fetched: usize,
    /// Ids the server no longer has
    pub evicted: usize,
    /// Fetches that failed
    pub failed: usize,
    /// Fetches that exceeded the timeout
    pub timed_out: usize,
    /// Fetches aborted by navigation
    pub cancelled: usize,
    /// Queued ids that were no longer eligible
    pub skipped: usize,
    /// Entries expired by the TTL sweep
    pub expired: usize,
    /// Highest number of simultaneous fetches
    pub peak_in_flight: usize,
}

enum Outcome {
    Fetched,
    Skipped,
    Evicted,
    Failed,
    TimedOut,
}

enum Command {
    Trigger,
    Shutdown,
}

/// Fetch one document body into the cache
///
/// Returns `Ok(false)` when the result was dropped because the document
/// picked up optimistic edits while the fetch was in flight.
///
/// # Errors
/// API and validation errors; `NotFound` also evicts the id from the cache
pub(crate) async fn fetch_body(
    api: &dyn WorkspaceApi,
    store: &CacheStore,
    workspace: &WorkspaceId,
    id: &EntityId,
) -> Result<bool, SyncError> {
    store.mark_pending(EntityKind::Document, id);
    let fetched = match api.get_document(workspace, id).await {
        Ok(value) => parse::parse_document(value).map_err(SyncError::from),
        Err(error) => Err(SyncError::from(error)),
    };
    match fetched {
        Ok(document) => {
            if store.has_pending_layers(EntityKind::Document, id) {
                store.invalidate(EntityKind::Document, Some(id));
                return Ok(false);
            }
            store.upsert(EntityKind::Document, vec![Entity::Document(document)])?;
            Ok(true)
        }
        Err(error @ SyncError::Api(ApiError::NotFound { .. })) => {
            store.evict(EntityKind::Document, id, false);
            Err(error)
        }
        Err(error) => {
            store.mark_error(EntityKind::Document, id);
            Err(error)
        }
    }
}

/// Decrements the in-flight gauge on drop, including when a task is aborted
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Inner {
    workspace: WorkspaceId,
    api: Arc<dyn WorkspaceApi>,
    store: Arc<CacheStore>,
    tracker: Arc<AccessTracker>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    semaphore: Arc<Semaphore>,
    queue: Mutex<IndexSet<EntityId>>,
    in_flight: DashMap<EntityId, AbortHandle>,
    evicted: DashSet<EntityId>,
    cycle: tokio::sync::Mutex<()>,
    current: AtomicUsize,
    peak: AtomicUsize,
    cycles: AtomicU64,
    commands: mpsc::UnboundedSender<Command>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
}

impl Inner {
    fn enter(&self) -> InFlightGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(&self.current)
    }

    fn is_eligible(&self, id: &EntityId) -> bool {
        if id.is_temporary() || self.evicted.contains(id) {
            return false;
        }
        match self.store.get(EntityKind::Document, id) {
            Some(entry) => {
                entry.state != EntryState::Fresh
                    && entry.state != EntryState::Pending
                    && !self.store.has_pending_layers(EntityKind::Document, id)
            }
            None => false,
        }
    }

    async fn prefetch(self: Arc<Self>, id: EntityId) -> (EntityId, Outcome) {
        let Ok(_permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
            return (id, Outcome::Skipped);
        };
        // eligibility may have changed while waiting for a permit
        if !self.is_eligible(&id) {
            return (id, Outcome::Skipped);
        }
        let _gauge = self.enter();
        let timeout = self.config.prefetch_timeout();
        let fetch = fetch_body(self.api.as_ref(), &self.store, &self.workspace, &id);
        let outcome = match tokio::time::timeout(timeout, fetch).await {
            Ok(Ok(true)) => Outcome::Fetched,
            Ok(Ok(false)) => Outcome::Skipped,
            Ok(Err(error)) if error.is_not_found() => {
                tracing::debug!(workspace = %self.workspace, document = %id, "prefetch target gone, evicting");
                self.evicted.insert(id.clone());
                self.tracker.forget(&id);
                Outcome::Evicted
            }
            Ok(Err(error)) => {
                tracing::warn!(workspace = %self.workspace, document = %id, %error, "prefetch failed");
                Outcome::Failed
            }
            Err(_) => {
                tracing::warn!(
                    workspace = %self.workspace,
                    document = %id,
                    timeout_ms = self.config.prefetch_timeout_ms,
                    "prefetch timed out"
                );
                self.store.invalidate(EntityKind::Document, Some(&id));
                Outcome::TimedOut
            }
        };
        (id, outcome)
    }
}

/// Bounded-concurrency prefetch queue for one workspace
#[derive(Clone)]
pub struct PrefetchScheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PrefetchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefetchScheduler")
            .field("workspace", &self.inner.workspace)
            .field("queued", &self.inner.queue.lock().len())
            .field("in_flight", &self.inner.in_flight.len())
            .field("cycles", &self.inner.cycles.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl PrefetchScheduler {
    /// Create a scheduler; call [`PrefetchScheduler::spawn`] to start the background loop
    #[must_use]
    pub fn new(
        workspace: WorkspaceId,
        api: Arc<dyn WorkspaceApi>,
        store: Arc<CacheStore>,
        tracker: Arc<AccessTracker>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                workspace,
                api,
                store,
                tracker,
                clock,
                semaphore: Arc::new(Semaphore::new(config.max_concurrent_prefetch.max(1))),
                config,
                queue: Mutex::new(IndexSet::new()),
                in_flight: DashMap::new(),
                evicted: DashSet::new(),
                cycle: tokio::sync::Mutex::new(()),
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                cycles: AtomicU64::new(0),
                commands,
                receiver: Mutex::new(Some(receiver)),
            }),
        }
    }

    /// Ranked, deduplicated candidates that still need a body
    #[must_use]
    pub fn candidates(&self) -> Vec<EntityId> {
        let inner = &self.inner;
        let cutoff = inner.clock.now() - inner.config.recent_window();
        let mut recent: Vec<_> = inner
            .store
            .get_snapshot()
            .documents()
            .into_iter()
            .filter(|entry| entry.data.updated_at >= cutoff)
            .map(|entry| (entry.data.updated_at, entry.data.id))
            .collect();
        recent.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let ranked: IndexSet<EntityId> = inner
            .tracker
            .top_k(inner.config.prefetch_top_k)
            .into_iter()
            .chain(recent.into_iter().map(|(_, id)| id))
            .collect();
        ranked.into_iter().filter(|id| inner.is_eligible(id)).collect()
    }

    /// Queue ids, skipping those already queued or in flight; returns how many were added
    pub fn enqueue(&self, ids: impl IntoIterator<Item = EntityId>) -> usize {
        let mut queue = self.inner.queue.lock();
        let mut added = 0;
        for id in ids {
            if self.inner.in_flight.contains_key(&id) || self.inner.evicted.contains(&id) {
                continue;
            }
            if queue.insert(id) {
                added += 1;
            }
        }
        added
    }

    /// Drop a queued id and abort its in-flight fetch; returns whether anything was cancelled
    pub fn cancel(&self, id: &EntityId) -> bool {
        let dequeued = self.inner.queue.lock().shift_remove(id);
        let aborted = match self.inner.in_flight.remove(id) {
            Some((_, handle)) => {
                handle.abort();
                if self
                    .inner
                    .store
                    .get(EntityKind::Document, id)
                    .is_some_and(|e| e.state == EntryState::Pending)
                {
                    self.inner.store.invalidate(EntityKind::Document, Some(id));
                }
                true
            }
            None => false,
        };
        if dequeued || aborted {
            tracing::debug!(workspace = %self.inner.workspace, document = %id, "prefetch cancelled");
        }
        dequeued || aborted
    }

    /// Ids waiting in the queue, in order
    #[must_use]
    pub fn queued(&self) -> Vec<EntityId> {
        self.inner.queue.lock().iter().cloned().collect()
    }

    /// Ids being fetched right now
    #[must_use]
    pub fn in_flight(&self) -> Vec<EntityId> {
        self.inner.in_flight.iter().map(|e| e.key().clone()).collect()
    }

    /// Whether an id was evicted as gone this session
    #[must_use]
    pub fn is_evicted(&self, id: &EntityId) -> bool {
        self.inner.evicted.contains(id)
    }

    /// Completed cycles
    #[inline]
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.inner.cycles.load(Ordering::SeqCst)
    }

    /// Ask the background loop for an extra cycle
    pub fn trigger(&self) {
        let _ = self.inner.commands.send(Command::Trigger);
    }

    /// Stop the background loop after its current cycle and abort in-flight fetches
    pub fn shutdown(&self) {
        let _ = self.inner.commands.send(Command::Shutdown);
        self.inner.queue.lock().clear();
        let ids: Vec<EntityId> = self.in_flight();
        for id in ids {
            self.cancel(&id);
        }
    }

    /// Run one cycle now and wait for it
    pub async fn run_cycle(&self) -> PrefetchReport {
        let inner = &self.inner;
        let _cycle = inner.cycle.lock().await;
        let mut report = PrefetchReport {
            expired: inner.store.sweep_expired(inner.config.entry_ttl()),
            ..PrefetchReport::default()
        };
        let candidates = self.candidates();
        report.candidates = candidates.len();
        self.enqueue(candidates);
        inner.peak.store(inner.current.load(Ordering::SeqCst), Ordering::SeqCst);

        let mut attempted: HashSet<EntityId> = HashSet::new();
        let mut tasks: JoinSet<(EntityId, Outcome)> = JoinSet::new();
        loop {
            loop {
                let next = inner.queue.lock().shift_remove_index(0);
                let Some(id) = next else {
                    break;
                };
                if !attempted.insert(id.clone()) || !inner.is_eligible(&id) {
                    report.skipped += 1;
                    continue;
                }
                let handle = tasks.spawn(Arc::clone(inner).prefetch(id.clone()));
                inner.in_flight.insert(id, handle);
            }
            let Some(joined) = tasks.join_next().await else {
                break;
            };
            match joined {
                Ok((id, outcome)) => {
                    inner.in_flight.remove(&id);
                    match outcome {
                        Outcome::Fetched => report.fetched += 1,
                        Outcome::Skipped => report.skipped += 1,
                        Outcome::Evicted => report.evicted += 1,
                        Outcome::Failed => report.failed += 1,
                        Outcome::TimedOut => report.timed_out += 1,
                    }
                }
                Err(error) if error.is_cancelled() => report.cancelled += 1,
                Err(error) => {
                    tracing::error!(workspace = %inner.workspace, %error, "prefetch task panicked");
                    report.failed += 1;
                }
            }
        }

        report.peak_in_flight = inner.peak.load(Ordering::SeqCst);
        inner.cycles.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            workspace = %inner.workspace,
            candidates = report.candidates,
            fetched = report.fetched,
            evicted = report.evicted,
            failed = report.failed,
            timed_out = report.timed_out,
            cancelled = report.cancelled,
            peak = report.peak_in_flight,
            "prefetch cycle finished"
        );
        report
    }

    /// Start the background loop: one cycle after the settle delay, then
    /// one per interval, plus one per [`PrefetchScheduler::trigger`]
    ///
    /// Only the first call starts a loop; later calls return a finished task.
    pub fn spawn(&self) -> JoinHandle<()> {
        let Some(mut commands) = self.inner.receiver.lock().take() else {
            tracing::warn!(workspace = %self.inner.workspace, "prefetch loop already started");
            return tokio::spawn(async {});
        };
        let scheduler = self.clone();
        tokio::spawn(async move {
            let config = &scheduler.inner.config;
            let settle = tokio::time::sleep(config.settle_delay());
            tokio::pin!(settle);
            let mut settled = false;
            let period = config.prefetch_interval();
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                let trigger = tokio::select! {
                    biased;
                    command = commands.recv() => match command {
                        Some(Command::Trigger) => "manual",
                        Some(Command::Shutdown) | None => break,
                    },
                    () = &mut settle, if !settled => {
                        settled = true;
                        "settle"
                    }
                    _ = interval.tick() => "interval",
                };
                tracing::debug!(workspace = %scheduler.inner.workspace, trigger, "prefetch cycle starting");
                scheduler.run_cycle().await;
            }
            tracing::debug!(workspace = %scheduler.inner.workspace, "prefetch loop stopped");
        })
    }
}
