//! Access-pattern tracker
//!
//! Keeps `(count, last_access)` per document, persisted under
//! `access:{workspace}`. Ranking uses an exponential decay:
//!
//! `score = count * 0.5 ^ (age / half_life)`
//!
//! so five reads an hour ago outrank one read ten minutes ago with the
//! default 24h half-life, while a half-life of minutes flips that order.

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::kv::{decode, KvStore};
use crate::persist::PersistHandle;
use chrono::{DateTime, Duration, Utc};
use folio_model::{Clock, EntityId, WorkspaceId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// Durable access history for one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRecord {
    /// Document accessed
    pub entity_id: EntityId,
    /// Number of accesses
    pub count: u64,
    /// Most recent access
    pub last_access: DateTime<Utc>,
}

impl AccessRecord {
    /// Decayed score at `now`
    #[must_use]
    pub fn score(&self, now: DateTime<Utc>, half_life: Duration) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let count = self.count as f64;
        count * decay(now - self.last_access, half_life)
    }
}

/// `0.5 ^ (age / half_life)`; future timestamps count as age zero
#[must_use]
pub fn decay(age: Duration, half_life: Duration) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let age_ms = age.num_milliseconds().max(0) as f64;
    #[allow(clippy::cast_precision_loss)]
    let half_ms = half_life.num_milliseconds().max(1) as f64;
    0.5_f64.powf(age_ms / half_ms)
}

/// Storage key for a workspace's access history
#[must_use]
pub fn storage_key(workspace: &WorkspaceId) -> String {
    format!("access:{workspace}")
}

type Records = Arc<RwLock<HashMap<EntityId, AccessRecord>>>;

/// Per-workspace access tracker
pub struct AccessTracker {
    workspace: WorkspaceId,
    records: Records,
    clock: Arc<dyn Clock>,
    retention: Duration,
    half_life: Duration,
    writer: PersistHandle,
}

impl std::fmt::Debug for AccessTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTracker")
            .field("workspace", &self.workspace)
            .field("records", &self.records.read().len())
            .finish_non_exhaustive()
    }
}

impl AccessTracker {
    /// Empty tracker; must be called inside a tokio runtime
    #[must_use]
    pub fn new(workspace: WorkspaceId, kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: &SyncConfig) -> Self {
        Self::with_records(workspace, kv, clock, config, HashMap::new())
    }

    /// Restore persisted history; corrupt data starts an empty history
    ///
    /// # Errors
    /// Returns `SyncError::Storage` if the store cannot be read
    pub async fn load(
        workspace: WorkspaceId,
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        config: &SyncConfig,
    ) -> Result<Self, SyncError> {
        let key = storage_key(&workspace);
        let stored: Vec<AccessRecord> = match kv.get(&key).await? {
            Some(value) => decode(&key, value).unwrap_or_else(|error| {
                tracing::warn!(%workspace, %error, "discarding unreadable access history");
                Vec::new()
            }),
            None => Vec::new(),
        };
        let records = stored.into_iter().map(|r| (r.entity_id.clone(), r)).collect();
        let tracker = Self::with_records(workspace, kv, clock, config, records);
        if tracker.prune() > 0 {
            tracker.writer.mark_dirty();
        }
        tracing::debug!(workspace = %tracker.workspace, records = tracker.len(), "access history loaded");
        Ok(tracker)
    }

    fn with_records(
        workspace: WorkspaceId,
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        config: &SyncConfig,
        records: HashMap<EntityId, AccessRecord>,
    ) -> Self {
        let records: Records = Arc::new(RwLock::new(records));
        let source = Arc::clone(&records);
        let writer = PersistHandle::spawn(kv, storage_key(&workspace), move || {
            let mut list: Vec<AccessRecord> = source.read().values().cloned().collect();
            list.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
            serde_json::to_value(list).ok()
        });
        #[allow(clippy::cast_possible_truncation)]
        let half_life = Duration::milliseconds((config.access_half_life_hours * 3_600_000.0) as i64);
        Self {
            workspace,
            records,
            clock,
            retention: config.access_retention(),
            half_life,
            writer,
        }
    }

    /// Note one access; never blocks on storage
    pub fn record(&self, id: &EntityId) {
        let now = self.clock.now();
        {
            let mut records = self.records.write();
            let record = records.entry(id.clone()).or_insert_with(|| AccessRecord {
                entity_id: id.clone(),
                count: 0,
                last_access: now,
            });
            record.count = record.count.saturating_add(1);
            record.last_access = record.last_access.max(now);
            let cutoff = now - self.retention;
            records.retain(|_, r| r.last_access >= cutoff);
        }
        self.writer.mark_dirty();
    }

    /// Drop an id that no longer exists
    pub fn forget(&self, id: &EntityId) {
        let removed = self.records.write().remove(id).is_some();
        if removed {
            self.writer.mark_dirty();
        }
    }

    /// Rewrite ids after a temporary id was replaced
    pub fn rekey(&self, from: &EntityId, to: &EntityId) {
        let moved = {
            let mut records = self.records.write();
            match records.remove(from) {
                Some(mut record) => {
                    record.entity_id = to.clone();
                    let merged = match records.remove(to) {
                        Some(existing) => AccessRecord {
                            entity_id: to.clone(),
                            count: existing.count.saturating_add(record.count),
                            last_access: existing.last_access.max(record.last_access),
                        },
                        None => record,
                    };
                    records.insert(to.clone(), merged);
                    true
                }
                None => false,
            }
        };
        if moved {
            self.writer.mark_dirty();
        }
    }

    /// Ids ranked by decayed score, most recent access breaking ties
    #[must_use]
    pub fn top_k(&self, k: usize) -> Vec<EntityId> {
        let now = self.clock.now();
        let mut scored: Vec<(f64, AccessRecord)> = self
            .records
            .read()
            .values()
            .map(|r| (r.score(now, self.half_life), r.clone()))
            .collect();
        scored.sort_by(|(sa, a), (sb, b)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.last_access.cmp(&a.last_access))
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });
        scored.into_iter().take(k).map(|(_, r)| r.entity_id).collect()
    }

    /// Decayed score of one id
    #[must_use]
    pub fn score(&self, id: &EntityId) -> Option<f64> {
        let now = self.clock.now();
        self.records.read().get(id).map(|r| r.score(now, self.half_life))
    }

    /// Record for one id
    #[must_use]
    pub fn get(&self, id: &EntityId) -> Option<AccessRecord> {
        self.records.read().get(id).cloned()
    }

    /// Every record
    #[must_use]
    pub fn records(&self) -> Vec<AccessRecord> {
        self.records.read().values().cloned().collect()
    }

    /// Number of tracked ids
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether nothing is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Workspace this tracker belongs to
    #[inline]
    #[must_use]
    pub fn workspace(&self) -> &WorkspaceId {
        &self.workspace
    }

    /// Wait for pending writes to reach storage
    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    fn prune(&self) -> usize {
        let cutoff = self.clock.now() - self.retention;
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, r| r.last_access >= cutoff);
        before - records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use folio_model::ManualClock;

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn tracker(clock: Arc<ManualClock>, config: &SyncConfig) -> (AccessTracker, Arc<MemoryKvStore>) {
        let kv = Arc::new(MemoryKvStore::new());
        let tracker = AccessTracker::new(WorkspaceId::new("w1"), kv.clone(), clock, config);
        (tracker, kv)
    }

    fn id(raw: &str) -> EntityId {
        EntityId::new(raw)
    }

    /// doc-a: 5 accesses ending 1h ago; doc-b: 1 access 10min ago
    fn pinned_history(clock: &ManualClock, tracker: &AccessTracker) {
        for _ in 0..5 {
            tracker.record(&id("doc-a"));
        }
        clock.advance(Duration::minutes(50));
        tracker.record(&id("doc-b"));
        clock.advance(Duration::minutes(10));
    }

    #[tokio::test]
    async fn pinned_decay_favours_frequency_with_day_half_life() {
        let clock = Arc::new(ManualClock::new(start()));
        let (tracker, _) = tracker(clock.clone(), &SyncConfig::default());
        pinned_history(&clock, &tracker);

        // 5 * 0.5^(1/24) = 4.857, 1 * 0.5^(10/1440) = 0.995
        let a = tracker.score(&id("doc-a")).unwrap();
        let b = tracker.score(&id("doc-b")).unwrap();
        assert!((a - 4.857).abs() < 1e-3, "score a = {a}");
        assert!((b - 0.995).abs() < 1e-3, "score b = {b}");
        assert_eq!(tracker.top_k(1), vec![id("doc-a")]);
    }

    #[tokio::test]
    async fn pinned_decay_favours_recency_with_short_half_life() {
        let clock = Arc::new(ManualClock::new(start()));
        let config = SyncConfig::default().with_half_life_hours(10.0 / 60.0);
        let (tracker, _) = tracker(clock.clone(), &config);
        pinned_history(&clock, &tracker);

        // 5 * 0.5^6 = 0.078, 1 * 0.5^1 = 0.5
        assert_eq!(tracker.top_k(1), vec![id("doc-b")]);
        assert_eq!(tracker.top_k(5), vec![id("doc-b"), id("doc-a")]);
    }

    #[tokio::test]
    async fn ties_break_on_recency() {
        let clock = Arc::new(ManualClock::new(start()));
        // both scores decay to exactly zero
        let config = SyncConfig::default().with_half_life_hours(1e-9);
        let (tracker, _) = tracker(clock.clone(), &config);
        tracker.record(&id("a-older"));
        clock.advance(Duration::days(1));
        tracker.record(&id("b-newer"));
        clock.advance(Duration::days(1));
        assert_eq!(tracker.score(&id("a-older")), Some(0.0));
        assert_eq!(tracker.score(&id("b-newer")), Some(0.0));
        assert_eq!(tracker.top_k(2), vec![id("b-newer"), id("a-older")]);
    }

    #[tokio::test]
    async fn record_prunes_old_entries() {
        let clock = Arc::new(ManualClock::new(start()));
        let (tracker, _) = tracker(clock.clone(), &SyncConfig::default());
        tracker.record(&id("ancient"));
        clock.advance(Duration::days(31));
        tracker.record(&id("fresh"));
        assert!(tracker.get(&id("ancient")).is_none());
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test]
    async fn history_survives_reload() {
        let clock = Arc::new(ManualClock::new(start()));
        let (tracker, kv) = tracker(clock.clone(), &SyncConfig::default());
        tracker.record(&id("d1"));
        tracker.record(&id("d1"));
        tracker.flush().await;

        let reloaded = AccessTracker::load(WorkspaceId::new("w1"), kv, clock, &SyncConfig::default())
            .await
            .unwrap();
        assert_eq!(reloaded.get(&id("d1")).unwrap().count, 2);
    }

    #[tokio::test]
    async fn corrupt_history_starts_empty() {
        let clock = Arc::new(ManualClock::new(start()));
        let kv = Arc::new(MemoryKvStore::new());
        kv.set("access:w1", serde_json::json!({"not": "a list"})).await.unwrap();
        let tracker = AccessTracker::load(WorkspaceId::new("w1"), kv, clock, &SyncConfig::default())
            .await
            .unwrap();
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn rekey_merges_counts() {
        let clock = Arc::new(ManualClock::new(start()));
        let (tracker, _) = tracker(clock, &SyncConfig::default());
        tracker.record(&id("tmp-1"));
        tracker.record(&id("doc-42"));
        tracker.rekey(&id("tmp-1"), &id("doc-42"));
        assert!(tracker.get(&id("tmp-1")).is_none());
        assert_eq!(tracker.get(&id("doc-42")).unwrap().count, 2);
    }
}
