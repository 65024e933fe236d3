//! Sync engine configuration
//!
//! Every field has a default, so a TOML file only needs the values it
//! overrides:
//!
//! ```toml
//! max_concurrent_prefetch = 5
//! settle_delay_ms = 500
//! ```

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables for loading, prefetching, access tracking and navigation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Simultaneous document-body prefetches
    pub max_concurrent_prefetch: usize,
    /// Interval between background prefetch cycles
    pub prefetch_interval_ms: u64,
    /// Delay between workspace activation and the first prefetch cycle
    pub settle_delay_ms: u64,
    /// Per-document prefetch timeout
    pub prefetch_timeout_ms: u64,
    /// Documents modified within this many days are prefetch candidates
    pub recent_window_days: i64,
    /// Most-accessed documents considered per cycle
    pub prefetch_top_k: usize,
    /// Attempts per snapshot load, including the first
    pub load_max_attempts: u32,
    /// Backoff before the second attempt; doubles afterwards
    pub load_backoff_base_ms: u64,
    /// Items requested per list page
    pub page_size: usize,
    /// Access records older than this are pruned
    pub access_retention_days: i64,
    /// Half-life of the access decay score
    pub access_half_life_hours: f64,
    /// Cached bodies older than this are dropped by the sweep
    pub entry_ttl_ms: u64,
    /// Maximum folder depth walked for breadcrumbs
    pub breadcrumb_max_depth: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_prefetch: 3,
            prefetch_interval_ms: 600_000,
            settle_delay_ms: 2_000,
            prefetch_timeout_ms: 15_000,
            recent_window_days: 7,
            prefetch_top_k: 20,
            load_max_attempts: 3,
            load_backoff_base_ms: 250,
            page_size: 200,
            access_retention_days: 30,
            access_half_life_hours: 24.0,
            entry_ttl_ms: 1_800_000,
            breadcrumb_max_depth: 64,
        }
    }
}

impl SyncConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML text
    ///
    /// # Errors
    /// Returns `SyncError::Config` on malformed input or invalid values
    pub fn from_toml_str(text: &str) -> Result<Self, SyncError> {
        let config: Self = toml::from_str(text).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns `SyncError::Config` if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Reject values the engine cannot run with
    ///
    /// # Errors
    /// Returns `SyncError::Config` naming the first offending field
    pub fn validate(&self) -> Result<(), SyncError> {
        let invalid = |field: &str| Err(SyncError::Config(format!("{field} must be positive")));
        if self.max_concurrent_prefetch == 0 {
            return invalid("max_concurrent_prefetch");
        }
        if self.load_max_attempts == 0 {
            return invalid("load_max_attempts");
        }
        if self.page_size == 0 {
            return invalid("page_size");
        }
        if self.prefetch_interval_ms == 0 {
            return invalid("prefetch_interval_ms");
        }
        if self.access_half_life_hours.is_nan() || self.access_half_life_hours <= 0.0 {
            return invalid("access_half_life_hours");
        }
        if self.breadcrumb_max_depth == 0 {
            return invalid("breadcrumb_max_depth");
        }
        Ok(())
    }

    /// With prefetch concurrency
    #[inline]
    #[must_use]
    pub fn with_max_concurrent_prefetch(mut self, max: usize) -> Self {
        self.max_concurrent_prefetch = max;
        self
    }

    /// With settle delay
    #[inline]
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay_ms = millis(delay);
        self
    }

    /// With prefetch interval
    #[inline]
    #[must_use]
    pub fn with_prefetch_interval(mut self, interval: Duration) -> Self {
        self.prefetch_interval_ms = millis(interval);
        self
    }

    /// With per-document prefetch timeout
    #[inline]
    #[must_use]
    pub fn with_prefetch_timeout(mut self, timeout: Duration) -> Self {
        self.prefetch_timeout_ms = millis(timeout);
        self
    }

    /// With access decay half-life
    #[inline]
    #[must_use]
    pub fn with_half_life_hours(mut self, hours: f64) -> Self {
        self.access_half_life_hours = hours;
        self
    }

    /// With load retry policy
    #[inline]
    #[must_use]
    pub fn with_load_retries(mut self, max_attempts: u32, backoff_base: Duration) -> Self {
        self.load_max_attempts = max_attempts;
        self.load_backoff_base_ms = millis(backoff_base);
        self
    }

    /// With list page size
    #[inline]
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Interval between prefetch cycles
    #[inline]
    #[must_use]
    pub fn prefetch_interval(&self) -> Duration {
        Duration::from_millis(self.prefetch_interval_ms)
    }

    /// Delay before the first cycle of a workspace
    #[inline]
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Per-document prefetch timeout
    #[inline]
    #[must_use]
    pub fn prefetch_timeout(&self) -> Duration {
        Duration::from_millis(self.prefetch_timeout_ms)
    }

    /// Backoff before retry number `attempt` (1-based)
    #[must_use]
    pub fn load_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.load_backoff_base_ms.saturating_mul(factor))
    }

    /// Cache entry time-to-live
    #[inline]
    #[must_use]
    pub fn entry_ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.entry_ttl_ms).unwrap_or(i64::MAX))
    }

    /// Access record retention
    #[inline]
    #[must_use]
    pub fn access_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.access_retention_days)
    }

    /// Recent-modification window for prefetch candidates
    #[inline]
    #[must_use]
    pub fn recent_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.recent_window_days)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
