//! Error types for the sync engine
//!
//! - [`ApiError`]: what the workspace API collaborator reports
//! - [`StorageError`]: durable key-value failures
//! - [`NavigationError`]: routing and breadcrumb failures
//! - [`SyncError`]: umbrella returned by every engine operation
//!
//! All of them are `Clone` so single-flight waiters can share one result.

use folio_cache::CacheError;
use folio_model::{EntityId, EntityKind, ValidationError, WorkspaceId};

/// Failure reported by the workspace API
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Transient transport failure; safe to retry
    #[error("network error: {0}")]
    Network(String),

    /// Entity is gone server-side
    #[error("{kind} {id} not found")]
    NotFound {
        /// Entity kind
        kind: EntityKind,
        /// Entity id
        id: EntityId,
    },

    /// Concurrent edit; needs manual resolution
    #[error("conflict: {0}")]
    Conflict(String),

    /// Server rejected the request
    #[error("rejected by server: {0}")]
    Validation(String),
}

impl ApiError {
    /// Whether the request may be retried as-is
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Durable key-value store failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// Backend could not be reached
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Stored value does not decode
    #[error("corrupt value under {key}: {reason}")]
    Corrupt {
        /// Storage key
        key: String,
        /// Decoder message
        reason: String,
    },
}

/// Routing or breadcrumb failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NavigationError {
    /// Location does not match any route
    #[error("unknown route: {0}")]
    UnknownRoute(String),

    /// Folder parent chain revisits a folder
    #[error("folder parent chain loops at {0}")]
    Cycle(EntityId),

    /// Folder parent chain is deeper than allowed
    #[error("folder parent chain under {id} exceeds {max_depth} levels")]
    TooDeep {
        /// Folder where the walk stopped
        id: EntityId,
        /// Configured limit
        max_depth: usize,
    },

    /// Route points at another workspace
    #[error("route targets workspace {found}, active is {active}")]
    WrongWorkspace {
        /// Active workspace
        active: WorkspaceId,
        /// Workspace named by the route
        found: WorkspaceId,
    },
}

/// Main sync engine error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Workspace API failure
    #[error("api error: {0}")]
    Api(#[from] ApiError),

    /// Payload failed boundary validation
    #[error("invalid payload: {0}")]
    Validation(#[from] ValidationError),

    /// Cache operation failed
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Durable storage failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Navigation failed
    #[error("navigation error: {0}")]
    Navigation(#[from] NavigationError),

    /// A newer load was issued; this result was discarded
    #[error("load {sequence} for {workspace} superseded by a newer request")]
    Superseded {
        /// Workspace of the discarded load
        workspace: WorkspaceId,
        /// Sequence of the discarded load
        sequence: u64,
    },

    /// Operation timed out
    #[error("operation timed out after {ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Operation was cancelled or its task aborted
    #[error("operation cancelled")]
    Cancelled,

    /// Creation of a temporary entity failed before it got a server id
    #[error("creation of {0} did not complete")]
    CreationFailed(EntityId),

    /// No workspace is active
    #[error("no active workspace")]
    NotActive,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether the operation may be retried as-is
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api(e) => e.is_retryable(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Whether the target entity no longer exists
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Api(ApiError::NotFound { .. }) | Self::Cache(CacheError::NotFound { .. })
        )
    }
}

/// Result alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_and_timeout_are_retryable() {
        assert!(SyncError::from(ApiError::Network("reset".into())).is_retryable());
        assert!(SyncError::Timeout { ms: 10 }.is_retryable());
        assert!(!SyncError::from(ApiError::Conflict("v3".into())).is_retryable());
        assert!(!SyncError::from(ApiError::Validation("title".into())).is_retryable());
    }

    #[test]
    fn not_found_from_api_and_cache() {
        let api = SyncError::from(ApiError::NotFound {
            kind: EntityKind::Document,
            id: EntityId::new("d1"),
        });
        let cache = SyncError::from(CacheError::NotFound {
            kind: EntityKind::Folder,
            id: EntityId::new("f1"),
        });
        assert!(api.is_not_found());
        assert!(cache.is_not_found());
        assert!(!SyncError::Cancelled.is_not_found());
    }
}
