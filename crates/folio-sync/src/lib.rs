//! Folio Sync - workspace synchronization engine
//!
//! Everything that moves data between the workspace API and the cache:
//! - [`WorkspaceLoader`]: single-flight snapshot loads with retries
//! - [`AccessTracker`]: decayed access history persisted per workspace
//! - [`PrefetchScheduler`]: bounded background fetching of document bodies
//! - [`MutationCoordinator`] / [`MutationRunner`]: optimistic mutations
//! - [`TabStateManager`] / [`DocumentRouter`]: open tabs and navigation
//! - [`DraftStore`]: cold-start recovery of unsaved bodies
//! - [`Workspace`]: the facade wiring all of the above for the active workspace
//!
//! # Example
//!
//! ```rust
//! use folio_sync::{Route, SyncConfig};
//!
//! let config = SyncConfig::from_toml_str("max_concurrent_prefetch = 5").unwrap();
//! assert_eq!(config.max_concurrent_prefetch, 5);
//!
//! let route: Route = "/w/acme/doc/doc-42".parse().unwrap();
//! assert_eq!(route.to_string(), "/w/acme/doc/doc-42");
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod access;
pub mod api;
pub mod config;
pub mod drafts;
pub mod error;
pub mod kv;
pub mod loader;
pub mod mutation;
mod persist;
pub mod prefetch;
pub mod router;
pub mod tabs;
pub mod workspace;

pub use access::{AccessRecord, AccessTracker};
pub use api::{NewDocument, NewFolder, Page, PageRequest, WorkspaceApi};
pub use config::SyncConfig;
pub use drafts::{Draft, DraftStore, Recovery};
pub use error::{ApiError, NavigationError, Result, StorageError, SyncError};
pub use kv::{KvStore, MemoryKvStore};
pub use loader::{LoadResult, LoadStatus, WorkspaceLoader};
pub use mutation::{
    IgnoreReason, MutationAction, MutationCoordinator, MutationHandle, MutationOp, MutationRunner, MutationStatus,
    MutationTicket, PendingMutation, Settlement,
};
pub use prefetch::{PrefetchReport, PrefetchScheduler};
pub use router::{Breadcrumb, DocumentRouter, Route};
pub use tabs::{Tab, TabId, TabKind, TabStateManager};
pub use workspace::{ActiveWorkspace, Workspace, WorkspaceStatus};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving the engine
    pub use crate::{
        AccessTracker, ApiError, KvStore, MutationTicket, NewDocument, NewFolder, Route, Settlement, SyncConfig,
        SyncError, TabKind, Workspace, WorkspaceApi,
    };
    pub use folio_cache::prelude::*;
    pub use folio_model::{DocumentPatch, EntityId, EntityKind, FolderPatch, WorkspaceId};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
