//! Folio Cache - canonical workspace store
//!
//! One keyed store holds every document, folder and source of the active
//! workspace:
//! - Reads return owned [`CacheEntry`] values, never references into the store
//! - Writes are tagged authoritative or optimistic; optimistic writes live in
//!   revertible layers owned by a mutation
//! - [`CacheStore::get_snapshot`] gives an O(1) point-in-time view
//! - Subscribers are notified per kind or per id after every write
//!
//! # Example
//!
//! ```rust
//! use folio_cache::{CacheStore, EntryState};
//! use folio_model::{Entity, EntityId, EntityKind, Folder};
//!
//! let store = CacheStore::default();
//! store
//!     .upsert(
//!         EntityKind::Folder,
//!         vec![Entity::Folder(Folder {
//!             id: EntityId::new("fld-1"),
//!             name: "Research".into(),
//!             parent_folder_id: None,
//!         })],
//!     )
//!     .unwrap();
//!
//! let entry = store.get_folder(&EntityId::new("fld-1")).unwrap();
//! assert_eq!(entry.data.name, "Research");
//! assert_eq!(entry.state, EntryState::Fresh);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod entry;
pub mod error;
pub mod events;
pub mod store;

pub use entry::{CacheEntry, EntryState, Layer, LayerOp, LayerTag, PatchTag, Provenance};
pub use error::CacheError;
pub use events::{CacheEvent, Change, Subscription, Topic};
pub use store::{CacheStore, StoreSnapshot};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the cache
    pub use crate::{
        CacheEntry, CacheError, CacheEvent, CacheStore, Change, EntryState, LayerTag, PatchTag,
        Provenance, StoreSnapshot, Topic,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
