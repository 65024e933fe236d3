//! Folio Model
//!
//! Closed, typed representation of everything a workspace holds:
//! - Identifiers ([`EntityId`], [`WorkspaceId`], [`MutationId`])
//! - Entities ([`Document`], [`Folder`], [`Source`]) and the [`Entity`] union
//! - Field-level patches used by optimistic mutations
//! - The full-load [`WorkspaceSnapshot`]
//!
//! Payloads from the workspace API arrive as untyped JSON and are turned
//! into these types by the functions in [`parse`]; nothing downstream ever
//! sees an unvalidated entity.
//!
//! # Example
//!
//! ```rust
//! use folio_model::{parse, EntityKind};
//! use serde_json::json;
//!
//! let doc = parse::parse_document(json!({
//!     "id": "doc-1",
//!     "title": "Roadmap",
//!     "updatedAt": "2026-01-02T03:04:05Z",
//!     "version": 3
//! }))
//! .unwrap();
//!
//! assert_eq!(doc.title, "Roadmap");
//! assert_eq!(doc.kind(), EntityKind::Document);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod clock;
pub mod entity;
pub mod error;
pub mod ids;
pub mod parse;
pub mod patch;
pub mod snapshot;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::{Document, Entity, EntityKind, Folder, Source, SourceType};
pub use error::ValidationError;
pub use ids::{EntityId, MutationId, WorkspaceId};
pub use patch::{DocumentPatch, EntityPatch, Field, FolderPatch, SourcePatch};
pub use snapshot::WorkspaceSnapshot;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
