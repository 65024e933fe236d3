//! Testing utilities for the Folio workspace
//!
//! Shared fixtures and a scriptable in-memory [`FakeWorkspaceApi`].

#![allow(missing_docs)]

mod fake_api;

pub use fake_api::{ApiOp, FakeWorkspaceApi};

use chrono::{DateTime, Duration, TimeZone, Utc};
use folio_model::{Document, Entity, EntityId, Folder, ManualClock, Source, SourceType, WorkspaceId};
use std::sync::Arc;

/// Fixed instant all fixtures are relative to
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(epoch()))
}

pub fn workspace_id() -> WorkspaceId {
    WorkspaceId::new("ws-test")
}

pub fn document(id: &str, title: &str) -> Document {
    Document {
        id: EntityId::new(id),
        title: title.to_string(),
        folder_id: None,
        content: Some(format!("body of {title}")),
        updated_at: epoch(),
        version: 1,
    }
}

pub fn document_in(id: &str, title: &str, folder: &str) -> Document {
    Document {
        folder_id: Some(EntityId::new(folder)),
        ..document(id, title)
    }
}

/// Document last modified `days` before [`epoch`]
pub fn document_aged(id: &str, days: i64) -> Document {
    Document {
        updated_at: epoch() - Duration::days(days),
        ..document(id, id)
    }
}

pub fn folder(id: &str, name: &str, parent: Option<&str>) -> Folder {
    Folder {
        id: EntityId::new(id),
        name: name.to_string(),
        parent_folder_id: parent.map(EntityId::new),
    }
}

pub fn source(id: &str, name: &str) -> Source {
    Source {
        id: EntityId::new(id),
        name: name.to_string(),
        source_type: SourceType::Url,
    }
}

pub fn doc_entity(id: &str, title: &str) -> Entity {
    Entity::Document(document(id, title))
}

/// Fake API seeded with `n` documents `doc-0..n`, two folders and one source
pub fn seeded_api(n: usize) -> FakeWorkspaceApi {
    let api = FakeWorkspaceApi::new();
    api.add_folder(folder("fld-root", "Root", None));
    api.add_folder(folder("fld-notes", "Notes", Some("fld-root")));
    api.add_source(source("src-1", "Handbook"));
    for i in 0..n {
        let folder = if i % 2 == 0 { "fld-root" } else { "fld-notes" };
        api.add_document(document_in(&format!("doc-{i}"), &format!("Document {i}"), folder));
    }
    api
}
