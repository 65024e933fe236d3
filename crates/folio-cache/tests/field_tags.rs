//! Field Tag Tests
//!
//! Property tests for per-field provenance under interleaved layers and
//! authoritative writes.
//!
use chrono::{DateTime, Utc};
use folio_cache::{CacheStore, LayerTag, PatchTag};
use folio_model::{Document, DocumentPatch, Entity, EntityId, EntityKind, Field, MutationId};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Write {
    Upsert(String),
    Optimistic(String),
    Authoritative(String),
    Invalidate,
}

fn write_strategy() -> impl Strategy<Value = Write> {
    prop_oneof![
        "[a-z]{1,6}".prop_map(Write::Upsert),
        "[a-z]{1,6}".prop_map(Write::Optimistic),
        "[a-z]{1,6}".prop_map(Write::Authoritative),
        Just(Write::Invalidate),
    ]
}

fn doc(title: &str) -> Entity {
    Entity::Document(Document {
        id: EntityId::new("doc-1"),
        title: title.to_string(),
        folder_id: None,
        content: Some("body".into()),
        updated_at: DateTime::<Utc>::UNIX_EPOCH,
        version: 1,
    })
}

proptest! {
    #[test]
    fn visible_title_and_tag_follow_the_last_write(writes in prop::collection::vec(write_strategy(), 1..24)) {
        let store = CacheStore::default();
        let id = EntityId::new("doc-1");
        store.upsert(EntityKind::Document, vec![doc("seed")]).unwrap();

        let mut expected_title = "seed".to_string();
        let mut expected_tag = PatchTag::Authoritative;

        for (sequence, write) in writes.into_iter().enumerate() {
            match write {
                Write::Upsert(title) => {
                    store.upsert(EntityKind::Document, vec![doc(&title)]).unwrap();
                    expected_title = title;
                    expected_tag = PatchTag::Authoritative;
                }
                Write::Optimistic(title) => {
                    let tag = LayerTag { mutation: MutationId::new(), sequence: sequence as u64 };
                    store
                        .patch(EntityKind::Document, &id, DocumentPatch::rename(title.clone()).into(), PatchTag::Optimistic(tag))
                        .unwrap();
                    expected_title = title;
                    expected_tag = PatchTag::Optimistic(tag);
                }
                Write::Authoritative(title) => {
                    store
                        .patch(EntityKind::Document, &id, DocumentPatch::rename(title.clone()).into(), PatchTag::Authoritative)
                        .unwrap();
                    expected_title = title;
                    expected_tag = PatchTag::Authoritative;
                }
                Write::Invalidate => {
                    store.invalidate(EntityKind::Document, Some(&id));
                }
            }

            let entry = store.get_document(&id).unwrap();
            prop_assert_eq!(&entry.data.title, &expected_title);
            prop_assert_eq!(store.field_tag(EntityKind::Document, &id, Field::Title), Some(expected_tag));
        }
    }

    #[test]
    fn reverting_every_layer_restores_confirmed_value(titles in prop::collection::vec("[a-z]{1,6}", 1..10)) {
        let store = CacheStore::default();
        let id = EntityId::new("doc-1");
        store.upsert(EntityKind::Document, vec![doc("seed")]).unwrap();

        let tags: Vec<LayerTag> = titles
            .iter()
            .enumerate()
            .map(|(i, title)| {
                let tag = LayerTag { mutation: MutationId::new(), sequence: i as u64 };
                store
                    .patch(EntityKind::Document, &id, DocumentPatch::rename(title.clone()).into(), PatchTag::Optimistic(tag))
                    .unwrap();
                tag
            })
            .collect();

        for tag in tags {
            prop_assert!(store.revert_layer(EntityKind::Document, &id, tag.mutation));
        }
        let entry = store.get_document(&id).unwrap();
        prop_assert_eq!(&entry.data.title, "seed");
        prop_assert!(!entry.is_optimistic());
    }
}
