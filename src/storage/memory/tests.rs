use super::*;
use crate::model::Links;
use crate::storage::LogEntry;
use crate::test_utils::{new_document, next_mutation};

fn key() -> DocumentKey {
    DocumentKey::new(Uuid::new_v4(), "en")
}

#[tokio::test]
async fn test_commit_creates_document_and_event() {
    let store = MemoryStore::new();
    let key = key();

    let event = store.commit(new_document(&key, "/vat-rates")).await.unwrap();
    assert_eq!(event.id, 1);
    assert_eq!(event.action, ActionKind::PutContent);

    let snapshot = store
        .load_document(key.content_id, &key.locale)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.document.stale_lock_version, 0);
    assert_eq!(snapshot.editions.len(), 1);
    assert_eq!(snapshot.editions[0].state, EditionState::Draft);

    let reservation = store.path_reservation("/vat-rates").await.unwrap().unwrap();
    assert_eq!(reservation.publishing_app, "publisher");
}

#[tokio::test]
async fn test_commit_rejects_stale_lock() {
    let store = MemoryStore::new();
    let key = key();
    store.commit(new_document(&key, "/vat-rates")).await.unwrap();
    let snapshot = store
        .load_document(key.content_id, &key.locale)
        .await
        .unwrap()
        .unwrap();

    let mut draft = snapshot.editions[0].clone();
    draft.content.title = "first".to_string();
    let first = next_mutation(
        &snapshot,
        ActionKind::PutContent,
        vec![EditionWrite::Update(draft.clone())],
        ActionTarget::Edition(draft.id),
    );
    draft.content.title = "second".to_string();
    let second = next_mutation(
        &snapshot,
        ActionKind::PutContent,
        vec![EditionWrite::Update(draft.clone())],
        ActionTarget::Edition(draft.id),
    );

    store.commit(first).await.unwrap();
    let err = store.commit(second).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict { .. }));

    let snapshot = store
        .load_document(key.content_id, &key.locale)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.editions[0].content.title, "first");
    assert_eq!(snapshot.document.stale_lock_version, 1);
}

#[tokio::test]
async fn test_creating_existing_document_conflicts() {
    let store = MemoryStore::new();
    let key = key();
    store.commit(new_document(&key, "/vat-rates")).await.unwrap();

    let err = store.commit(new_document(&key, "/vat-rates")).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict { .. }));
    assert_eq!(store.all_editions().await.len(), 1);
}

#[tokio::test]
async fn test_failed_event_append_rolls_back_everything() {
    let store = MemoryStore::new();
    let key = key();
    store.set_fail_on_append(true);

    let err = store.commit(new_document(&key, "/vat-rates")).await.unwrap_err();
    assert!(matches!(err, StorageError::Injected(_)));

    assert!(store
        .load_document(key.content_id, &key.locale)
        .await
        .unwrap()
        .is_none());
    assert!(store.path_reservation("/vat-rates").await.unwrap().is_none());
    assert!(store.events(key.content_id).await.unwrap().is_empty());

    store.set_fail_on_append(false);
    let event = store.commit(new_document(&key, "/vat-rates")).await.unwrap();
    assert_eq!(event.id, 1);
}

#[tokio::test]
async fn test_path_conflict_rolls_back_edition() {
    let store = MemoryStore::new();
    store
        .reserve_path(&ReservationRequest::new("/vat-rates", "other-app"))
        .await
        .unwrap();

    let key = key();
    let err = store.commit(new_document(&key, "/vat-rates")).await.unwrap_err();
    match err {
        StorageError::PathConflict { owner, .. } => assert_eq!(owner, "other-app"),
        other => panic!("expected PathConflict, got {:?}", other),
    }
    assert!(store.all_editions().await.is_empty());
}

#[tokio::test]
async fn test_second_draft_for_document_rejected() {
    let store = MemoryStore::new();
    let key = key();
    store.commit(new_document(&key, "/vat-rates")).await.unwrap();
    let snapshot = store
        .load_document(key.content_id, &key.locale)
        .await
        .unwrap()
        .unwrap();

    let mut extra = snapshot.editions[0].clone();
    extra.id = Uuid::new_v4();
    extra.user_facing_version = 2;
    let mutation = next_mutation(
        &snapshot,
        ActionKind::PutContent,
        vec![EditionWrite::Insert(extra.clone())],
        ActionTarget::Edition(extra.id),
    );

    let err = store.commit(mutation).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict { .. }));
    assert_eq!(store.all_editions().await.len(), 1);
}

#[tokio::test]
async fn test_base_path_taken_by_other_document() {
    let store = MemoryStore::new();
    store.commit(new_document(&key(), "/vat-rates")).await.unwrap();

    let err = store.commit(new_document(&key(), "/vat-rates")).await.unwrap_err();
    assert!(matches!(err, StorageError::BasePathTaken { .. }));
}

#[tokio::test]
async fn test_same_base_path_allowed_in_other_locale() {
    let store = MemoryStore::new();
    let content_id = Uuid::new_v4();
    store
        .commit(new_document(&DocumentKey::new(content_id, "en"), "/vat-rates"))
        .await
        .unwrap();
    store
        .commit(new_document(&DocumentKey::new(Uuid::new_v4(), "cy"), "/vat-rates"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_event_ids_strictly_increase_across_documents() {
    let store = MemoryStore::new();
    let a = store.commit(new_document(&key(), "/a")).await.unwrap();
    let b = store.commit(new_document(&key(), "/b")).await.unwrap();
    let c = store
        .append_event(EventEntry {
            action: ActionKind::RepresentDownstream,
            content_id: Uuid::new_v4(),
            locale: Some("en".to_string()),
            user: None,
        })
        .await
        .unwrap();
    assert!(a.id < b.id && b.id < c.id);
}

#[tokio::test]
async fn test_patch_link_set_checks_lock_and_tracks_dependents() {
    let store = MemoryStore::new();
    let source = Uuid::new_v4();
    let target = Uuid::new_v4();
    let links = Links::from([("organisations".to_string(), vec![target])]);

    let (set, event) = store
        .patch_link_set(
            LinkPatch {
                content_id: source,
                expected_lock: None,
                links: links.clone(),
            },
            Some("editor".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(set.stale_lock_version, 0);
    assert_eq!(event.action, ActionKind::PatchLinkSet);
    assert_eq!(store.dependents(target).await.unwrap(), vec![source]);

    let err = store
        .patch_link_set(
            LinkPatch {
                content_id: source,
                expected_lock: None,
                links,
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict { .. }));

    let trail = store.audit_trail(source).await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].user.as_deref(), Some("editor"));
}

#[tokio::test]
async fn test_documents_filter_by_type() {
    let store = MemoryStore::new();
    let guide = key();
    let news = key();
    store.commit(new_document(&guide, "/guide")).await.unwrap();

    let mut mutation = new_document(&news, "/news");
    if let EditionWrite::Insert(edition) = &mut mutation.edition_writes[0] {
        edition.content.document_type = "news_story".to_string();
    }
    store.commit(mutation).await.unwrap();

    let all = store.documents(&DocumentFilter::all()).await.unwrap();
    assert_eq!(all.len(), 2);

    let filtered = store
        .documents(&DocumentFilter::document_types(["news_story".to_string()]))
        .await
        .unwrap();
    assert_eq!(filtered, vec![news]);
}

#[tokio::test]
async fn test_log_entry_target_recorded_as_action() {
    let store = MemoryStore::new();
    let key = key();
    let mut mutation = new_document(&key, "/vat-rates");
    mutation.log = LogEntry {
        user: Some("alice".to_string()),
        ..mutation.log
    };
    store.commit(mutation).await.unwrap();

    let trail = store.audit_trail(key.content_id).await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].action, ActionKind::PutContent);
    assert_eq!(trail[0].locale.as_deref(), Some("en"));
    assert_eq!(trail[0].user.as_deref(), Some("alice"));
}
