//! PublishingStore interface tests.
//!
//! These tests verify the contract of the PublishingStore trait.
//! Each storage implementation should run these tests.

use uuid::Uuid;

use folio::model::{
    ActionKind, ActionTarget, DocumentKey, DocumentSnapshot, Edition, EditionState, Links,
    ReservationRequest,
};
use folio::storage::{
    DocumentFilter, EditionWrite, EventEntry, LinkPatch, PublishingStore, StorageError,
};
use folio::test_utils::{content, new_document, next_mutation, PUBLISHING_APP};

/// Base path no other test uses.
pub fn unique_path(prefix: &str) -> String {
    format!("/{}-{}", prefix, Uuid::new_v4().simple())
}

async fn create<S: PublishingStore>(store: &S, base_path: &str) -> DocumentSnapshot {
    let key = DocumentKey::new(Uuid::new_v4(), "en");
    store
        .commit(new_document(&key, base_path))
        .await
        .expect("create should succeed");
    load(store, &key).await
}

async fn load<S: PublishingStore>(store: &S, key: &DocumentKey) -> DocumentSnapshot {
    store
        .load_document(key.content_id, &key.locale)
        .await
        .expect("load should succeed")
        .expect("document should exist")
}

/// Publish the draft of `snapshot` the way the publish command does.
async fn publish_draft<S: PublishingStore>(store: &S, snapshot: &DocumentSnapshot) -> DocumentSnapshot {
    let draft = snapshot.draft().expect("draft").clone();
    let mut writes = Vec::new();
    if let Some(live) = snapshot.live() {
        writes.push(EditionWrite::Update(Edition {
            state: EditionState::Superseded,
            ..live.clone()
        }));
    }
    writes.push(EditionWrite::Update(Edition {
        state: EditionState::Published,
        ..draft.clone()
    }));
    store
        .commit(next_mutation(
            snapshot,
            ActionKind::Publish,
            writes,
            ActionTarget::Edition(draft.id),
        ))
        .await
        .expect("publish should succeed");
    load(store, &snapshot.key()).await
}

/// Insert a fresh draft at the next version.
async fn new_draft<S: PublishingStore>(store: &S, snapshot: &DocumentSnapshot) -> DocumentSnapshot {
    let live = snapshot.live().expect("live edition");
    let draft = Edition {
        id: Uuid::new_v4(),
        user_facing_version: snapshot.latest_version() + 1,
        state: EditionState::Draft,
        ..live.clone()
    };
    store
        .commit(next_mutation(
            snapshot,
            ActionKind::PutContent,
            vec![EditionWrite::Insert(draft.clone())],
            ActionTarget::Edition(draft.id),
        ))
        .await
        .expect("draft should succeed");
    load(store, &snapshot.key()).await
}

// =============================================================================
// commit tests
// =============================================================================

pub async fn test_commit_creates_document_with_event<S: PublishingStore>(store: &S) {
    let base_path = unique_path("create");
    let snapshot = create(store, &base_path).await;

    assert_eq!(snapshot.document.stale_lock_version, 0);
    assert_eq!(snapshot.editions.len(), 1);
    assert_eq!(snapshot.draft().map(|e| e.base_path()), Some(base_path.as_str()));

    let events = store.events(snapshot.document.content_id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, ActionKind::PutContent);
    assert_eq!(events[0].locale.as_deref(), Some("en"));

    let reservation = store.path_reservation(&base_path).await.unwrap().unwrap();
    assert_eq!(reservation.publishing_app, PUBLISHING_APP);
}

pub async fn test_stale_lock_is_conflict<S: PublishingStore>(store: &S) {
    let snapshot = create(store, &unique_path("stale")).await;
    let draft = snapshot.draft().unwrap().clone();
    let update = || {
        next_mutation(
            &snapshot,
            ActionKind::PutContent,
            vec![EditionWrite::Update(draft.clone())],
            ActionTarget::Edition(draft.id),
        )
    };

    store.commit(update()).await.expect("first update should succeed");
    let err = store.commit(update()).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict { .. }), "got {:?}", err);

    let events = store.events(snapshot.document.content_id).await.unwrap();
    assert_eq!(events.len(), 2, "losing commit must not log");
}

pub async fn test_path_conflict_rolls_back<S: PublishingStore>(store: &S) {
    let base_path = unique_path("taken");
    store
        .reserve_path(&ReservationRequest::new(&base_path, "other-app"))
        .await
        .unwrap();

    let key = DocumentKey::new(Uuid::new_v4(), "en");
    let err = store.commit(new_document(&key, &base_path)).await.unwrap_err();
    assert!(matches!(err, StorageError::PathConflict { .. }), "got {:?}", err);
    assert!(store
        .load_document(key.content_id, "en")
        .await
        .unwrap()
        .is_none());
    assert!(store.events(key.content_id).await.unwrap().is_empty());
}

pub async fn test_override_transfers_path_ownership<S: PublishingStore>(store: &S) {
    let base_path = unique_path("transfer");
    store
        .reserve_path(&ReservationRequest::new(&base_path, "whitehall"))
        .await
        .unwrap();
    let transferred = store
        .reserve_path(&ReservationRequest::new(&base_path, "specialist").overriding())
        .await
        .expect("override should take the path");
    assert_eq!(transferred.publishing_app, "specialist");

    let err = store
        .reserve_path(&ReservationRequest::new(&base_path, "whitehall"))
        .await
        .unwrap_err();
    match err {
        StorageError::PathConflict { owner, .. } => assert_eq!(owner, "specialist"),
        other => panic!("expected PathConflict, got {:?}", other),
    }

    let held = store.path_reservation(&base_path).await.unwrap().unwrap();
    assert_eq!(held.publishing_app, "specialist");
}

pub async fn test_one_draft_per_document<S: PublishingStore>(store: &S) {
    let snapshot = create(store, &unique_path("drafts")).await;
    let extra = Edition {
        id: Uuid::new_v4(),
        user_facing_version: 2,
        content: content(&unique_path("drafts")),
        ..snapshot.draft().unwrap().clone()
    };

    let err = store
        .commit(next_mutation(
            &snapshot,
            ActionKind::PutContent,
            vec![EditionWrite::Insert(extra.clone())],
            ActionTarget::Edition(extra.id),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict { .. }), "got {:?}", err);
    assert_eq!(load(store, &snapshot.key()).await.editions.len(), 1);
}

pub async fn test_base_path_exclusive_across_documents<S: PublishingStore>(store: &S) {
    let base_path = unique_path("shared");
    let owner = create(store, &base_path).await;

    let err = store
        .commit(new_document(&DocumentKey::new(Uuid::new_v4(), "en"), &base_path))
        .await
        .unwrap_err();
    match err {
        StorageError::BasePathTaken { content_id, .. } => {
            assert_eq!(content_id, owner.document.content_id.to_string())
        }
        other => panic!("expected BasePathTaken, got {:?}", other),
    }

    store
        .commit(new_document(&DocumentKey::new(Uuid::new_v4(), "cy"), &base_path))
        .await
        .expect("another locale may use the same path");
}

pub async fn test_publish_keeps_history<S: PublishingStore>(store: &S) {
    let snapshot = create(store, &unique_path("history")).await;
    let published = publish_draft(store, &snapshot).await;
    let drafted = new_draft(store, &published).await;
    let republished = publish_draft(store, &drafted).await;

    let states: Vec<EditionState> = republished.editions.iter().map(|e| e.state).collect();
    assert_eq!(states, vec![EditionState::Superseded, EditionState::Published]);
    assert_eq!(republished.document.stale_lock_version, 3);
    assert_eq!(republished.published().unwrap().user_facing_version, 2);
}

// =============================================================================
// event log tests
// =============================================================================

pub async fn test_event_ids_strictly_increase<S: PublishingStore>(store: &S) {
    let first = create(store, &unique_path("order-a")).await;
    let second = create(store, &unique_path("order-b")).await;
    let extra = store
        .append_event(EventEntry {
            action: ActionKind::RepresentDownstream,
            content_id: first.document.content_id,
            locale: Some("en".to_string()),
            user: None,
        })
        .await
        .unwrap();

    let a = store.events(first.document.content_id).await.unwrap();
    let b = store.events(second.document.content_id).await.unwrap();
    assert!(a[0].id < b[0].id);
    assert!(b[0].id < extra.id);
    assert_eq!(a.last().map(|e| e.id), Some(extra.id));
}

pub async fn test_audit_trail_follows_events<S: PublishingStore>(store: &S) {
    let snapshot = create(store, &unique_path("audit")).await;
    publish_draft(store, &snapshot).await;

    let trail = store.audit_trail(snapshot.document.content_id).await.unwrap();
    let actions: Vec<ActionKind> = trail.iter().map(|r| r.action).collect();
    assert_eq!(actions, vec![ActionKind::PutContent, ActionKind::Publish]);
    assert!(trail[0].event_id < trail[1].event_id);
}

// =============================================================================
// link graph tests
// =============================================================================

pub async fn test_link_set_patch_and_dependents<S: PublishingStore>(store: &S) {
    let source = Uuid::new_v4();
    let target = Uuid::new_v4();
    let links: Links = [("organisations".to_string(), vec![target])].into();

    let (link_set, event) = store
        .patch_link_set(
            LinkPatch {
                content_id: source,
                expected_lock: None,
                links,
            },
            Some("editor".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(link_set.stale_lock_version, 0);
    assert_eq!(event.action, ActionKind::PatchLinkSet);
    assert_eq!(store.dependents(target).await.unwrap(), vec![source]);

    let stale = store
        .patch_link_set(
            LinkPatch {
                content_id: source,
                expected_lock: None,
                links: Links::new(),
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(stale, StorageError::Conflict { .. }), "got {:?}", stale);

    let (cleared, _) = store
        .patch_link_set(
            LinkPatch {
                content_id: source,
                expected_lock: Some(0),
                links: [("organisations".to_string(), Vec::new())].into(),
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(cleared.stale_lock_version, 1);
    assert!(cleared.links.is_empty());
    assert!(store.dependents(target).await.unwrap().is_empty());
}

pub async fn test_documents_filter<S: PublishingStore>(store: &S) {
    let guide = create(store, &unique_path("guide")).await;

    let by_id = store
        .documents(&DocumentFilter::content_ids([guide.document.content_id]))
        .await
        .unwrap();
    assert_eq!(by_id, vec![guide.key()]);

    let by_type = store
        .documents(&DocumentFilter::document_types(["guide".to_string()]))
        .await
        .unwrap();
    assert!(by_type.contains(&guide.key()));

    let none = store
        .documents(&DocumentFilter::document_types(["no_such_type".to_string()]))
        .await
        .unwrap();
    assert!(none.is_empty());
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all PublishingStore interface tests against a store implementation.
#[macro_export]
macro_rules! run_publishing_store_tests {
    ($store:expr) => {
        use $crate::storage::publishing_store_tests::*;

        // commit tests
        test_commit_creates_document_with_event($store).await;
        println!("  test_commit_creates_document_with_event: PASSED");

        test_stale_lock_is_conflict($store).await;
        println!("  test_stale_lock_is_conflict: PASSED");

        test_path_conflict_rolls_back($store).await;
        println!("  test_path_conflict_rolls_back: PASSED");

        test_override_transfers_path_ownership($store).await;
        println!("  test_override_transfers_path_ownership: PASSED");

        test_one_draft_per_document($store).await;
        println!("  test_one_draft_per_document: PASSED");

        test_base_path_exclusive_across_documents($store).await;
        println!("  test_base_path_exclusive_across_documents: PASSED");

        test_publish_keeps_history($store).await;
        println!("  test_publish_keeps_history: PASSED");

        // event log tests
        test_event_ids_strictly_increase($store).await;
        println!("  test_event_ids_strictly_increase: PASSED");

        test_audit_trail_follows_events($store).await;
        println!("  test_audit_trail_follows_events: PASSED");

        // link graph tests
        test_link_set_patch_and_dependents($store).await;
        println!("  test_link_set_patch_and_dependents: PASSED");

        test_documents_filter($store).await;
        println!("  test_documents_filter: PASSED");
    };
}
