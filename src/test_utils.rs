//! Test utilities: fixtures for content, editions and store mutations.
//!
//! Shared by unit tests and, through the `test-utils` feature, by the
//! integration tests under `tests/`.

use chrono::Utc;
use uuid::Uuid;

use crate::model::{
    ActionKind, ActionTarget, Document, DocumentKey, DocumentSnapshot, Edition, EditionContent,
    EditionState, ReservationRequest, Route, Unpublishing, UpdateType,
};
use crate::storage::{EditionWrite, LogEntry, Mutation};

/// Publishing app used by every fixture.
pub const PUBLISHING_APP: &str = "publisher";

/// Valid content served at `base_path`.
pub fn content(base_path: &str) -> EditionContent {
    EditionContent {
        base_path: base_path.to_string(),
        title: "VAT rates".to_string(),
        description: Some("Current VAT rates".to_string()),
        document_type: "guide".to_string(),
        schema_name: "guide".to_string(),
        publishing_app: PUBLISHING_APP.to_string(),
        rendering_app: Some("frontend".to_string()),
        phase: None,
        details: serde_json::json!({ "body": "<p>20%</p>" }),
        routes: vec![Route::exact(base_path)],
        redirects: Vec::new(),
        update_type: UpdateType::Major,
        public_updated_at: None,
    }
}

/// First draft edition of a fresh document carrying `content`.
pub fn edition_from(content: EditionContent) -> Edition {
    Edition {
        id: Uuid::new_v4(),
        document_id: Uuid::new_v4(),
        user_facing_version: 1,
        state: EditionState::Draft,
        content,
        first_published_at: None,
        published_at: None,
        last_edited_at: Utc::now(),
    }
}

/// Mutation creating `key` with a first draft at `base_path`.
pub fn new_document(key: &DocumentKey, base_path: &str) -> Mutation {
    let document = Document::new(key);
    let edition = Edition {
        document_id: document.id,
        ..edition_from(content(base_path))
    };
    Mutation {
        document,
        expected_lock: None,
        reservation: Some(ReservationRequest::new(base_path, PUBLISHING_APP)),
        log: LogEntry {
            action: ActionKind::PutContent,
            user: None,
            edition_diff: None,
            target: ActionTarget::Edition(edition.id),
        },
        edition_writes: vec![EditionWrite::Insert(edition)],
        unpublishing: None,
        link_patch: None,
        now: Utc::now(),
    }
}

/// Mutation applying `writes` on top of the state read in `snapshot`.
pub fn next_mutation(
    snapshot: &DocumentSnapshot,
    action: ActionKind,
    writes: Vec<EditionWrite>,
    target: ActionTarget,
) -> Mutation {
    let mut document = snapshot.document.clone();
    document.stale_lock_version += 1;
    Mutation {
        expected_lock: Some(snapshot.document.stale_lock_version),
        document,
        reservation: None,
        edition_writes: writes,
        unpublishing: None,
        link_patch: None,
        log: LogEntry {
            action,
            user: None,
            edition_diff: None,
            target,
        },
        now: Utc::now(),
    }
}

/// `content` as an edition in `state` at `version`.
pub fn edition_in(content: EditionContent, state: EditionState, version: i64) -> Edition {
    let now = Utc::now();
    let published = state != EditionState::Draft;
    Edition {
        user_facing_version: version,
        state,
        first_published_at: published.then_some(now),
        published_at: published.then_some(now),
        ..edition_from(content)
    }
}

/// Committed view of a fresh English document holding `editions`.
pub fn snapshot_of(editions: Vec<Edition>, unpublishing: Option<Unpublishing>) -> DocumentSnapshot {
    let document = Document::new(&DocumentKey::new(Uuid::new_v4(), "en"));
    let mut editions: Vec<Edition> = editions
        .into_iter()
        .map(|e| Edition {
            document_id: document.id,
            ..e
        })
        .collect();
    editions.sort_by_key(|e| e.user_facing_version);
    DocumentSnapshot {
        document,
        editions,
        unpublishing,
        link_set: None,
    }
}
