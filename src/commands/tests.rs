use chrono::{Duration, Utc};
use uuid::Uuid;

use super::plan;
use super::*;
use crate::model::{
    ActionKind, EditionState, LinkSet, UnpublishingType,
};
use crate::storage::EditionWrite;
use crate::test_utils::{content, edition_in, snapshot_of};

fn put(content_id: Uuid, base_path: &str) -> PutContentRequest {
    PutContentRequest::new(content_id, content(base_path))
}

fn published_with_draft() -> crate::model::DocumentSnapshot {
    snapshot_of(
        vec![
            edition_in(content("/vat-rates"), EditionState::Published, 1),
            edition_in(content("/vat-rates"), EditionState::Draft, 2),
        ],
        None,
    )
}

fn published_only() -> crate::model::DocumentSnapshot {
    snapshot_of(
        vec![edition_in(content("/vat-rates"), EditionState::Published, 1)],
        None,
    )
}

// ============================================================================
// put_content
// ============================================================================

#[test]
fn test_put_content_creates_first_draft() {
    let request = put(Uuid::new_v4(), "/vat-rates");
    let plan = plan::put_content(None, None, &request, Utc::now()).unwrap();

    assert_eq!(plan.mutation.expected_lock, None);
    assert_eq!(plan.mutation.document.stale_lock_version, 0);
    assert_eq!(plan.draft.user_facing_version, 1);
    assert_eq!(plan.draft.state, EditionState::Draft);
    assert!(matches!(plan.mutation.edition_writes[..], [EditionWrite::Insert(_)]));
    let reservation = plan.mutation.reservation.unwrap();
    assert_eq!(reservation.base_path, "/vat-rates");
    assert!(!reservation.override_existing);
}

#[test]
fn test_put_content_overwrites_existing_draft() {
    let snapshot = published_with_draft();
    let draft = snapshot.draft().unwrap().clone();
    let mut request = put(snapshot.document.content_id, "/vat-rates");
    request.content.title = "VAT rates 2025".to_string();

    let plan = plan::put_content(Some(&snapshot), None, &request, Utc::now()).unwrap();

    assert_eq!(plan.draft.id, draft.id);
    assert_eq!(plan.draft.user_facing_version, 2);
    assert!(matches!(plan.mutation.edition_writes[..], [EditionWrite::Update(_)]));
    assert_eq!(plan.mutation.expected_lock, Some(0));
    assert_eq!(plan.mutation.document.stale_lock_version, 1);
    assert_eq!(plan.diff.changed_fields(), vec!["title"]);
}

#[test]
fn test_put_content_after_publish_starts_next_version() {
    let snapshot = published_only();
    let live = snapshot.published().unwrap().clone();
    let request = put(snapshot.document.content_id, "/vat-rates");

    let plan = plan::put_content(Some(&snapshot), None, &request, Utc::now()).unwrap();

    assert_ne!(plan.draft.id, live.id);
    assert_eq!(plan.draft.user_facing_version, 2);
    assert_eq!(plan.draft.first_published_at, live.first_published_at);
    assert!(matches!(plan.mutation.edition_writes[..], [EditionWrite::Insert(_)]));
}

#[test]
fn test_put_content_rejects_invalid_content() {
    let mut request = put(Uuid::new_v4(), "vat-rates");
    request.locale = "not a locale".to_string();

    match plan::put_content(None, None, &request, Utc::now()) {
        Err(CommandError::ValidationFailed(errors)) => {
            assert!(!errors.messages_for("base_path").is_empty());
            assert!(!errors.messages_for("locale").is_empty());
        }
        other => panic!("expected ValidationFailed, got {:?}", other.map(|p| p.draft)),
    }
}

#[test]
fn test_put_content_links_report_orphans() {
    let kept = Uuid::new_v4();
    let dropped = Uuid::new_v4();
    let content_id = Uuid::new_v4();
    let mut link_set = LinkSet::new(content_id);
    link_set.links.insert("organisations".to_string(), vec![kept, dropped]);

    let mut request = put(content_id, "/vat-rates");
    request.links = Some([("organisations".to_string(), vec![kept])].into());

    let plan = plan::put_content(None, Some(&link_set), &request, Utc::now()).unwrap();
    assert_eq!(plan.orphaned, vec![dropped]);
    assert_eq!(plan.mutation.link_patch.unwrap().expected_lock, Some(0));
}

// ============================================================================
// publish
// ============================================================================

#[test]
fn test_publish_without_draft_is_not_found() {
    let snapshot = published_only();
    let err = plan::publish(
        Some(&snapshot),
        &PublishRequest::new(snapshot.document.content_id),
        Utc::now(),
    )
    .unwrap_err();
    assert!(matches!(err, CommandError::NotFound(_)));
    assert_eq!(err.status_code(), 404);
}

#[test]
fn test_publish_supersedes_live_before_promoting() {
    let snapshot = published_with_draft();
    let live = snapshot.published().unwrap().clone();
    let draft = snapshot.draft().unwrap().clone();

    let plan = plan::publish(
        Some(&snapshot),
        &PublishRequest::new(snapshot.document.content_id),
        Utc::now(),
    )
    .unwrap();

    match &plan.mutation.edition_writes[..] {
        [EditionWrite::Update(demoted), EditionWrite::Update(promoted)] => {
            assert_eq!(demoted.id, live.id);
            assert_eq!(demoted.state, EditionState::Superseded);
            assert_eq!(promoted.id, draft.id);
            assert_eq!(promoted.state, EditionState::Published);
            assert_eq!(promoted.user_facing_version, live.user_facing_version + 1);
        }
        other => panic!("unexpected writes {:?}", other),
    }
    assert_eq!(plan.mutation.log.action, ActionKind::Publish);
    assert_eq!(plan.published.first_published_at, live.first_published_at);
}

#[test]
fn test_minor_publish_keeps_public_updated_at() {
    let earlier = Utc::now() - Duration::days(30);
    let mut live_content = content("/vat-rates");
    live_content.public_updated_at = Some(earlier);
    let snapshot = snapshot_of(
        vec![
            edition_in(live_content, EditionState::Published, 1),
            edition_in(content("/vat-rates"), EditionState::Draft, 2),
        ],
        None,
    );
    let mut request = PublishRequest::new(snapshot.document.content_id);
    request.update_type = Some(UpdateType::Minor);

    let plan = plan::publish(Some(&snapshot), &request, Utc::now()).unwrap();
    assert_eq!(plan.published.content.public_updated_at, Some(earlier));
    assert_eq!(plan.published.content.update_type, UpdateType::Minor);
}

// ============================================================================
// unpublish
// ============================================================================

fn withdraw(content_id: Uuid) -> UnpublishRequest {
    UnpublishRequest::new(
        content_id,
        UnpublishingSpec::Withdrawal {
            explanation: "Superseded by new guidance".to_string(),
        },
    )
}

#[test]
fn test_unpublish_with_draft_present_is_rejected() {
    let snapshot = published_with_draft();
    let err = plan::unpublish(Some(&snapshot), &withdraw(snapshot.document.content_id), Utc::now())
        .unwrap_err();
    assert!(matches!(err, CommandError::DraftPresentConflict { .. }));
    assert_eq!(err.status_code(), 422);
}

#[test]
fn test_unpublish_can_discard_draft() {
    let snapshot = published_with_draft();
    let draft = snapshot.draft().unwrap().clone();
    let mut request = withdraw(snapshot.document.content_id);
    request.discard_drafts = true;

    let plan = plan::unpublish(Some(&snapshot), &request, Utc::now()).unwrap();

    assert_eq!(plan.discarded_draft.map(|d| d.id), Some(draft.id));
    assert!(matches!(
        plan.mutation.edition_writes[..],
        [EditionWrite::Delete(id), EditionWrite::Update(_)] if id == draft.id
    ));
    assert_eq!(plan.unpublished.state, EditionState::Unpublished);
    let unpublishing = plan.mutation.unpublishing.unwrap();
    assert_eq!(unpublishing.kind, UnpublishingType::Withdrawal);
    assert_eq!(unpublishing.edition_id, plan.unpublished.id);
}

#[test]
fn test_redirect_without_alternative_path_fails_validation() {
    let snapshot = published_only();
    let request = UnpublishRequest::new(
        snapshot.document.content_id,
        UnpublishingSpec::Redirect {
            alternative_path: String::new(),
        },
    );

    match plan::unpublish(Some(&snapshot), &request, Utc::now()) {
        Err(CommandError::ValidationFailed(errors)) => {
            assert!(!errors.messages_for("alternative_path").is_empty())
        }
        other => panic!("expected ValidationFailed, got {:?}", other.map(|p| p.unpublished)),
    }
}

#[test]
fn test_unpublishing_twice_needs_allow_update_existing() {
    let edition = edition_in(content("/vat-rates"), EditionState::Unpublished, 1);
    let snapshot = snapshot_of(vec![edition], None);
    let mut request = UnpublishRequest::new(snapshot.document.content_id, UnpublishingSpec::Gone {
        alternative_path: None,
        explanation: None,
    });

    let err = plan::unpublish(Some(&snapshot), &request, Utc::now()).unwrap_err();
    assert!(matches!(err, CommandError::NotFound(_)));

    request.allow_update_existing = true;
    let plan = plan::unpublish(Some(&snapshot), &request, Utc::now()).unwrap();
    assert_eq!(
        plan.mutation.log.action,
        ActionKind::Unpublish(UnpublishingType::Gone)
    );
}

// ============================================================================
// discard_draft / republish
// ============================================================================

#[test]
fn test_discard_draft_deletes_only_the_draft() {
    let snapshot = published_with_draft();
    let draft = snapshot.draft().unwrap().clone();

    let plan = plan::discard_draft(
        Some(&snapshot),
        &DocumentRequest::new(snapshot.document.content_id),
        Utc::now(),
    )
    .unwrap();
    assert_eq!(plan.mutation.edition_writes, vec![EditionWrite::Delete(draft.id)]);
    assert_eq!(plan.edition.id, draft.id);
}

#[test]
fn test_discard_without_draft_is_not_found() {
    let snapshot = published_only();
    let err = plan::discard_draft(
        Some(&snapshot),
        &DocumentRequest::new(snapshot.document.content_id),
        Utc::now(),
    )
    .unwrap_err();
    assert!(matches!(err, CommandError::NotFound(_)));
}

#[test]
fn test_republish_logs_without_writing_editions() {
    let snapshot = published_only();
    let plan = plan::republish(
        Some(&snapshot),
        &DocumentRequest::new(snapshot.document.content_id),
        Utc::now(),
    )
    .unwrap();
    assert!(plan.mutation.edition_writes.is_empty());
    assert_eq!(plan.mutation.log.action, ActionKind::Republish);
    assert_eq!(plan.mutation.expected_lock, Some(0));
}

#[test]
fn test_republish_of_unknown_document_is_not_found() {
    let err = plan::republish(None, &DocumentRequest::new(Uuid::new_v4()), Utc::now()).unwrap_err();
    assert!(matches!(err, CommandError::NotFound(_)));
}

// ============================================================================
// Errors and requests
// ============================================================================

#[test]
fn test_base_path_taken_maps_to_field_error() {
    let err: CommandError = StorageError::BasePathTaken {
        base_path: "/vat-rates".to_string(),
        content_id: Uuid::nil().to_string(),
        locale: "en".to_string(),
    }
    .into();
    match &err {
        CommandError::ValidationFailed(errors) => {
            assert!(!errors.messages_for("base_path").is_empty())
        }
        other => panic!("expected ValidationFailed, got {:?}", other),
    }
    assert!(!err.is_retryable());
}

#[test]
fn test_only_conflicts_are_retryable() {
    let conflict: CommandError = StorageError::Conflict {
        key: "x".to_string(),
    }
    .into();
    assert!(conflict.is_retryable());
    assert_eq!(conflict.status_code(), 409);

    let path: CommandError = StorageError::PathConflict {
        base_path: "/vat-rates".to_string(),
        owner: "whitehall".to_string(),
    }
    .into();
    assert!(!path.is_retryable());
    assert_eq!(path.status_code(), 409);
}

#[test]
fn test_unpublish_request_parses_tagged_type() {
    let request: UnpublishRequest = serde_json::from_value(serde_json::json!({
        "content_id": Uuid::nil(),
        "type": "redirect",
        "alternative_path": "/vat",
        "discard_drafts": true
    }))
    .unwrap();
    assert_eq!(request.locale, "en");
    assert!(request.discard_drafts);
    assert_eq!(request.spec.alternative_path(), Some("/vat"));
}

#[test]
fn test_redirect_request_without_alternative_path_does_not_parse() {
    let result: Result<UnpublishRequest, _> = serde_json::from_value(serde_json::json!({
        "content_id": Uuid::nil(),
        "type": "redirect"
    }));
    assert!(result.is_err());
}
