use chrono::Utc;
use uuid::Uuid;

use super::*;

fn reservation(app: &str) -> PathReservation {
    let now = Utc::now();
    PathReservation {
        base_path: "/vat-rates".to_string(),
        publishing_app: app.to_string(),
        created_at: now,
        updated_at: now,
    }
}

#[test]
fn test_reserve_unreserved_path_creates() {
    let request = ReservationRequest::new("/vat-rates", "publisher");
    assert_eq!(request.resolve(None), Ok(ReservationOutcome::Created));
}

#[test]
fn test_reserve_own_path_is_noop() {
    let existing = reservation("publisher");
    let request = ReservationRequest::new("/vat-rates", "publisher");
    assert_eq!(request.resolve(Some(&existing)), Ok(ReservationOutcome::Unchanged));
}

#[test]
fn test_reserve_foreign_path_conflicts_without_override() {
    let existing = reservation("whitehall");
    let request = ReservationRequest::new("/vat-rates", "publisher");
    assert_eq!(request.resolve(Some(&existing)), Err("whitehall".to_string()));
}

#[test]
fn test_reserve_foreign_path_with_override_reassigns() {
    let existing = reservation("whitehall");
    let request = ReservationRequest::new("/vat-rates", "publisher").overriding();
    let outcome = request.resolve(Some(&existing)).unwrap();
    assert_eq!(
        outcome,
        ReservationOutcome::Reassigned {
            previous_app: "whitehall".to_string()
        }
    );

    let row = outcome.apply(&request, Some(&existing), Utc::now());
    assert_eq!(row.publishing_app, "publisher");
    assert_eq!(row.created_at, existing.created_at);
}

#[test]
fn test_link_set_patch_replaces_and_removes_types() {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let c = Uuid::new_v4();
    let mut set = LinkSet::new(Uuid::new_v4());
    set.links.insert("organisations".to_string(), vec![a, b]);
    set.links.insert("topics".to_string(), vec![c]);

    let mut patch = Links::new();
    patch.insert("organisations".to_string(), vec![a]);
    patch.insert("topics".to_string(), vec![]);

    let next = set.patched(&patch);
    assert_eq!(next.stale_lock_version, 1);
    assert_eq!(next.links.get("organisations"), Some(&vec![a]));
    assert!(!next.links.contains_key("topics"));

    let mut orphaned = set.orphaned_by(&next);
    orphaned.sort();
    let mut expected = vec![b, c];
    expected.sort();
    assert_eq!(orphaned, expected);
}

#[test]
fn test_action_kind_names() {
    let kinds = [
        ActionKind::PutContent,
        ActionKind::Publish,
        ActionKind::Unpublish(UnpublishingType::Withdrawal),
        ActionKind::Unpublish(UnpublishingType::Substitute),
        ActionKind::DiscardDraft,
        ActionKind::Republish,
        ActionKind::PatchLinkSet,
        ActionKind::RepresentDownstream,
    ];
    for kind in kinds {
        assert_eq!(kind.to_string().parse::<ActionKind>(), Ok(kind));
    }
    assert_eq!(
        ActionKind::Unpublish(UnpublishingType::Withdrawal).to_string(),
        "UnpublishWithdrawal"
    );
    assert!("Destroy".parse::<ActionKind>().is_err());
}

#[test]
fn test_unpublishing_spec_is_tagged_by_type() {
    let spec: UnpublishingSpec =
        serde_json::from_str(r#"{"type":"redirect","alternative_path":"/new"}"#).unwrap();
    assert_eq!(
        spec,
        UnpublishingSpec::Redirect {
            alternative_path: "/new".to_string()
        }
    );
    assert_eq!(spec.kind(), UnpublishingType::Redirect);

    let gone: UnpublishingSpec = serde_json::from_str(r#"{"type":"gone"}"#).unwrap();
    assert_eq!(gone.alternative_path(), None);
    assert_eq!(gone.explanation(), None);
}

#[test]
fn test_edition_state_round_trips_through_str() {
    for state in [
        EditionState::Draft,
        EditionState::Published,
        EditionState::Superseded,
        EditionState::Unpublished,
    ] {
        assert_eq!(state.as_str().parse::<EditionState>(), Ok(state));
    }
    assert!(EditionState::Unpublished.is_live());
    assert!(!EditionState::Superseded.is_live());
}
