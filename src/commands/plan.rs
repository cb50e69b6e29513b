//! Transition planning.
//!
//! Pure functions from a committed snapshot and a request to the complete
//! [`Mutation`] the transition writes. Nothing here touches storage, so a plan
//! can be recomputed from a fresh read whenever its commit loses a lock race.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::links::EditionDiff;
use crate::model::{
    ActionKind, ActionTarget, Document, DocumentKey, DocumentSnapshot, Edition, EditionState,
    LinkSet, ReservationRequest, Unpublishing, UpdateType,
};
use crate::storage::{EditionWrite, LinkPatch, LogEntry, Mutation};
use crate::validation::{validate_content, validate_locale, validate_unpublishing, ValidationErrors};

use super::{CommandError, DocumentRequest, PublishRequest, PutContentRequest, UnpublishRequest};

/// Plan of a `put_content`.
#[derive(Debug, Clone)]
pub struct PutContentPlan {
    pub mutation: Mutation,
    pub draft: Edition,
    pub diff: EditionDiff,
    /// Link targets the request removes.
    pub orphaned: Vec<Uuid>,
}

/// Plan of a `publish`.
#[derive(Debug, Clone)]
pub struct PublishPlan {
    pub mutation: Mutation,
    pub published: Edition,
    pub diff: EditionDiff,
}

/// Plan of an `unpublish`.
#[derive(Debug, Clone)]
pub struct UnpublishPlan {
    pub mutation: Mutation,
    pub unpublished: Edition,
    pub discarded_draft: Option<Edition>,
}

/// Plan of a transition that touches one existing edition.
#[derive(Debug, Clone)]
pub struct EditionPlan {
    pub mutation: Mutation,
    pub edition: Edition,
}

/// Document row after one more committed change, with the lock it must still hold.
fn next_document(snapshot: &DocumentSnapshot) -> (Document, Option<i64>) {
    let mut document = snapshot.document.clone();
    document.stale_lock_version += 1;
    (document, Some(snapshot.document.stale_lock_version))
}

fn require<'a>(snapshot: Option<&'a DocumentSnapshot>, key: &DocumentKey) -> Result<&'a DocumentSnapshot, CommandError> {
    snapshot.ok_or_else(|| CommandError::not_found("document", key))
}

fn log(action: ActionKind, user: &Option<String>, diff: Option<&EditionDiff>, target: ActionTarget) -> LogEntry {
    LogEntry {
        action,
        user: user.clone(),
        edition_diff: diff.map(EditionDiff::changed_fields),
        target,
    }
}

/// Create the draft, or overwrite the existing one in place.
///
/// A new draft takes the next user-facing version after everything already
/// in the history, so publishing it raises the live version by exactly one.
pub fn put_content(
    snapshot: Option<&DocumentSnapshot>,
    link_set: Option<&LinkSet>,
    request: &PutContentRequest,
    now: DateTime<Utc>,
) -> Result<PutContentPlan, CommandError> {
    let mut errors = validate_content(&request.content).err().unwrap_or_default();
    validate_locale(&request.locale, &mut errors);
    errors.into_result()?;

    let key = request.key();
    let (document, expected_lock) = match snapshot {
        Some(snapshot) => next_document(snapshot),
        None => (Document::new(&key), None),
    };

    let existing = snapshot.and_then(DocumentSnapshot::draft);
    let draft = match existing {
        Some(existing) => Edition {
            content: request.content.clone(),
            last_edited_at: now,
            ..existing.clone()
        },
        None => Edition {
            id: Uuid::new_v4(),
            document_id: document.id,
            user_facing_version: snapshot.map_or(0, DocumentSnapshot::latest_version) + 1,
            state: EditionState::Draft,
            content: request.content.clone(),
            first_published_at: snapshot
                .and_then(DocumentSnapshot::live)
                .and_then(|live| live.first_published_at),
            published_at: None,
            last_edited_at: now,
        },
    };
    let write = match existing {
        Some(_) => EditionWrite::Update(draft.clone()),
        None => EditionWrite::Insert(draft.clone()),
    };

    let previous = snapshot.and_then(|s| s.edition_at(draft.user_facing_version - 1));
    let diff = EditionDiff::between(&draft, previous);

    let mut reservation = ReservationRequest::new(draft.base_path(), draft.publishing_app());
    if request.override_existing {
        reservation = reservation.overriding();
    }

    let (link_patch, orphaned) = match &request.links {
        Some(links) => {
            let orphaned = link_set
                .map(|current| current.orphaned_by(&current.patched(links)))
                .unwrap_or_default();
            let patch = LinkPatch {
                content_id: key.content_id,
                expected_lock: link_set.map(|set| set.stale_lock_version),
                links: links.clone(),
            };
            (Some(patch), orphaned)
        }
        None => (None, Vec::new()),
    };

    let mutation = Mutation {
        document,
        expected_lock,
        reservation: Some(reservation),
        edition_writes: vec![write],
        unpublishing: None,
        link_patch,
        log: log(
            ActionKind::PutContent,
            &request.user,
            Some(&diff),
            ActionTarget::Edition(draft.id),
        ),
        now,
    };
    Ok(PutContentPlan {
        mutation,
        draft,
        diff,
        orphaned,
    })
}

/// Promote the draft, superseding whatever held the live slot.
pub fn publish(
    snapshot: Option<&DocumentSnapshot>,
    request: &PublishRequest,
    now: DateTime<Utc>,
) -> Result<PublishPlan, CommandError> {
    let key = request.key();
    let snapshot = require(snapshot, &key)?;
    let draft = snapshot
        .draft()
        .ok_or_else(|| CommandError::not_found("draft", &key))?;
    let live = snapshot.live();

    let mut writes = Vec::with_capacity(2);
    if let Some(live) = live {
        writes.push(EditionWrite::Update(Edition {
            state: EditionState::Superseded,
            ..live.clone()
        }));
    }

    let update_type = request.update_type.unwrap_or(draft.content.update_type);
    let mut published = draft.clone();
    published.state = EditionState::Published;
    published.content.update_type = update_type;
    published.published_at = Some(now);
    published.first_published_at = draft
        .first_published_at
        .or_else(|| live.and_then(|e| e.first_published_at))
        .or(Some(now));
    if published.content.public_updated_at.is_none() {
        published.content.public_updated_at = match update_type {
            UpdateType::Major => Some(now),
            UpdateType::Minor | UpdateType::Republish => live
                .and_then(|e| e.content.public_updated_at)
                .or(Some(now)),
        };
    }
    writes.push(EditionWrite::Update(published.clone()));

    let diff = EditionDiff::for_edition(snapshot, &published);
    let (document, expected_lock) = next_document(snapshot);
    let mutation = Mutation {
        document,
        expected_lock,
        reservation: Some(ReservationRequest::new(
            published.base_path(),
            published.publishing_app(),
        )),
        edition_writes: writes,
        unpublishing: None,
        link_patch: None,
        log: log(
            ActionKind::Publish,
            &request.user,
            Some(&diff),
            ActionTarget::Edition(published.id),
        ),
        now,
    };
    Ok(PublishPlan {
        mutation,
        published,
        diff,
    })
}

/// Withdraw the published edition, or re-unpublish an unpublished one when allowed.
pub fn unpublish(
    snapshot: Option<&DocumentSnapshot>,
    request: &UnpublishRequest,
    now: DateTime<Utc>,
) -> Result<UnpublishPlan, CommandError> {
    let key = request.key();
    let snapshot = require(snapshot, &key)?;
    let target = match (snapshot.published(), snapshot.unpublished()) {
        (Some(published), _) => published,
        (None, Some(unpublished)) if request.allow_update_existing => unpublished,
        _ => return Err(CommandError::not_found("unpublishable edition", &key)),
    };
    validate_unpublishing(&request.spec, target)?;

    let mut writes = Vec::with_capacity(2);
    let discarded_draft = snapshot.draft().cloned();
    if let Some(draft) = &discarded_draft {
        if !request.discard_drafts {
            return Err(CommandError::DraftPresentConflict {
                key: key.to_string(),
            });
        }
        writes.push(EditionWrite::Delete(draft.id));
    }

    let unpublished = Edition {
        state: EditionState::Unpublished,
        ..target.clone()
    };
    writes.push(EditionWrite::Update(unpublished.clone()));

    let (document, expected_lock) = next_document(snapshot);
    let mutation = Mutation {
        document,
        expected_lock,
        reservation: None,
        edition_writes: writes,
        unpublishing: Some(Unpublishing::from_spec(unpublished.id, &request.spec, now)),
        link_patch: None,
        log: log(
            ActionKind::Unpublish(request.spec.kind()),
            &request.user,
            None,
            ActionTarget::Edition(unpublished.id),
        ),
        now,
    };
    Ok(UnpublishPlan {
        mutation,
        unpublished,
        discarded_draft,
    })
}

/// Delete the draft. The returned edition is the one removed.
pub fn discard_draft(
    snapshot: Option<&DocumentSnapshot>,
    request: &DocumentRequest,
    now: DateTime<Utc>,
) -> Result<EditionPlan, CommandError> {
    let key = request.key();
    let snapshot = require(snapshot, &key)?;
    let draft = snapshot
        .draft()
        .ok_or_else(|| CommandError::not_found("draft", &key))?;

    let (document, expected_lock) = next_document(snapshot);
    let mutation = Mutation {
        document,
        expected_lock,
        reservation: None,
        edition_writes: vec![EditionWrite::Delete(draft.id)],
        unpublishing: None,
        link_patch: None,
        log: log(
            ActionKind::DiscardDraft,
            &request.user,
            None,
            ActionTarget::Edition(draft.id),
        ),
        now,
    };
    Ok(EditionPlan {
        mutation,
        edition: draft.clone(),
    })
}

/// Log a republish of the published edition without changing it.
pub fn republish(
    snapshot: Option<&DocumentSnapshot>,
    request: &DocumentRequest,
    now: DateTime<Utc>,
) -> Result<EditionPlan, CommandError> {
    let key = request.key();
    let snapshot = require(snapshot, &key)?;
    let published = snapshot
        .published()
        .ok_or_else(|| CommandError::not_found("published edition", &key))?;

    let (document, expected_lock) = next_document(snapshot);
    let mutation = Mutation {
        document,
        expected_lock,
        reservation: None,
        edition_writes: Vec::new(),
        unpublishing: None,
        link_patch: None,
        log: log(
            ActionKind::Republish,
            &request.user,
            None,
            ActionTarget::Edition(published.id),
        ),
        now,
    };
    Ok(EditionPlan {
        mutation,
        edition: published.clone(),
    })
}

/// Single-field validation failure.
pub(crate) fn single_error(field: &str, message: &str) -> CommandError {
    CommandError::ValidationFailed(ValidationErrors::single(field, message))
}
