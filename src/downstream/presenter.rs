//! Payload presenters: what each target store should hold for a document.

use serde_json::json;

use crate::model::{
    DocumentSnapshot, Edition, EditionState, Redirect, Route, UnpublishingType, UpdateType,
};

use super::{DownstreamPayload, WithdrawnNotice};

/// Payload for `edition` as it stands, tagged with `payload_version`.
pub fn edition_payload(
    snapshot: &DocumentSnapshot,
    edition: &Edition,
    payload_version: i64,
) -> DownstreamPayload {
    let content = &edition.content;
    DownstreamPayload {
        content_id: snapshot.document.content_id,
        locale: snapshot.document.locale.clone(),
        payload_version,
        base_path: content.base_path.clone(),
        document_type: content.document_type.clone(),
        schema_name: content.schema_name.clone(),
        title: content.title.clone(),
        description: content.description.clone(),
        publishing_app: content.publishing_app.clone(),
        rendering_app: content.rendering_app.clone(),
        phase: content.phase.clone(),
        details: content.details.clone(),
        routes: content.routes.clone(),
        redirects: content.redirects.clone(),
        publication_state: edition.state,
        user_facing_version: edition.user_facing_version,
        update_type: content.update_type,
        public_updated_at: content.public_updated_at.or(edition.published_at),
        first_published_at: edition.first_published_at,
        withdrawn_notice: None,
        links: snapshot
            .link_set
            .as_ref()
            .map(|set| set.links.clone())
            .unwrap_or_default(),
    }
}

/// What the live store should hold, or `None` when it should receive nothing.
///
/// Unpublished editions are represented through their unpublishing: a withdrawal
/// keeps the content with a notice, redirects and gones replace it with a
/// stand-in, and a substitute leaves the path to the item replacing it.
pub fn live_payload(snapshot: &DocumentSnapshot, payload_version: i64) -> Option<DownstreamPayload> {
    let edition = snapshot.live()?;
    let mut payload = edition_payload(snapshot, edition, payload_version);
    if edition.state == EditionState::Published {
        return Some(payload);
    }

    let Some(unpublishing) = &snapshot.unpublishing else {
        return Some(payload);
    };
    let base_path = payload.base_path.clone();
    match unpublishing.kind {
        UnpublishingType::Withdrawal => {
            payload.withdrawn_notice = Some(WithdrawnNotice {
                explanation: unpublishing.explanation.clone(),
                withdrawn_at: unpublishing.created_at,
            });
        }
        UnpublishingType::Redirect => {
            let destination = unpublishing.alternative_path.clone().unwrap_or_default();
            replace_with(&mut payload, "redirect", json!({}));
            payload.routes = Vec::new();
            payload.redirects = vec![Redirect::exact(base_path, destination)];
        }
        UnpublishingType::Gone => {
            replace_with(
                &mut payload,
                "gone",
                json!({
                    "explanation": unpublishing.explanation,
                    "alternative_path": unpublishing.alternative_path,
                }),
            );
            payload.routes = vec![Route::exact(base_path)];
        }
        UnpublishingType::Vanish => {
            replace_with(&mut payload, "vanish", json!({}));
            payload.routes = vec![Route::exact(base_path)];
        }
        UnpublishingType::Substitute => return None,
    }
    Some(payload)
}

/// What the draft store should hold: the draft when there is one, otherwise
/// whatever the live store shows.
pub fn draft_payload(snapshot: &DocumentSnapshot, payload_version: i64) -> Option<DownstreamPayload> {
    match snapshot.draft() {
        Some(draft) => Some(edition_payload(snapshot, draft, payload_version)),
        None => live_payload(snapshot, payload_version),
    }
}

/// Mark a payload as a republish of unchanged content.
pub(crate) fn as_republish(mut payload: DownstreamPayload) -> DownstreamPayload {
    payload.update_type = UpdateType::Republish;
    payload
}

fn replace_with(payload: &mut DownstreamPayload, document_type: &str, details: serde_json::Value) {
    payload.document_type = document_type.to_string();
    payload.schema_name = document_type.to_string();
    payload.details = details;
    payload.description = None;
    payload.rendering_app = None;
    payload.redirects = Vec::new();
}
