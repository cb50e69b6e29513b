//! Event log entries and the actions that tie them to what they mutated.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ParseEnumError, UnpublishingType};

/// The state-changing action an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    PutContent,
    Publish,
    Unpublish(UnpublishingType),
    DiscardDraft,
    Republish,
    PatchLinkSet,
    RepresentDownstream,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::PutContent => f.write_str("PutContent"),
            ActionKind::Publish => f.write_str("Publish"),
            ActionKind::Unpublish(kind) => match kind {
                UnpublishingType::Withdrawal => f.write_str("UnpublishWithdrawal"),
                UnpublishingType::Redirect => f.write_str("UnpublishRedirect"),
                UnpublishingType::Gone => f.write_str("UnpublishGone"),
                UnpublishingType::Vanish => f.write_str("UnpublishVanish"),
                UnpublishingType::Substitute => f.write_str("UnpublishSubstitute"),
            },
            ActionKind::DiscardDraft => f.write_str("DiscardDraft"),
            ActionKind::Republish => f.write_str("Republish"),
            ActionKind::PatchLinkSet => f.write_str("PatchLinkSet"),
            ActionKind::RepresentDownstream => f.write_str("RepresentDownstream"),
        }
    }
}

impl FromStr for ActionKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "PutContent" => ActionKind::PutContent,
            "Publish" => ActionKind::Publish,
            "UnpublishWithdrawal" => ActionKind::Unpublish(UnpublishingType::Withdrawal),
            "UnpublishRedirect" => ActionKind::Unpublish(UnpublishingType::Redirect),
            "UnpublishGone" => ActionKind::Unpublish(UnpublishingType::Gone),
            "UnpublishVanish" => ActionKind::Unpublish(UnpublishingType::Vanish),
            "UnpublishSubstitute" => ActionKind::Unpublish(UnpublishingType::Substitute),
            "DiscardDraft" => ActionKind::DiscardDraft,
            "Republish" => ActionKind::Republish,
            "PatchLinkSet" => ActionKind::PatchLinkSet,
            "RepresentDownstream" => ActionKind::RepresentDownstream,
            other => return Err(ParseEnumError::new("action", other)),
        };
        Ok(kind)
    }
}

impl Serialize for ActionKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ActionKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Append-only event log entry.
///
/// `id` is assigned by the store, strictly increasing across the whole log,
/// and doubles as the `payload_version` of any downstream push it causes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub action: ActionKind,
    pub content_id: Uuid,
    pub locale: Option<String>,
    pub user: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edition_diff: Option<Vec<String>>,
}

/// What an action mutated. Exactly one of an edition or a link set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTarget {
    Edition(Uuid),
    LinkSet(Uuid),
}

/// Audit row linking an event to the record it changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub event_id: i64,
    pub action: ActionKind,
    pub content_id: Uuid,
    pub locale: Option<String>,
    pub user: Option<String>,
    pub target: ActionTarget,
    pub edition_diff: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

impl Action {
    pub fn for_event(event: &Event, target: ActionTarget) -> Self {
        Self {
            event_id: event.id,
            action: event.action,
            content_id: event.content_id,
            locale: event.locale.clone(),
            user: event.user.clone(),
            target,
            edition_diff: event.edition_diff.clone(),
            created_at: event.created_at,
        }
    }
}

/// Outbound audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event_id: i64,
    pub action: ActionKind,
    pub content_id: Uuid,
    pub locale: Option<String>,
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edition_diff: Option<Vec<String>>,
}

impl From<&Action> for AuditRecord {
    fn from(action: &Action) -> Self {
        Self {
            event_id: action.event_id,
            action: action.action,
            content_id: action.content_id,
            locale: action.locale.clone(),
            user: action.user.clone(),
            edition_diff: action.edition_diff.clone(),
        }
    }
}
