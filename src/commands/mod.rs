//! Edition state machine.
//!
//! Each command reads a document snapshot, plans the complete mutation in
//! [`plan`] without touching storage, and commits it as one unit of work.
//! [`Publisher`] wraps that read-plan-commit cycle in an optimistic retry
//! loop and hands committed changes to the downstream synchronizer.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::downstream::DeliveryFailure;
use crate::model::{
    DocumentKey, Edition, EditionContent, Event, Links, Route, UnpublishingSpec, UpdateType,
    DEFAULT_LOCALE,
};
use crate::storage::StorageError;
use crate::validation::ValidationErrors;

pub mod plan;
mod publisher;

pub use publisher::Publisher;

/// Errors surfaced by state-machine commands.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Concurrent modification of {key}")]
    Conflict { key: String },

    #[error("Base path {base_path} is reserved by {owner}")]
    PathConflict { base_path: String, owner: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationErrors),

    #[error("Cannot unpublish {key} with a draft present")]
    DraftPresentConflict { key: String },

    #[error(transparent)]
    DeliveryFailure(#[from] DeliveryFailure),

    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl CommandError {
    /// HTTP-equivalent status for callers that speak HTTP.
    pub fn status_code(&self) -> u16 {
        match self {
            CommandError::Conflict { .. } => 409,
            CommandError::PathConflict { .. } => 409,
            CommandError::NotFound(_) => 404,
            CommandError::ValidationFailed(_) => 422,
            CommandError::DraftPresentConflict { .. } => 422,
            CommandError::DeliveryFailure(_) => 502,
            CommandError::Storage(_) => 500,
        }
    }

    /// Only lock conflicts are worth retrying from a fresh read.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CommandError::Conflict { .. })
    }

    pub(crate) fn not_found(what: &str, key: &DocumentKey) -> Self {
        CommandError::NotFound(format!("{} for {}", what, key))
    }
}

impl From<StorageError> for CommandError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Conflict { key } => CommandError::Conflict { key },
            StorageError::PathConflict { base_path, owner } => {
                CommandError::PathConflict { base_path, owner }
            }
            StorageError::BasePathTaken {
                content_id, locale, ..
            } => CommandError::ValidationFailed(ValidationErrors::single(
                "base_path",
                format!("is already in use by content {} ({})", content_id, locale),
            )),
            StorageError::NotFound(what) => CommandError::NotFound(what),
            other => CommandError::Storage(other),
        }
    }
}

fn default_locale() -> String {
    DEFAULT_LOCALE.to_string()
}

/// Create or replace the draft of a document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PutContentRequest {
    pub content_id: Uuid,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(flatten)]
    pub content: EditionContent,
    /// Link types to replace in the content id's link set.
    #[serde(default)]
    pub links: Option<Links>,
    /// Take the base path over from another publishing app.
    #[serde(default)]
    pub override_existing: bool,
    /// Part of a bulk job: send downstream at low priority.
    #[serde(default)]
    pub bulk_publishing: bool,
    #[serde(default)]
    pub user: Option<String>,
}

impl PutContentRequest {
    pub fn new(content_id: Uuid, content: EditionContent) -> Self {
        Self {
            content_id,
            locale: default_locale(),
            content,
            links: None,
            override_existing: false,
            bulk_publishing: false,
            user: None,
        }
    }

    pub fn key(&self) -> DocumentKey {
        DocumentKey::new(self.content_id, self.locale.clone())
    }
}

/// Promote the draft of a document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PublishRequest {
    pub content_id: Uuid,
    #[serde(default = "default_locale")]
    pub locale: String,
    /// Overrides the update type saved with the draft.
    #[serde(default)]
    pub update_type: Option<UpdateType>,
    #[serde(default)]
    pub user: Option<String>,
}

impl PublishRequest {
    pub fn new(content_id: Uuid) -> Self {
        Self {
            content_id,
            locale: default_locale(),
            update_type: None,
            user: None,
        }
    }

    pub fn key(&self) -> DocumentKey {
        DocumentKey::new(self.content_id, self.locale.clone())
    }
}

/// Withdraw the live edition of a document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UnpublishRequest {
    pub content_id: Uuid,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(flatten)]
    pub spec: UnpublishingSpec,
    /// Delete a pending draft instead of refusing.
    #[serde(default)]
    pub discard_drafts: bool,
    /// Replace the unpublishing of an already unpublished edition.
    #[serde(default)]
    pub allow_update_existing: bool,
    #[serde(default)]
    pub user: Option<String>,
}

impl UnpublishRequest {
    pub fn new(content_id: Uuid, spec: UnpublishingSpec) -> Self {
        Self {
            content_id,
            locale: default_locale(),
            spec,
            discard_drafts: false,
            allow_update_existing: false,
            user: None,
        }
    }

    pub fn key(&self) -> DocumentKey {
        DocumentKey::new(self.content_id, self.locale.clone())
    }
}

/// Target a single document: discard its draft or republish it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DocumentRequest {
    pub content_id: Uuid,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default)]
    pub user: Option<String>,
}

impl DocumentRequest {
    pub fn new(content_id: Uuid) -> Self {
        Self {
            content_id,
            locale: default_locale(),
            user: None,
        }
    }

    pub fn key(&self) -> DocumentKey {
        DocumentKey::new(self.content_id, self.locale.clone())
    }
}

/// Replace link types in a content id's link set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PatchLinkSetRequest {
    pub content_id: Uuid,
    pub links: Links,
    #[serde(default)]
    pub bulk_publishing: bool,
    #[serde(default)]
    pub user: Option<String>,
}

/// Announce an upcoming publication at a base path.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PublishIntentRequest {
    pub base_path: String,
    pub publishing_app: String,
    pub publish_time: DateTime<Utc>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub rendering_app: Option<String>,
    #[serde(default)]
    pub override_existing: bool,
}

/// Result of a committed command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub event: Event,
    /// Edition the command wrote, when it wrote one that still exists.
    pub edition: Option<Edition>,
    /// Downstream jobs that could not be enqueued. The commit stands regardless.
    pub delivery_failures: Vec<DeliveryFailure>,
}

#[cfg(test)]
mod tests;
