//! Downstream propagation.
//!
//! Every committed change that asks for propagation becomes one job per
//! `(content item, target store)`, stamped with the id of the event that
//! caused it as `payload_version`. Jobs are delivered asynchronously and in
//! no particular order; the receiving store's version guard is what makes
//! late or duplicate deliveries harmless.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{EditionState, Links, Redirect, Route, UpdateType};

mod content_store;
mod http;
pub mod mock;
mod presenter;
mod queue;
mod synchronizer;

pub use content_store::InMemoryContentStore;
pub use http::HttpContentStore;
pub use presenter::{draft_payload, edition_payload, live_payload};
pub use queue::WorkerPool;
pub use synchronizer::{Propagation, SweepReport, Synchronizer};

/// A downstream read-serving store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Serves drafts for preview, falling back to live content.
    Draft,
    /// Serves what the public sees.
    Live,
}

impl Target {
    pub const ALL: [Target; 2] = [Target::Draft, Target::Live];

    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Draft => "draft",
            Target::Live => "live",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue a job is delivered from. High drains before low.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    High,
    Low,
}

/// Notice attached to the payload of a withdrawn item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawnNotice {
    pub explanation: Option<String>,
    pub withdrawn_at: DateTime<Utc>,
}

/// Representation of one content item pushed to one downstream store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownstreamPayload {
    pub content_id: Uuid,
    pub locale: String,
    /// Event id of the change this representation reflects.
    pub payload_version: i64,
    pub base_path: String,
    pub document_type: String,
    pub schema_name: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub publishing_app: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendering_app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    pub details: serde_json::Value,
    pub routes: Vec<Route>,
    pub redirects: Vec<Redirect>,
    pub publication_state: EditionState,
    pub user_facing_version: i64,
    pub update_type: UpdateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdrawn_notice: Option<WithdrawnNotice>,
    pub links: Links,
}

impl DownstreamPayload {
    /// Destination of the redirect served at the base path, if any.
    pub fn redirect_destination(&self) -> Option<&str> {
        self.redirects
            .iter()
            .find(|r| r.path == self.base_path)
            .map(|r| r.destination.as_str())
    }
}

/// Announcement that a publishing app is about to publish at a base path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishIntent {
    pub publishing_app: String,
    pub publish_time: DateTime<Utc>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendering_app: Option<String>,
}

/// Result of a delivery the receiving store accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The store already holds this or a newer version and ignored the push.
    Stale { last_applied: Option<i64> },
}

/// Errors that can occur while delivering to a downstream store.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Store {store} unreachable: {reason}")]
    Unreachable { store: String, reason: String },

    #[error("Store {store} rejected the request with status {status}: {body}")]
    Rejected {
        store: String,
        status: u16,
        body: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Delivery queue closed")]
    QueueClosed,
}

impl DeliveryError {
    /// Whether a later attempt might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Unreachable { .. } => true,
            DeliveryError::Rejected { status, .. } => *status == 429 || *status >= 500,
            DeliveryError::Http(e) => e.is_timeout() || e.is_connect(),
            DeliveryError::QueueClosed => false,
        }
    }
}

/// A propagation that could not be completed. The stored state is unaffected
/// and can be re-sent by a represent-downstream sweep.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Delivery of {content_id:?} to {target} store at payload version {payload_version:?} failed: {reason}")]
pub struct DeliveryFailure {
    pub content_id: Option<Uuid>,
    pub target: Target,
    pub payload_version: Option<i64>,
    pub reason: String,
}

impl DeliveryFailure {
    pub fn new(job: &DownstreamJob, error: &DeliveryError) -> Self {
        Self {
            content_id: job.content_id(),
            target: job.target,
            payload_version: job.payload_version(),
            reason: error.to_string(),
        }
    }
}

/// Receiving side of downstream propagation.
///
/// Implementations must ignore any content push or delete whose
/// `payload_version` is not strictly greater than the last one they applied
/// for the same `(content_id, locale)`.
#[async_trait]
pub trait ContentStore: Send + Sync {
    fn name(&self) -> &str;

    async fn put_content(&self, payload: &DownstreamPayload) -> Result<ApplyOutcome, DeliveryError>;

    async fn delete_content(
        &self,
        content_id: Uuid,
        locale: &str,
        base_path: &str,
        payload_version: i64,
    ) -> Result<ApplyOutcome, DeliveryError>;

    async fn put_publish_intent(&self, base_path: &str, intent: &PublishIntent) -> Result<(), DeliveryError>;

    async fn delete_publish_intent(&self, base_path: &str) -> Result<(), DeliveryError>;
}

/// What a job asks the target store to do.
#[derive(Debug, Clone, PartialEq)]
pub enum JobKind {
    PutContent(DownstreamPayload),
    DeleteContent {
        content_id: Uuid,
        locale: String,
        base_path: String,
        payload_version: i64,
    },
    PutPublishIntent {
        base_path: String,
        intent: PublishIntent,
    },
    DeletePublishIntent {
        base_path: String,
    },
}

/// One delivery to one target store.
#[derive(Debug, Clone, PartialEq)]
pub struct DownstreamJob {
    pub target: Target,
    pub priority: Priority,
    pub kind: JobKind,
}

impl DownstreamJob {
    pub fn new(target: Target, priority: Priority, kind: JobKind) -> Self {
        Self {
            target,
            priority,
            kind,
        }
    }

    pub fn content_id(&self) -> Option<Uuid> {
        match &self.kind {
            JobKind::PutContent(payload) => Some(payload.content_id),
            JobKind::DeleteContent { content_id, .. } => Some(*content_id),
            _ => None,
        }
    }

    pub fn payload_version(&self) -> Option<i64> {
        match &self.kind {
            JobKind::PutContent(payload) => Some(payload.payload_version),
            JobKind::DeleteContent {
                payload_version, ..
            } => Some(*payload_version),
            _ => None,
        }
    }

    /// Execute the job against `store`.
    pub async fn deliver(&self, store: &dyn ContentStore) -> Result<ApplyOutcome, DeliveryError> {
        match &self.kind {
            JobKind::PutContent(payload) => store.put_content(payload).await,
            JobKind::DeleteContent {
                content_id,
                locale,
                base_path,
                payload_version,
            } => {
                store
                    .delete_content(*content_id, locale, base_path, *payload_version)
                    .await
            }
            JobKind::PutPublishIntent { base_path, intent } => {
                store.put_publish_intent(base_path, intent).await?;
                Ok(ApplyOutcome::Applied)
            }
            JobKind::DeletePublishIntent { base_path } => {
                store.delete_publish_intent(base_path).await?;
                Ok(ApplyOutcome::Applied)
            }
        }
    }
}

/// The configured downstream stores. An unset target is skipped.
#[derive(Clone, Default)]
pub struct DownstreamTargets {
    pub draft: Option<Arc<dyn ContentStore>>,
    pub live: Option<Arc<dyn ContentStore>>,
}

impl DownstreamTargets {
    pub fn new(draft: Option<Arc<dyn ContentStore>>, live: Option<Arc<dyn ContentStore>>) -> Self {
        Self { draft, live }
    }

    pub fn get(&self, target: Target) -> Option<&Arc<dyn ContentStore>> {
        match target {
            Target::Draft => self.draft.as_ref(),
            Target::Live => self.live.as_ref(),
        }
    }

    /// HTTP stores for every configured URL.
    pub fn from_config(config: &crate::config::DownstreamConfig) -> Result<Self, DeliveryError> {
        let timeout = std::time::Duration::from_millis(config.request_timeout_ms);
        let build = |name: &str, url: &Option<String>| -> Result<Option<Arc<dyn ContentStore>>, DeliveryError> {
            match url {
                Some(url) => Ok(Some(Arc::new(HttpContentStore::new(name, url, timeout)?))),
                None => Ok(None),
            }
        };
        Ok(Self {
            draft: build("draft-content-store", &config.draft_store_url)?,
            live: build("live-content-store", &config.live_store_url)?,
        })
    }
}

/// Asynchronous at-least-once delivery of jobs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: DownstreamJob) -> Result<(), DeliveryError>;
}

/// A job that exhausted its retries.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub job: DownstreamJob,
    pub failure: DeliveryFailure,
    pub attempts: usize,
    pub failed_at: DateTime<Utc>,
}
