//! Storage implementations.
//!
//! Every state change goes through [`PublishingStore::commit`], a single
//! mutate-and-log unit of work: the document lock check, path reservation,
//! edition writes, link changes, the event append and its action all commit
//! together or not at all.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::config::{StorageConfig, StorageType};
use crate::model::{
    ActionKind, ActionTarget, AuditRecord, Document, DocumentKey, DocumentSnapshot, Edition,
    Event, LinkSet, Links, PathReservation, ReservationRequest, Unpublishing,
};

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Concurrent modification of {key}")]
    Conflict { key: String },

    #[error("Base path {base_path} is reserved by {owner}")]
    PathConflict { base_path: String, owner: String },

    #[error("Base path {base_path} is already used by content {content_id} ({locale})")]
    BasePathTaken {
        base_path: String,
        content_id: String,
        locale: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(#[from] chrono::ParseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Injected failure: {0}")]
    Injected(String),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<crate::model::ParseEnumError> for StorageError {
    fn from(e: crate::model::ParseEnumError) -> Self {
        StorageError::Corrupt(e.to_string())
    }
}

/// A write against one edition row.
#[derive(Debug, Clone, PartialEq)]
pub enum EditionWrite {
    Insert(Edition),
    Update(Edition),
    Delete(Uuid),
}

/// Replacement of link types within one content id's link set.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkPatch {
    pub content_id: Uuid,
    /// Lock version read before computing the patch; `None` if no set existed.
    pub expected_lock: Option<i64>,
    pub links: Links,
}

/// Log half of a mutate-and-log unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub action: ActionKind,
    pub user: Option<String>,
    pub edition_diff: Option<Vec<String>>,
    pub target: ActionTarget,
}

/// Everything one state-machine transition writes.
///
/// `document` is the post-image of the document row; its
/// `stale_lock_version` must be `expected_lock + 1` (or zero for a new
/// document, signalled by `expected_lock == None`).
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub document: Document,
    pub expected_lock: Option<i64>,
    pub reservation: Option<ReservationRequest>,
    /// Applied in order; a demotion must precede the promotion that replaces it.
    pub edition_writes: Vec<EditionWrite>,
    /// Upserted by edition id.
    pub unpublishing: Option<Unpublishing>,
    pub link_patch: Option<LinkPatch>,
    pub log: LogEntry,
    pub now: DateTime<Utc>,
}

impl Mutation {
    pub fn key(&self) -> DocumentKey {
        self.document.key()
    }
}

/// Standalone event append, for actions that mutate nothing but must still
/// take an ordering token.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEntry {
    pub action: ActionKind,
    pub content_id: Uuid,
    pub locale: Option<String>,
    pub user: Option<String>,
}

/// Selection of documents for sweeps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentFilter {
    /// Restrict to these content ids (all locales).
    pub content_ids: Option<Vec<Uuid>>,
    /// Restrict to documents with an edition of one of these types.
    pub document_types: Option<Vec<String>>,
}

impl DocumentFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn content_ids(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            content_ids: Some(ids.into_iter().collect()),
            document_types: None,
        }
    }

    pub fn document_types(types: impl IntoIterator<Item = String>) -> Self {
        Self {
            content_ids: None,
            document_types: Some(types.into_iter().collect()),
        }
    }

    /// Whether a document with these editions is selected.
    pub fn matches(&self, content_id: Uuid, editions: &[&Edition]) -> bool {
        let id_ok = self
            .content_ids
            .as_ref()
            .map(|ids| ids.contains(&content_id))
            .unwrap_or(true);
        let type_ok = self
            .document_types
            .as_ref()
            .map(|types| {
                let present: BTreeSet<&str> = editions.iter().map(|e| e.document_type()).collect();
                types.iter().any(|t| present.contains(t.as_str()))
            })
            .unwrap_or(true);
        id_ok && type_ok
    }
}

/// Interface for the publishing store.
///
/// Implementations:
/// - `MemoryStore`: in-process store used by tests and local tooling
/// - `SqliteStore`: SQLite storage
#[async_trait]
pub trait PublishingStore: Send + Sync {
    /// Read the committed state of one document.
    async fn load_document(&self, content_id: Uuid, locale: &str) -> Result<Option<DocumentSnapshot>>;

    /// Keys of all documents selected by the filter, ordered by key.
    async fn documents(&self, filter: &DocumentFilter) -> Result<Vec<DocumentKey>>;

    /// Apply a mutation and append its event atomically.
    ///
    /// Fails with `Conflict` if the document's lock version is no longer
    /// `expected_lock`, and with `PathConflict` if the reservation is refused;
    /// in either case nothing is written.
    async fn commit(&self, mutation: Mutation) -> Result<Event>;

    /// Reserve a base path outside any edition change.
    async fn reserve_path(&self, request: &ReservationRequest) -> Result<PathReservation>;

    /// Current owner of a base path.
    async fn path_reservation(&self, base_path: &str) -> Result<Option<PathReservation>>;

    /// Outgoing links of a content id.
    async fn link_set(&self, content_id: Uuid) -> Result<Option<LinkSet>>;

    /// Patch a link set and append a `PatchLinkSet` event atomically.
    async fn patch_link_set(&self, patch: LinkPatch, user: Option<String>) -> Result<(LinkSet, Event)>;

    /// Content ids whose link sets point at `target`.
    async fn dependents(&self, target: Uuid) -> Result<Vec<Uuid>>;

    /// Append an event that accompanies no state change.
    async fn append_event(&self, entry: EventEntry) -> Result<Event>;

    /// Events recorded for a content id, ordered by id.
    async fn events(&self, content_id: Uuid) -> Result<Vec<Event>>;

    /// Audit records for a content id, ordered by event id.
    async fn audit_trail(&self, content_id: Uuid) -> Result<Vec<AuditRecord>>;
}

/// Initialize storage based on configuration.
pub async fn init_storage(
    config: &StorageConfig,
) -> std::result::Result<Arc<dyn PublishingStore>, Box<dyn std::error::Error + Send + Sync>> {
    info!(storage_type = ?config.storage_type, path = %config.path, "Initializing storage");

    match config.storage_type {
        StorageType::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            let store = SqliteStore::connect(&config.path).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => {
            tracing::error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err("SQLite feature not enabled".into())
        }
    }
}
