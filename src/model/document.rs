//! Documents and the committed view of one document's history.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Edition, EditionState, LinkSet, Unpublishing};

/// Identity of a document: one content item in one locale.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentKey {
    pub content_id: Uuid,
    pub locale: String,
}

impl DocumentKey {
    pub fn new(content_id: Uuid, locale: impl Into<String>) -> Self {
        Self {
            content_id,
            locale: locale.into(),
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.content_id, self.locale)
    }
}

/// Document row.
///
/// `stale_lock_version` is the optimistic lock token: every committed
/// mutation of the document's editions compares it against the value it read
/// and bumps it by one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub content_id: Uuid,
    pub locale: String,
    pub stale_lock_version: i64,
}

impl Document {
    pub fn new(key: &DocumentKey) -> Self {
        Self {
            id: Uuid::new_v4(),
            content_id: key.content_id,
            locale: key.locale.clone(),
            stale_lock_version: 0,
        }
    }

    pub fn key(&self) -> DocumentKey {
        DocumentKey::new(self.content_id, self.locale.clone())
    }
}

/// Committed state of one document as read at a single lock version.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub document: Document,
    /// Editions ordered by `user_facing_version`.
    pub editions: Vec<Edition>,
    /// Unpublishing of the live edition, when that edition is unpublished.
    pub unpublishing: Option<Unpublishing>,
    /// Outgoing links of the content id, shared by every locale.
    pub link_set: Option<LinkSet>,
}

impl DocumentSnapshot {
    pub fn key(&self) -> DocumentKey {
        self.document.key()
    }

    pub fn draft(&self) -> Option<&Edition> {
        self.in_state(EditionState::Draft)
    }

    pub fn published(&self) -> Option<&Edition> {
        self.in_state(EditionState::Published)
    }

    pub fn unpublished(&self) -> Option<&Edition> {
        self.in_state(EditionState::Unpublished)
    }

    /// The published or unpublished edition, whichever holds the live slot.
    pub fn live(&self) -> Option<&Edition> {
        self.editions.iter().find(|e| e.state.is_live())
    }

    /// Draft if present, otherwise the published edition.
    pub fn latest_draft_or_published(&self) -> Option<&Edition> {
        self.draft().or_else(|| self.published())
    }

    pub fn edition_at(&self, version: i64) -> Option<&Edition> {
        self.editions
            .iter()
            .find(|e| e.user_facing_version == version)
    }

    pub fn edition(&self, id: Uuid) -> Option<&Edition> {
        self.editions.iter().find(|e| e.id == id)
    }

    /// Highest user-facing version in the history, zero for an empty document.
    pub fn latest_version(&self) -> i64 {
        self.editions
            .iter()
            .map(|e| e.user_facing_version)
            .max()
            .unwrap_or(0)
    }

    fn in_state(&self, state: EditionState) -> Option<&Edition> {
        self.editions.iter().find(|e| e.state == state)
    }
}
