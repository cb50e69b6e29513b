//! Outgoing links between content items.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Link targets grouped by link type, in caller-supplied order.
pub type Links = BTreeMap<String, Vec<Uuid>>;

/// The outgoing links of one content id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSet {
    pub content_id: Uuid,
    pub stale_lock_version: i64,
    pub links: Links,
}

impl LinkSet {
    pub fn new(content_id: Uuid) -> Self {
        Self {
            content_id,
            stale_lock_version: 0,
            links: Links::new(),
        }
    }

    pub fn targets(&self) -> BTreeSet<Uuid> {
        self.links.values().flatten().copied().collect()
    }

    /// Merge a patch: each named link type is replaced, an empty list removes it.
    pub fn patched(&self, patch: &Links) -> LinkSet {
        let mut links = self.links.clone();
        for (link_type, targets) in patch {
            if targets.is_empty() {
                links.remove(link_type);
            } else {
                links.insert(link_type.clone(), targets.clone());
            }
        }
        LinkSet {
            content_id: self.content_id,
            stale_lock_version: self.stale_lock_version + 1,
            links,
        }
    }

    /// Targets present here but absent from `next`.
    pub fn orphaned_by(&self, next: &LinkSet) -> Vec<Uuid> {
        let remaining = next.targets();
        self.targets()
            .into_iter()
            .filter(|t| !remaining.contains(t))
            .collect()
    }
}
