//! In-memory PublishingStore implementation.
//!
//! Commits stage every write against a copy of the current state and swap it
//! in only when the whole mutation, event included, has applied. A failure at
//! any step leaves the visible state untouched.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::{
    Action, ActionKind, ActionTarget, AuditRecord, Document, DocumentKey, DocumentSnapshot,
    Edition, EditionState, Event, LinkSet, PathReservation, ReservationRequest,
};
use crate::storage::{
    DocumentFilter, EditionWrite, EventEntry, LinkPatch, Mutation, PublishingStore, Result,
    StorageError,
};

#[derive(Debug, Clone, Default)]
struct State {
    documents: BTreeMap<DocumentKey, Document>,
    editions: HashMap<Uuid, Edition>,
    unpublishings: HashMap<Uuid, crate::model::Unpublishing>,
    reservations: HashMap<String, PathReservation>,
    link_sets: HashMap<Uuid, LinkSet>,
    events: Vec<Event>,
    actions: Vec<Action>,
}

impl State {
    fn snapshot(&self, key: &DocumentKey) -> Option<DocumentSnapshot> {
        let document = self.documents.get(key)?.clone();
        let mut editions: Vec<Edition> = self
            .editions
            .values()
            .filter(|e| e.document_id == document.id)
            .cloned()
            .collect();
        editions.sort_by_key(|e| e.user_facing_version);

        let unpublishing = editions
            .iter()
            .find(|e| e.state == EditionState::Unpublished)
            .and_then(|e| self.unpublishings.get(&e.id))
            .cloned();

        Some(DocumentSnapshot {
            link_set: self.link_sets.get(&document.content_id).cloned(),
            document,
            editions,
            unpublishing,
        })
    }

    fn document_by_id(&self, id: Uuid) -> Option<&Document> {
        self.documents.values().find(|d| d.id == id)
    }

    fn swap_document(&mut self, mutation: &Mutation) -> Result<()> {
        let key = mutation.key();
        let current = self.documents.get(&key);

        match (mutation.expected_lock, current) {
            (None, None) => {}
            (Some(expected), Some(doc))
                if doc.stale_lock_version == expected && doc.id == mutation.document.id => {}
            _ => return Err(StorageError::Conflict { key: key.to_string() }),
        }

        let expected_next = mutation.expected_lock.map(|v| v + 1).unwrap_or(0);
        if mutation.document.stale_lock_version != expected_next {
            return Err(StorageError::Corrupt(format!(
                "document {} lock version must advance to {}",
                key, expected_next
            )));
        }

        self.documents.insert(key, mutation.document.clone());
        Ok(())
    }

    fn reserve(&mut self, request: &ReservationRequest, now: DateTime<Utc>) -> Result<PathReservation> {
        let existing = self.reservations.get(&request.base_path);
        let outcome = request
            .resolve(existing)
            .map_err(|owner| StorageError::PathConflict {
                base_path: request.base_path.clone(),
                owner,
            })?;
        let row = outcome.apply(request, existing, now);
        self.reservations.insert(row.base_path.clone(), row.clone());
        Ok(row)
    }

    fn write_edition(&mut self, write: &EditionWrite) -> Result<()> {
        match write {
            EditionWrite::Insert(edition) => {
                if self.editions.contains_key(&edition.id) {
                    return Err(StorageError::Conflict {
                        key: edition.id.to_string(),
                    });
                }
                self.editions.insert(edition.id, edition.clone());
            }
            EditionWrite::Update(edition) => {
                if !self.editions.contains_key(&edition.id) {
                    return Err(StorageError::Conflict {
                        key: edition.id.to_string(),
                    });
                }
                self.editions.insert(edition.id, edition.clone());
            }
            EditionWrite::Delete(id) => {
                if self.editions.remove(id).is_none() {
                    return Err(StorageError::Conflict { key: id.to_string() });
                }
                self.unpublishings.remove(id);
            }
        }
        Ok(())
    }

    /// Enforce one draft and one live edition per document, and base path
    /// exclusivity between documents of the same locale.
    fn check_editions(&self, document: &Document) -> Result<()> {
        let own: Vec<&Edition> = self
            .editions
            .values()
            .filter(|e| e.document_id == document.id)
            .collect();

        let drafts = own.iter().filter(|e| e.state == EditionState::Draft).count();
        let live = own.iter().filter(|e| e.state.is_live()).count();
        if drafts > 1 || live > 1 {
            return Err(StorageError::Conflict {
                key: document.key().to_string(),
            });
        }

        for edition in own.iter().filter(|e| e.state != EditionState::Superseded) {
            let clash = self.editions.values().find(|other| {
                other.document_id != document.id
                    && other.base_path() == edition.base_path()
                    && (other.state == edition.state
                        || (other.state.is_live() && edition.state.is_live()))
                    && self
                        .document_by_id(other.document_id)
                        .map(|d| d.locale == document.locale)
                        .unwrap_or(false)
            });
            if let Some(other) = clash {
                let owner = self.document_by_id(other.document_id);
                return Err(StorageError::BasePathTaken {
                    base_path: edition.base_path().to_string(),
                    content_id: owner.map(|d| d.content_id.to_string()).unwrap_or_default(),
                    locale: document.locale.clone(),
                });
            }
        }
        Ok(())
    }

    fn patch_links(&mut self, patch: &LinkPatch) -> Result<LinkSet> {
        let current = self.link_sets.get(&patch.content_id);
        if current.map(|s| s.stale_lock_version) != patch.expected_lock {
            return Err(StorageError::Conflict {
                key: format!("link set {}", patch.content_id),
            });
        }
        let next = current
            .cloned()
            .unwrap_or_else(|| LinkSet {
                stale_lock_version: -1,
                ..LinkSet::new(patch.content_id)
            })
            .patched(&patch.links);
        self.link_sets.insert(patch.content_id, next.clone());
        Ok(next)
    }

    fn append(&mut self, entry: EventEntry, edition_diff: Option<Vec<String>>, now: DateTime<Utc>) -> Event {
        let id = self.events.last().map(|e| e.id + 1).unwrap_or(1);
        let event = Event {
            id,
            action: entry.action,
            content_id: entry.content_id,
            locale: entry.locale,
            user: entry.user,
            created_at: now,
            edition_diff,
        };
        self.events.push(event.clone());
        event
    }
}

/// In-memory publishing store.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    fail_on_append: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent event append fail, to exercise rollback.
    pub fn set_fail_on_append(&self, fail: bool) {
        self.fail_on_append.store(fail, Ordering::SeqCst);
    }

    /// Every edition currently stored, for invariant checks in tests.
    pub async fn all_editions(&self) -> Vec<Edition> {
        let state = self.state.read().await;
        let mut editions: Vec<Edition> = state.editions.values().cloned().collect();
        editions.sort_by_key(|e| (e.document_id, e.user_facing_version));
        editions
    }

    fn check_append(&self) -> Result<()> {
        if self.fail_on_append.load(Ordering::SeqCst) {
            return Err(StorageError::Injected("event append".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PublishingStore for MemoryStore {
    async fn load_document(&self, content_id: Uuid, locale: &str) -> Result<Option<DocumentSnapshot>> {
        let state = self.state.read().await;
        Ok(state.snapshot(&DocumentKey::new(content_id, locale)))
    }

    async fn documents(&self, filter: &DocumentFilter) -> Result<Vec<DocumentKey>> {
        let state = self.state.read().await;
        Ok(state
            .documents
            .iter()
            .filter(|(_, doc)| {
                let editions: Vec<&Edition> = state
                    .editions
                    .values()
                    .filter(|e| e.document_id == doc.id)
                    .collect();
                filter.matches(doc.content_id, &editions)
            })
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn commit(&self, mutation: Mutation) -> Result<Event> {
        let mut state = self.state.write().await;
        let mut staged = state.clone();
        let key = mutation.key();

        staged.swap_document(&mutation)?;
        if let Some(request) = &mutation.reservation {
            staged.reserve(request, mutation.now)?;
        }
        for write in &mutation.edition_writes {
            staged.write_edition(write)?;
        }
        if let Some(unpublishing) = &mutation.unpublishing {
            staged
                .unpublishings
                .insert(unpublishing.edition_id, unpublishing.clone());
        }
        staged.check_editions(&mutation.document)?;
        if let Some(patch) = &mutation.link_patch {
            staged.patch_links(patch)?;
        }

        self.check_append()?;
        let event = staged.append(
            EventEntry {
                action: mutation.log.action,
                content_id: key.content_id,
                locale: Some(key.locale.clone()),
                user: mutation.log.user.clone(),
            },
            mutation.log.edition_diff.clone(),
            mutation.now,
        );
        staged
            .actions
            .push(Action::for_event(&event, mutation.log.target));

        *state = staged;
        Ok(event)
    }

    async fn reserve_path(&self, request: &ReservationRequest) -> Result<PathReservation> {
        let mut state = self.state.write().await;
        state.reserve(request, Utc::now())
    }

    async fn path_reservation(&self, base_path: &str) -> Result<Option<PathReservation>> {
        let state = self.state.read().await;
        Ok(state.reservations.get(base_path).cloned())
    }

    async fn link_set(&self, content_id: Uuid) -> Result<Option<LinkSet>> {
        let state = self.state.read().await;
        Ok(state.link_sets.get(&content_id).cloned())
    }

    async fn patch_link_set(&self, patch: LinkPatch, user: Option<String>) -> Result<(LinkSet, Event)> {
        let mut state = self.state.write().await;
        let mut staged = state.clone();

        let link_set = staged.patch_links(&patch)?;
        self.check_append()?;
        let event = staged.append(
            EventEntry {
                action: ActionKind::PatchLinkSet,
                content_id: patch.content_id,
                locale: None,
                user,
            },
            None,
            Utc::now(),
        );
        staged
            .actions
            .push(Action::for_event(&event, ActionTarget::LinkSet(patch.content_id)));

        *state = staged;
        Ok((link_set, event))
    }

    async fn dependents(&self, target: Uuid) -> Result<Vec<Uuid>> {
        let state = self.state.read().await;
        let mut sources: Vec<Uuid> = state
            .link_sets
            .values()
            .filter(|set| set.targets().contains(&target))
            .map(|set| set.content_id)
            .collect();
        sources.sort();
        Ok(sources)
    }

    async fn append_event(&self, entry: EventEntry) -> Result<Event> {
        let mut state = self.state.write().await;
        self.check_append()?;
        Ok(state.append(entry, None, Utc::now()))
    }

    async fn events(&self, content_id: Uuid) -> Result<Vec<Event>> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.content_id == content_id)
            .cloned()
            .collect())
    }

    async fn audit_trail(&self, content_id: Uuid) -> Result<Vec<AuditRecord>> {
        let state = self.state.read().await;
        Ok(state
            .actions
            .iter()
            .filter(|a| a.content_id == content_id)
            .map(AuditRecord::from)
            .collect())
    }
}

#[cfg(test)]
mod tests;
