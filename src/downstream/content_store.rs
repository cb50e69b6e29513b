//! In-process receiving store.
//!
//! Applies the same version guard a real content store does, so it stands in
//! for one wherever delivery order matters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{ApplyOutcome, ContentStore, DeliveryError, DownstreamPayload, PublishIntent};

type ItemKey = (Uuid, String);

#[derive(Default)]
struct Items {
    content: HashMap<ItemKey, DownstreamPayload>,
    /// Highest payload version applied per item, including deletes.
    versions: HashMap<ItemKey, i64>,
    intents: HashMap<String, PublishIntent>,
    received: usize,
}

/// Version-guarded content store held in memory.
pub struct InMemoryContentStore {
    name: String,
    items: RwLock<Items>,
    unreachable_for: AtomicUsize,
}

impl InMemoryContentStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: RwLock::new(Items::default()),
            unreachable_for: AtomicUsize::new(0),
        }
    }

    /// Fail the next `attempts` requests as unreachable.
    pub fn set_unreachable(&self, attempts: usize) {
        self.unreachable_for.store(attempts, Ordering::SeqCst);
    }

    pub async fn get(&self, content_id: Uuid, locale: &str) -> Option<DownstreamPayload> {
        self.items
            .read()
            .await
            .content
            .get(&(content_id, locale.to_string()))
            .cloned()
    }

    pub async fn last_applied(&self, content_id: Uuid, locale: &str) -> Option<i64> {
        self.items
            .read()
            .await
            .versions
            .get(&(content_id, locale.to_string()))
            .copied()
    }

    pub async fn publish_intent(&self, base_path: &str) -> Option<PublishIntent> {
        self.items.read().await.intents.get(base_path).cloned()
    }

    /// Number of requests that reached the store, applied or not.
    pub async fn received(&self) -> usize {
        self.items.read().await.received
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.content.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_reachable(&self) -> Result<(), DeliveryError> {
        let failed = self
            .unreachable_for
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(DeliveryError::Unreachable {
                store: self.name.clone(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

impl Items {
    /// Record `version` for `key` if it is newer than anything applied so far.
    fn advance(&mut self, key: &ItemKey, version: i64) -> Result<(), ApplyOutcome> {
        let last = self.versions.get(key).copied();
        if last.is_some_and(|last| version <= last) {
            return Err(ApplyOutcome::Stale { last_applied: last });
        }
        self.versions.insert(key.clone(), version);
        Ok(())
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put_content(&self, payload: &DownstreamPayload) -> Result<ApplyOutcome, DeliveryError> {
        self.check_reachable()?;
        let key = (payload.content_id, payload.locale.clone());
        let mut items = self.items.write().await;
        items.received += 1;
        if let Err(stale) = items.advance(&key, payload.payload_version) {
            debug!(
                store = %self.name,
                content_id = %payload.content_id,
                payload_version = payload.payload_version,
                "Ignoring stale content"
            );
            return Ok(stale);
        }
        items.content.insert(key, payload.clone());
        Ok(ApplyOutcome::Applied)
    }

    async fn delete_content(
        &self,
        content_id: Uuid,
        locale: &str,
        _base_path: &str,
        payload_version: i64,
    ) -> Result<ApplyOutcome, DeliveryError> {
        self.check_reachable()?;
        let key = (content_id, locale.to_string());
        let mut items = self.items.write().await;
        items.received += 1;
        if let Err(stale) = items.advance(&key, payload_version) {
            return Ok(stale);
        }
        items.content.remove(&key);
        Ok(ApplyOutcome::Applied)
    }

    async fn put_publish_intent(&self, base_path: &str, intent: &PublishIntent) -> Result<(), DeliveryError> {
        self.check_reachable()?;
        let mut items = self.items.write().await;
        items.received += 1;
        items.intents.insert(base_path.to_string(), intent.clone());
        Ok(())
    }

    async fn delete_publish_intent(&self, base_path: &str) -> Result<(), DeliveryError> {
        self.check_reachable()?;
        let mut items = self.items.write().await;
        items.received += 1;
        items.intents.remove(base_path);
        Ok(())
    }
}
