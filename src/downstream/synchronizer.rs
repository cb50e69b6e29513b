//! Turns committed events into downstream jobs.
//!
//! The synchronizer never blocks on delivery and never reorders: it presents
//! the committed state, stamps it with the event id and hands it to the queue.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::{ActionKind, DocumentKey, DocumentSnapshot, Event};
use crate::storage::{DocumentFilter, EventEntry, PublishingStore, StorageError};

use super::presenter::{as_republish, draft_payload, live_payload};
use super::{DeliveryFailure, DownstreamJob, DownstreamPayload, JobKind, JobQueue, Priority, Target};

/// How a propagation is enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Propagation {
    pub priority: Priority,
    /// Send with `update_type = republish`.
    pub republish: bool,
}

impl Propagation {
    pub fn high() -> Self {
        Self {
            priority: Priority::High,
            republish: false,
        }
    }

    pub fn low() -> Self {
        Self {
            priority: Priority::Low,
            republish: false,
        }
    }

    pub fn republish(mut self) -> Self {
        self.republish = true;
        self
    }
}

/// Result of a represent-downstream sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub documents: usize,
    pub jobs: usize,
    pub failures: Vec<DeliveryFailure>,
}

pub struct Synchronizer {
    store: Arc<dyn PublishingStore>,
    queue: Arc<dyn JobQueue>,
}

impl Synchronizer {
    pub fn new(store: Arc<dyn PublishingStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { store, queue }
    }

    /// Enqueue the current representation of `snapshot` for each target.
    ///
    /// Returns the jobs that could not be enqueued.
    pub async fn propagate(
        &self,
        snapshot: &DocumentSnapshot,
        targets: &[Target],
        event: &Event,
        propagation: Propagation,
    ) -> Vec<DeliveryFailure> {
        let mut failures = Vec::new();
        for &target in targets {
            let Some(mut payload) = present(snapshot, target, event.id) else {
                debug!(
                    content_id = %snapshot.document.content_id,
                    target_store = %target,
                    "Nothing to send"
                );
                continue;
            };
            if propagation.republish {
                payload = as_republish(payload);
            }
            let job = DownstreamJob::new(target, propagation.priority, JobKind::PutContent(payload));
            if let Some(failure) = self.enqueue(job).await {
                failures.push(failure);
            }
        }
        failures
    }

    /// Enqueue removal of a document from each target.
    pub async fn propagate_delete(
        &self,
        key: &DocumentKey,
        base_path: &str,
        targets: &[Target],
        event: &Event,
        priority: Priority,
    ) -> Vec<DeliveryFailure> {
        let mut failures = Vec::new();
        for &target in targets {
            let job = DownstreamJob::new(
                target,
                priority,
                JobKind::DeleteContent {
                    content_id: key.content_id,
                    locale: key.locale.clone(),
                    base_path: base_path.to_string(),
                    payload_version: event.id,
                },
            );
            if let Some(failure) = self.enqueue(job).await {
                failures.push(failure);
            }
        }
        failures
    }

    /// Re-send every item linking to `content_id`, stamped with `event`.
    pub async fn propagate_dependents(
        &self,
        content_id: Uuid,
        targets: &[Target],
        event: &Event,
    ) -> Result<Vec<DeliveryFailure>, StorageError> {
        let dependents = self.store.dependents(content_id).await?;
        debug!(%content_id, count = dependents.len(), "Re-sending dependents");
        self.propagate_related(dependents, targets, event).await
    }

    /// Re-send every locale of each content id at low priority, stamped with `event`.
    pub async fn propagate_related(
        &self,
        content_ids: Vec<Uuid>,
        targets: &[Target],
        event: &Event,
    ) -> Result<Vec<DeliveryFailure>, StorageError> {
        if content_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut failures = Vec::new();
        let keys = self
            .store
            .documents(&DocumentFilter::content_ids(content_ids))
            .await?;
        for key in keys {
            if let Some(snapshot) = self.store.load_document(key.content_id, &key.locale).await? {
                failures.extend(self.propagate(&snapshot, targets, event, Propagation::low()).await);
            }
        }
        Ok(failures)
    }

    /// Re-send every selected document to each target.
    ///
    /// Each `(document, target)` send takes its own `RepresentDownstream`
    /// event, whose id becomes the payload version. The document is re-read
    /// after the event is appended so every commit with a lower id is in the
    /// payload.
    pub async fn represent(
        &self,
        filter: &DocumentFilter,
        targets: &[Target],
        user: Option<String>,
    ) -> Result<SweepReport, StorageError> {
        let mut report = SweepReport::default();
        for key in self.store.documents(filter).await? {
            let Some(snapshot) = self.store.load_document(key.content_id, &key.locale).await? else {
                continue;
            };
            report.documents += 1;
            for &target in targets {
                if present(&snapshot, target, 0).is_none() {
                    continue;
                }
                let event = self
                    .store
                    .append_event(EventEntry {
                        action: ActionKind::RepresentDownstream,
                        content_id: key.content_id,
                        locale: Some(key.locale.clone()),
                        user: user.clone(),
                    })
                    .await?;
                let Some(current) = self.store.load_document(key.content_id, &key.locale).await? else {
                    continue;
                };
                let Some(payload) = present(&current, target, event.id) else {
                    debug!(%key, %target, event_id = event.id, "Nothing left to represent");
                    continue;
                };
                let job = DownstreamJob::new(target, Priority::Low, JobKind::PutContent(payload));
                report.jobs += 1;
                if let Some(failure) = self.enqueue(job).await {
                    report.failures.push(failure);
                }
            }
        }
        Ok(report)
    }

    /// Hand a job that needs no presenting to the queue.
    pub async fn send(&self, job: DownstreamJob) -> Option<DeliveryFailure> {
        self.enqueue(job).await
    }

    async fn enqueue(&self, job: DownstreamJob) -> Option<DeliveryFailure> {
        let failure_context = (job.target, job.content_id(), job.payload_version());
        match self.queue.enqueue(job).await {
            Ok(()) => None,
            Err(err) => {
                let (target, content_id, payload_version) = failure_context;
                warn!(
                    content_id = ?content_id,
                    target_store = %target,
                    payload_version = ?payload_version,
                    error = %err,
                    "Could not enqueue delivery"
                );
                Some(DeliveryFailure {
                    content_id,
                    target,
                    payload_version,
                    reason: err.to_string(),
                })
            }
        }
    }
}

fn present(snapshot: &DocumentSnapshot, target: Target, payload_version: i64) -> Option<DownstreamPayload> {
    match target {
        Target::Draft => draft_payload(snapshot, payload_version),
        Target::Live => live_payload(snapshot, payload_version),
    }
}
