//! Publisher: runs commands against a store and propagates what they commit.

use std::future::Future;
use std::sync::Arc;

use backon::Retryable;
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{ConcurrencyConfig, Config};
use crate::downstream::{
    DeliveryFailure, DownstreamJob, JobKind, JobQueue, Priority, Propagation, PublishIntent,
    SweepReport, Synchronizer, Target,
};
use crate::links::{EditionDiff, ExpansionRules};
use crate::model::{
    AuditRecord, DocumentKey, DocumentSnapshot, Event, LinkSet, PathReservation,
    ReservationRequest,
};
use crate::storage::{DocumentFilter, LinkPatch, PublishingStore, StorageError};
use crate::utils::retry::conflict_backoff;
use crate::validation::{errmsg, validate_path, ValidationErrors};

use super::plan::{self, single_error};
use super::{
    CommandError, CommandOutcome, DocumentRequest, PatchLinkSetRequest, PublishIntentRequest,
    PublishRequest, PutContentRequest, UnpublishRequest,
};

const DRAFT: &[Target] = &[Target::Draft];
const BOTH: &[Target] = &[Target::Live, Target::Draft];

/// Entry point for every state-changing operation.
///
/// Each operation takes a `downstream` flag; with it unset the change is
/// committed and logged but nothing is sent to the content stores.
pub struct Publisher {
    store: Arc<dyn PublishingStore>,
    synchronizer: Synchronizer,
    rules: ExpansionRules,
    concurrency: ConcurrencyConfig,
}

impl Publisher {
    pub fn new(store: Arc<dyn PublishingStore>, queue: Arc<dyn JobQueue>, config: &Config) -> Self {
        Self {
            synchronizer: Synchronizer::new(store.clone(), queue),
            store,
            rules: ExpansionRules::from_config(&config.expansion),
            concurrency: config.concurrency.clone(),
        }
    }

    pub fn store(&self) -> &Arc<dyn PublishingStore> {
        &self.store
    }

    /// Run `attempt` again from a fresh read each time it loses a lock race.
    async fn retrying<T, F, Fut>(&self, key: &DocumentKey, command: &'static str, attempt: F) -> Result<T, CommandError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CommandError>>,
    {
        attempt
            .retry(conflict_backoff(&self.concurrency))
            .when(CommandError::is_retryable)
            .notify(|err, dur| {
                warn!(
                    content_id = %key.content_id,
                    locale = %key.locale,
                    command,
                    error = %err,
                    retry_after_ms = dur.as_millis() as u64,
                    "Lock conflict, retrying"
                );
            })
            .await
    }

    async fn load(&self, key: &DocumentKey) -> Result<Option<DocumentSnapshot>, CommandError> {
        Ok(self.store.load_document(key.content_id, &key.locale).await?)
    }

    /// Committed state after `event`, for presenting downstream.
    async fn reload(&self, key: &DocumentKey, event: &Event) -> Option<DocumentSnapshot> {
        match self.load(key).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(
                    content_id = %key.content_id,
                    event_id = event.id,
                    error = %e,
                    "Could not reload committed document for downstream"
                );
                None
            }
        }
    }

    /// Create or replace the draft of a document.
    pub async fn put_content(&self, request: PutContentRequest, downstream: bool) -> Result<CommandOutcome, CommandError> {
        let key = request.key();
        let (event, plan) = self
            .retrying(&key, "put_content", || async {
                let snapshot = self.load(&key).await?;
                let link_set = match &request.links {
                    Some(_) => self.store.link_set(key.content_id).await?,
                    None => None,
                };
                let plan = plan::put_content(snapshot.as_ref(), link_set.as_ref(), &request, Utc::now())?;
                let event = self.store.commit(plan.mutation.clone()).await?;
                Ok((event, plan))
            })
            .await?;

        info!(
            content_id = %key.content_id,
            locale = %key.locale,
            event_id = event.id,
            version = plan.draft.user_facing_version,
            "Draft saved"
        );

        let mut failures = Vec::new();
        if downstream {
            let priority = if request.bulk_publishing {
                Priority::Low
            } else {
                Priority::High
            };
            if let Some(snapshot) = self.reload(&key, &event).await {
                failures.extend(
                    self.synchronizer
                        .propagate(&snapshot, DRAFT, &event, Propagation { priority, ..Propagation::default() })
                        .await,
                );
            }
            failures.extend(self.fan_out(&key, &plan.diff, plan.orphaned, DRAFT, &event).await);
        }

        Ok(CommandOutcome {
            event,
            edition: Some(plan.draft),
            delivery_failures: failures,
        })
    }

    /// Promote the draft of a document to published.
    pub async fn publish(&self, request: PublishRequest, downstream: bool) -> Result<CommandOutcome, CommandError> {
        let key = request.key();
        let (event, plan) = self
            .retrying(&key, "publish", || async {
                let snapshot = self.load(&key).await?;
                let plan = plan::publish(snapshot.as_ref(), &request, Utc::now())?;
                let event = self.store.commit(plan.mutation.clone()).await?;
                Ok((event, plan))
            })
            .await?;

        info!(
            content_id = %key.content_id,
            locale = %key.locale,
            event_id = event.id,
            version = plan.published.user_facing_version,
            update_type = %plan.published.content.update_type,
            "Published"
        );

        let mut failures = Vec::new();
        if downstream {
            if let Some(snapshot) = self.reload(&key, &event).await {
                failures.extend(
                    self.synchronizer
                        .propagate(&snapshot, BOTH, &event, Propagation::high())
                        .await,
                );
            }
            failures.extend(self.fan_out(&key, &plan.diff, Vec::new(), BOTH, &event).await);
        }

        Ok(CommandOutcome {
            event,
            edition: Some(plan.published),
            delivery_failures: failures,
        })
    }

    /// Withdraw the live edition of a document.
    pub async fn unpublish(&self, request: UnpublishRequest, downstream: bool) -> Result<CommandOutcome, CommandError> {
        let key = request.key();
        let (event, plan) = self
            .retrying(&key, "unpublish", || async {
                let snapshot = self.load(&key).await?;
                let plan = plan::unpublish(snapshot.as_ref(), &request, Utc::now())?;
                let event = self.store.commit(plan.mutation.clone()).await?;
                Ok((event, plan))
            })
            .await?;

        info!(
            content_id = %key.content_id,
            locale = %key.locale,
            event_id = event.id,
            unpublishing_type = %request.spec.kind(),
            discarded_draft = plan.discarded_draft.is_some(),
            "Unpublished"
        );

        let mut failures = Vec::new();
        if downstream {
            if let Some(snapshot) = self.reload(&key, &event).await {
                failures.extend(
                    self.synchronizer
                        .propagate(&snapshot, BOTH, &event, Propagation::high())
                        .await,
                );
            }
            failures.extend(self.dependents(key.content_id, BOTH, &event).await);
        }

        Ok(CommandOutcome {
            event,
            edition: Some(plan.unpublished),
            delivery_failures: failures,
        })
    }

    /// Delete the draft of a document.
    pub async fn discard_draft(&self, request: DocumentRequest, downstream: bool) -> Result<CommandOutcome, CommandError> {
        let key = request.key();
        let (event, plan) = self
            .retrying(&key, "discard_draft", || async {
                let snapshot = self.load(&key).await?;
                let plan = plan::discard_draft(snapshot.as_ref(), &request, Utc::now())?;
                let event = self.store.commit(plan.mutation.clone()).await?;
                Ok((event, plan))
            })
            .await?;

        info!(
            content_id = %key.content_id,
            locale = %key.locale,
            event_id = event.id,
            version = plan.edition.user_facing_version,
            "Draft discarded"
        );

        let mut failures = Vec::new();
        if downstream {
            // The draft store falls back to the live edition, or drops the item.
            let snapshot = self.reload(&key, &event).await;
            failures.extend(match snapshot.filter(|s| s.live().is_some()) {
                Some(snapshot) => {
                    self.synchronizer
                        .propagate(&snapshot, DRAFT, &event, Propagation::high())
                        .await
                }
                None => {
                    self.synchronizer
                        .propagate_delete(&key, plan.edition.base_path(), DRAFT, &event, Priority::High)
                        .await
                }
            });
        }

        Ok(CommandOutcome {
            event,
            edition: None,
            delivery_failures: failures,
        })
    }

    /// Send the published edition downstream again, unchanged.
    pub async fn republish(&self, request: DocumentRequest, downstream: bool) -> Result<CommandOutcome, CommandError> {
        let key = request.key();
        let (event, plan) = self
            .retrying(&key, "republish", || async {
                let snapshot = self.load(&key).await?;
                let plan = plan::republish(snapshot.as_ref(), &request, Utc::now())?;
                let event = self.store.commit(plan.mutation.clone()).await?;
                Ok((event, plan))
            })
            .await?;

        info!(content_id = %key.content_id, locale = %key.locale, event_id = event.id, "Republished");

        let mut failures = Vec::new();
        if downstream {
            if let Some(snapshot) = self.reload(&key, &event).await {
                failures.extend(
                    self.synchronizer
                        .propagate(&snapshot, BOTH, &event, Propagation::high().republish())
                        .await,
                );
            }
        }

        Ok(CommandOutcome {
            event,
            edition: Some(plan.edition),
            delivery_failures: failures,
        })
    }

    /// Replace link types in a content id's link set.
    ///
    /// Every locale of the content id is re-sent with its new links, and so is
    /// every target the patch dropped.
    pub async fn patch_link_set(
        &self,
        request: PatchLinkSetRequest,
        downstream: bool,
    ) -> Result<(LinkSet, CommandOutcome), CommandError> {
        if request.links.is_empty() {
            return Err(single_error("links", errmsg::REQUIRED));
        }
        let key = DocumentKey::new(request.content_id, "*");
        let (link_set, event, orphaned) = self
            .retrying(&key, "patch_link_set", || async {
                let current = self.store.link_set(request.content_id).await?;
                let orphaned = current
                    .as_ref()
                    .map(|set| set.orphaned_by(&set.patched(&request.links)))
                    .unwrap_or_default();
                let patch = LinkPatch {
                    content_id: request.content_id,
                    expected_lock: current.map(|set| set.stale_lock_version),
                    links: request.links.clone(),
                };
                let (link_set, event) = self.store.patch_link_set(patch, request.user.clone()).await?;
                Ok((link_set, event, orphaned))
            })
            .await?;

        info!(
            content_id = %request.content_id,
            event_id = event.id,
            lock_version = link_set.stale_lock_version,
            orphaned = orphaned.len(),
            "Link set patched"
        );

        let mut failures = Vec::new();
        if downstream {
            let priority = if request.bulk_publishing {
                Priority::Low
            } else {
                Priority::High
            };
            let keys = self
                .store
                .documents(&DocumentFilter::content_ids([request.content_id]))
                .await;
            for key in self.after_commit(keys, &event) {
                if let Some(snapshot) = self.reload(&key, &event).await {
                    failures.extend(
                        self.synchronizer
                            .propagate(&snapshot, BOTH, &event, Propagation { priority, ..Propagation::default() })
                            .await,
                    );
                }
            }
            failures.extend(self.related(orphaned, BOTH, &event).await);
        }

        Ok((
            link_set,
            CommandOutcome {
                event,
                edition: None,
                delivery_failures: failures,
            },
        ))
    }

    /// Reserve a base path for a publishing app.
    pub async fn reserve_path(&self, request: ReservationRequest) -> Result<PathReservation, CommandError> {
        let mut errors = ValidationErrors::new();
        validate_path("base_path", &request.base_path, &mut errors);
        errors.into_result()?;

        let reservation = self.store.reserve_path(&request).await?;
        info!(
            base_path = %reservation.base_path,
            publishing_app = %reservation.publishing_app,
            "Path reserved"
        );
        Ok(reservation)
    }

    /// Reserve a base path and announce an upcoming publication there.
    pub async fn put_publish_intent(
        &self,
        request: PublishIntentRequest,
        downstream: bool,
    ) -> Result<(PathReservation, Vec<DeliveryFailure>), CommandError> {
        let mut reservation = ReservationRequest::new(&request.base_path, &request.publishing_app);
        if request.override_existing {
            reservation = reservation.overriding();
        }
        let reservation = self.reserve_path(reservation).await?;

        let mut failures = Vec::new();
        if downstream {
            let job = DownstreamJob::new(
                Target::Live,
                Priority::High,
                JobKind::PutPublishIntent {
                    base_path: request.base_path.clone(),
                    intent: PublishIntent {
                        publishing_app: request.publishing_app,
                        publish_time: request.publish_time,
                        routes: request.routes,
                        rendering_app: request.rendering_app,
                    },
                },
            );
            failures.extend(self.synchronizer.send(job).await);
        }
        Ok((reservation, failures))
    }

    /// Withdraw a publish intent from the live store.
    pub async fn delete_publish_intent(&self, base_path: &str, downstream: bool) -> Result<Vec<DeliveryFailure>, CommandError> {
        let mut errors = ValidationErrors::new();
        validate_path("base_path", base_path, &mut errors);
        errors.into_result()?;

        if !downstream {
            return Ok(Vec::new());
        }
        let job = DownstreamJob::new(
            Target::Live,
            Priority::High,
            JobKind::DeletePublishIntent {
                base_path: base_path.to_string(),
            },
        );
        Ok(self.synchronizer.send(job).await.into_iter().collect())
    }

    /// Re-send every selected document to `targets`.
    ///
    /// Fails with the first delivery failure if any job could not be enqueued;
    /// the sweep itself still covers every document.
    pub async fn represent_downstream(
        &self,
        filter: &DocumentFilter,
        targets: &[Target],
        user: Option<String>,
    ) -> Result<SweepReport, CommandError> {
        let report = self.synchronizer.represent(filter, targets, user).await?;
        info!(
            documents = report.documents,
            jobs = report.jobs,
            failures = report.failures.len(),
            "Represented downstream"
        );
        match report.failures.first() {
            Some(failure) => Err(CommandError::DeliveryFailure(failure.clone())),
            None => Ok(report),
        }
    }

    /// Audit records for a content id, oldest first.
    pub async fn audit_trail(&self, content_id: Uuid) -> Result<Vec<AuditRecord>, CommandError> {
        Ok(self.store.audit_trail(content_id).await?)
    }

    /// Dependents when the diff touches embedded fields, plus orphaned link targets.
    async fn fan_out(
        &self,
        key: &DocumentKey,
        diff: &EditionDiff,
        orphaned: Vec<Uuid>,
        targets: &[Target],
        event: &Event,
    ) -> Vec<DeliveryFailure> {
        let mut failures = Vec::new();
        if diff.should_update_dependencies(&self.rules) {
            failures.extend(self.dependents(key.content_id, targets, event).await);
        }
        failures.extend(self.related(orphaned, targets, event).await);
        failures
    }

    async fn dependents(&self, content_id: Uuid, targets: &[Target], event: &Event) -> Vec<DeliveryFailure> {
        let result = self
            .synchronizer
            .propagate_dependents(content_id, targets, event)
            .await;
        self.after_commit(result, event)
    }

    async fn related(&self, content_ids: Vec<Uuid>, targets: &[Target], event: &Event) -> Vec<DeliveryFailure> {
        let result = self
            .synchronizer
            .propagate_related(content_ids, targets, event)
            .await;
        self.after_commit(result, event)
    }

    /// A storage failure after commit cannot undo the commit; report it and move on.
    fn after_commit<T>(&self, result: Result<Vec<T>, StorageError>, event: &Event) -> Vec<T> {
        match result {
            Ok(items) => items,
            Err(e) => {
                error!(
                    content_id = %event.content_id,
                    event_id = event.id,
                    error = %e,
                    "Could not resolve related items to re-send"
                );
                Vec::new()
            }
        }
    }
}
