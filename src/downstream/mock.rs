//! Queue that records jobs instead of delivering them.
//!
//! Tests use it to inspect what a command enqueued and to deliver the jobs in
//! whatever order the scenario needs.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ApplyOutcome, DeliveryError, DownstreamJob, DownstreamTargets, JobQueue, Target};

#[derive(Default)]
pub struct RecordingQueue {
    jobs: Mutex<Vec<DownstreamJob>>,
    closed: AtomicBool,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later enqueue fail as if the queue had shut down.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub async fn jobs(&self) -> Vec<DownstreamJob> {
        self.jobs.lock().await.clone()
    }

    pub async fn jobs_for(&self, target: Target) -> Vec<DownstreamJob> {
        self.jobs
            .lock()
            .await
            .iter()
            .filter(|job| job.target == target)
            .cloned()
            .collect()
    }

    /// Remove and return everything recorded so far.
    pub async fn take(&self) -> Vec<DownstreamJob> {
        std::mem::take(&mut *self.jobs.lock().await)
    }

    /// Deliver every recorded job in reverse order, then forget them.
    pub async fn deliver_reversed(&self, targets: &DownstreamTargets) -> Result<Vec<ApplyOutcome>, DeliveryError> {
        let mut jobs = self.take().await;
        jobs.reverse();
        deliver_all(jobs, targets).await
    }

    /// Deliver every recorded job in the order it was enqueued, then forget them.
    pub async fn deliver_in_order(&self, targets: &DownstreamTargets) -> Result<Vec<ApplyOutcome>, DeliveryError> {
        let jobs = self.take().await;
        deliver_all(jobs, targets).await
    }
}

/// Deliver `jobs` one by one, skipping targets with no store.
pub async fn deliver_all(
    jobs: Vec<DownstreamJob>,
    targets: &DownstreamTargets,
) -> Result<Vec<ApplyOutcome>, DeliveryError> {
    let mut outcomes = Vec::with_capacity(jobs.len());
    for job in jobs {
        if let Some(store) = targets.get(job.target) {
            outcomes.push(job.deliver(store.as_ref()).await?);
        }
    }
    Ok(outcomes)
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(&self, job: DownstreamJob) -> Result<(), DeliveryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeliveryError::QueueClosed);
        }
        self.jobs.lock().await.push(job);
        Ok(())
    }
}
