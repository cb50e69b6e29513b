//! Worker pool delivering jobs to the downstream stores.
//!
//! Two bounded channels, one per priority, feed a fixed number of workers.
//! Workers always take a high priority job when one is waiting. Jobs carry no
//! ordering between them; two jobs for the same item may run concurrently.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::DownstreamConfig;
use crate::utils::retry::delivery_backoff;

use super::{
    ApplyOutcome, DeadLetter, DeliveryError, DeliveryFailure, DownstreamJob, DownstreamTargets,
    JobQueue, Priority,
};

struct Receivers {
    high: mpsc::Receiver<DownstreamJob>,
    low: mpsc::Receiver<DownstreamJob>,
}

/// Jobs enqueued but not yet finished, with a wakeup when it reaches zero.
#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

struct Worker {
    targets: DownstreamTargets,
    backoff: ExponentialBuilder,
    pending: Arc<Pending>,
    dead_letters: Arc<RwLock<Vec<DeadLetter>>>,
}

impl Worker {
    async fn run(self: Arc<Self>, id: usize, receivers: Arc<Mutex<Receivers>>) {
        debug!(worker = id, "Delivery worker started");
        while let Some(job) = next_job(&receivers).await {
            self.process(job).await;
            self.pending.done();
        }
        debug!(worker = id, "Delivery worker stopped");
    }

    async fn process(&self, job: DownstreamJob) {
        let Some(store) = self.targets.get(job.target) else {
            debug!(target_store = %job.target, "No store configured for target, skipping");
            return;
        };

        let attempts = AtomicUsize::new(0);
        let result = (|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            job.deliver(store.as_ref()).await
        })
        .retry(self.backoff)
        .when(DeliveryError::is_retryable)
        .notify(|err, dur| {
            warn!(
                store = store.name(),
                content_id = ?job.content_id(),
                payload_version = ?job.payload_version(),
                error = %err,
                retry_after_ms = dur.as_millis() as u64,
                "Delivery failed, retrying"
            );
        })
        .await;

        match result {
            Ok(ApplyOutcome::Applied) => {
                debug!(
                    store = store.name(),
                    content_id = ?job.content_id(),
                    payload_version = ?job.payload_version(),
                    "Delivered"
                );
            }
            Ok(ApplyOutcome::Stale { last_applied }) => {
                debug!(
                    store = store.name(),
                    content_id = ?job.content_id(),
                    payload_version = ?job.payload_version(),
                    ?last_applied,
                    "Store already holds a newer version"
                );
            }
            Err(err) => {
                let failure = DeliveryFailure::new(&job, &err);
                error!(
                    store = store.name(),
                    content_id = ?failure.content_id,
                    target_store = %failure.target,
                    payload_version = ?failure.payload_version,
                    error = %err,
                    "Delivery failed permanently, moved to dead letters"
                );
                self.dead_letters.write().await.push(DeadLetter {
                    job,
                    failure,
                    attempts: attempts.load(Ordering::SeqCst),
                    failed_at: Utc::now(),
                });
            }
        }
    }
}

async fn next_job(receivers: &Mutex<Receivers>) -> Option<DownstreamJob> {
    let mut guard = receivers.lock().await;
    let Receivers { high, low } = &mut *guard;
    tokio::select! {
        biased;
        Some(job) = high.recv() => Some(job),
        Some(job) = low.recv() => Some(job),
        else => None,
    }
}

/// Asynchronous delivery with retries and dead letters.
pub struct WorkerPool {
    high: mpsc::Sender<DownstreamJob>,
    low: mpsc::Sender<DownstreamJob>,
    pending: Arc<Pending>,
    dead_letters: Arc<RwLock<Vec<DeadLetter>>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `config.workers` workers delivering to `targets`.
    pub fn start(targets: DownstreamTargets, config: &DownstreamConfig) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (high, high_rx) = mpsc::channel(capacity);
        let (low, low_rx) = mpsc::channel(capacity);
        let receivers = Arc::new(Mutex::new(Receivers {
            high: high_rx,
            low: low_rx,
        }));

        let pending = Arc::new(Pending::default());
        let dead_letters = Arc::new(RwLock::new(Vec::new()));
        let worker = Arc::new(Worker {
            targets,
            backoff: delivery_backoff(&config.retry),
            pending: pending.clone(),
            dead_letters: dead_letters.clone(),
        });

        let handles = (0..config.workers.max(1))
            .map(|id| tokio::spawn(worker.clone().run(id, receivers.clone())))
            .collect();

        Self {
            high,
            low,
            pending,
            dead_letters,
            handles,
        }
    }

    /// Wait until every enqueued job has been delivered or dead-lettered.
    pub async fn drain(&self) {
        loop {
            let idle = self.pending.idle.notified();
            if self.pending.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.read().await.clone()
    }

    /// Enqueue every dead letter again at low priority. Returns how many were requeued.
    pub async fn requeue_dead_letters(&self) -> Result<usize, DeliveryError> {
        let letters = std::mem::take(&mut *self.dead_letters.write().await);
        let count = letters.len();
        for letter in letters {
            let mut job = letter.job;
            job.priority = Priority::Low;
            self.enqueue(job).await?;
        }
        Ok(count)
    }

    /// Stop accepting jobs, finish the queued ones and wait for the workers.
    pub async fn shutdown(self) {
        let Self {
            high, low, handles, ..
        } = self;
        drop(high);
        drop(low);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Delivery worker panicked");
            }
        }
    }
}

#[async_trait]
impl JobQueue for WorkerPool {
    async fn enqueue(&self, job: DownstreamJob) -> Result<(), DeliveryError> {
        let sender = match job.priority {
            Priority::High => &self.high,
            Priority::Low => &self.low,
        };
        self.pending.add();
        if sender.send(job).await.is_err() {
            self.pending.done();
            return Err(DeliveryError::QueueClosed);
        }
        Ok(())
    }
}
