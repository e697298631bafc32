//! In-process evaluation queue with at-least-once delivery.
//!
//! [`EvaluationQueue`] is the producer handle; [`QueueWorker`] consumes jobs
//! and hands each one to a [`JobHandler`]. A semaphore caps the number of
//! jobs in flight, so a burst of enqueues waits in the channel instead of
//! piling onto the fetch stage.
//!
//! At most one delivery per job key runs at a time. A job dequeued while its
//! key is running is parked and redelivered once the running one finishes;
//! both would otherwise drive the same checkpoint.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio_retry::strategy::jitter;
use tracing::{debug, info, warn};

use super::backoff_delay;
use crate::domain::entities::EvaluationJob;
use crate::domain::job_queue::JobQueue;

/// Result of one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Ack,
    /// Redeliver with backoff while the delivery budget lasts.
    Retry(String),
    /// Do not redeliver.
    Fatal(String),
}

/// Delivery callback invoked by the [`QueueWorker`].
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn on_job(&self, job: &EvaluationJob) -> JobOutcome;

    /// Called once when a job ends as fatal or runs out of deliveries.
    async fn on_exhausted(&self, job: &EvaluationJob, reason: &str);
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub capacity: usize,
    /// Total deliveries per job, the first one included.
    pub max_deliveries: u32,
    pub max_in_flight: usize,
    pub redelivery_backoff: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            max_deliveries: 5,
            max_in_flight: 8,
            redelivery_backoff: Duration::from_millis(500),
        }
    }
}

/// Producer handle. Cheap to clone.
#[derive(Clone)]
pub struct EvaluationQueue {
    tx: mpsc::Sender<EvaluationJob>,
    /// Keys of jobs waiting in the channel.
    pending: Arc<DashSet<String>>,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
}

impl EvaluationQueue {
    pub fn new(settings: QueueSettings) -> (Self, QueueWorker) {
        let (tx, rx) = mpsc::channel(settings.capacity.max(1));
        let pending = Arc::new(DashSet::new());
        let permits = Arc::new(Semaphore::new(settings.max_in_flight.max(1)));

        let worker = QueueWorker {
            rx,
            requeue: tx.downgrade(),
            pending: pending.clone(),
            running: Arc::new(DashMap::new()),
            permits: permits.clone(),
            settings: settings.clone(),
        };
        let queue = Self {
            tx,
            pending,
            permits,
            max_in_flight: settings.max_in_flight.max(1),
        };

        (queue, worker)
    }

    /// Jobs waiting for a worker slot.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl JobQueue for EvaluationQueue {
    fn enqueue(&self, job: EvaluationJob) -> bool {
        let key = job.key();
        if !self.pending.insert(key.clone()) {
            debug!(key = %key, "Evaluation already pending, skipping");
            metrics::counter!("evaluation_jobs_deduplicated_total").increment(1);
            return false;
        }

        match self.tx.try_send(job) {
            Ok(()) => {
                metrics::counter!("evaluation_jobs_enqueued_total").increment(1);
                true
            }
            Err(TrySendError::Full(job)) => {
                warn!(key = %key, "Evaluation queue full, deferring enqueue");
                let tx = self.tx.clone();
                let pending = self.pending.clone();
                tokio::spawn(async move {
                    if tx.send(job).await.is_err() {
                        pending.remove(&key);
                    }
                });
                true
            }
            Err(TrySendError::Closed(_)) => {
                warn!(key = %key, "Evaluation queue closed, dropping job");
                self.pending.remove(&key);
                false
            }
        }
    }
}

/// Consumer side. Run it with [`QueueWorker::run`] on its own task.
pub struct QueueWorker {
    rx: mpsc::Receiver<EvaluationJob>,
    /// Weak so the channel closes once every producer is gone.
    requeue: mpsc::WeakSender<EvaluationJob>,
    pending: Arc<DashSet<String>>,
    /// Keys being delivered, each with at most one parked duplicate.
    running: Arc<DashMap<String, Option<EvaluationJob>>>,
    permits: Arc<Semaphore>,
    settings: QueueSettings,
}

/// Sends `job` back through the channel unless its key is already waiting there.
async fn resend(
    requeue: &mpsc::WeakSender<EvaluationJob>,
    pending: &DashSet<String>,
    job: EvaluationJob,
) {
    let key = job.key();
    if !pending.insert(key.clone()) {
        return;
    }
    let Some(tx) = requeue.upgrade() else {
        pending.remove(&key);
        warn!(key = %key, "Queue closed, dropping redelivery");
        return;
    };
    if tx.send(job).await.is_err() {
        pending.remove(&key);
        warn!(key = %key, "Queue closed, dropping redelivery");
    }
}

impl QueueWorker {
    /// Delivers jobs until shutdown is signalled or every producer is dropped,
    /// then waits for in-flight jobs to finish.
    pub async fn run(mut self, handler: Arc<dyn JobHandler>, mut shutdown: watch::Receiver<bool>) {
        info!(
            max_in_flight = self.settings.max_in_flight,
            max_deliveries = self.settings.max_deliveries,
            "Evaluation worker started"
        );

        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let job = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                job = self.rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            let key = job.key();
            self.pending.remove(&key);

            match self.running.entry(key.clone()) {
                Entry::Occupied(mut parked) => {
                    debug!(key = %key, "Evaluation already running, parking duplicate");
                    metrics::counter!("evaluation_jobs_coalesced_total").increment(1);
                    parked.insert(Some(job));
                    continue;
                }
                Entry::Vacant(slot) => {
                    slot.insert(None);
                }
            }

            let handler = handler.clone();
            let requeue = self.requeue.clone();
            let pending = self.pending.clone();
            let running = self.running.clone();
            let settings = self.settings.clone();

            tokio::spawn(async move {
                let outcome = handler.on_job(&job).await;
                drop(permit);

                let redelivery = match outcome {
                    JobOutcome::Ack => {
                        metrics::counter!("evaluation_deliveries_total", "outcome" => "ack")
                            .increment(1);
                        None
                    }
                    JobOutcome::Fatal(reason) => {
                        metrics::counter!("evaluation_deliveries_total", "outcome" => "fatal")
                            .increment(1);
                        handler.on_exhausted(&job, &reason).await;
                        None
                    }
                    JobOutcome::Retry(reason) => {
                        metrics::counter!("evaluation_deliveries_total", "outcome" => "retry")
                            .increment(1);
                        let next = job.next_attempt();
                        if next.attempt >= settings.max_deliveries {
                            handler.on_exhausted(&job, &reason).await;
                            None
                        } else {
                            let delay = backoff_delay(settings.redelivery_backoff, next.attempt);
                            tokio::time::sleep(delay / 2 + jitter(delay / 2)).await;
                            Some(next)
                        }
                    }
                };

                let parked = running.remove(&key).and_then(|(_, parked)| parked);
                // A redelivery runs the same key again, which covers a parked duplicate.
                if let Some(next) = redelivery.or(parked) {
                    resend(&requeue, &pending, next).await;
                }
            });
        }

        let in_flight = u32::try_from(self.settings.max_in_flight.max(1)).unwrap_or(u32::MAX);
        let _ = self.permits.acquire_many(in_flight).await;
        info!("Evaluation worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingHandler {
        outcome: fn(&EvaluationJob) -> JobOutcome,
        delay: Duration,
        deliveries: Mutex<Vec<EvaluationJob>>,
        exhausted: Mutex<Vec<(EvaluationJob, String)>>,
        running: AtomicUsize,
        max_running: AtomicUsize,
        finished: mpsc::UnboundedSender<()>,
    }

    impl RecordingHandler {
        fn new(
            outcome: fn(&EvaluationJob) -> JobOutcome,
            delay: Duration,
        ) -> (Arc<Self>, mpsc::UnboundedReceiver<()>) {
            let (finished, rx) = mpsc::unbounded_channel();
            let handler = Arc::new(Self {
                outcome,
                delay,
                deliveries: Mutex::new(Vec::new()),
                exhausted: Mutex::new(Vec::new()),
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
                finished,
            });
            (handler, rx)
        }
    }

    #[async_trait]
    impl JobHandler for RecordingHandler {
        async fn on_job(&self, job: &EvaluationJob) -> JobOutcome {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            self.deliveries.lock().unwrap().push(job.clone());
            let outcome = (self.outcome)(job);
            if outcome == JobOutcome::Ack {
                let _ = self.finished.send(());
            }
            outcome
        }

        async fn on_exhausted(&self, job: &EvaluationJob, reason: &str) {
            self.exhausted
                .lock()
                .unwrap()
                .push((job.clone(), reason.to_string()));
            let _ = self.finished.send(());
        }
    }

    fn settings(max_in_flight: usize, max_deliveries: u32) -> QueueSettings {
        QueueSettings {
            capacity: 100,
            max_deliveries,
            max_in_flight,
            redelivery_backoff: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_enqueue_deduplicates_pending_jobs() {
        let (queue, _worker) = EvaluationQueue::new(settings(1, 3));

        assert!(queue.enqueue(EvaluationJob::new("https://a.example", 1)));
        assert!(!queue.enqueue(EvaluationJob::new("https://a.example", 1)));
        assert!(queue.enqueue(EvaluationJob::new("https://a.example", 2)));

        assert_eq!(queue.depth(), 2);
    }

    #[tokio::test]
    async fn test_worker_acks_every_job() {
        let (queue, worker) = EvaluationQueue::new(settings(4, 3));
        let (handler, mut finished) =
            RecordingHandler::new(|_| JobOutcome::Ack, Duration::from_millis(1));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(worker.run(handler.clone(), shutdown_rx));

        for i in 0..5 {
            queue.enqueue(EvaluationJob::new(format!("https://{i}.example"), 1));
        }
        for _ in 0..5 {
            finished.recv().await.unwrap();
        }

        assert_eq!(handler.deliveries.lock().unwrap().len(), 5);
        assert!(handler.exhausted.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_delivery_budget_exhausted() {
        let (queue, worker) = EvaluationQueue::new(settings(1, 3));
        let (handler, mut finished) = RecordingHandler::new(
            |_| JobOutcome::Retry("store down".to_string()),
            Duration::ZERO,
        );
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(worker.run(handler.clone(), shutdown_rx));

        queue.enqueue(EvaluationJob::new("https://flaky.example", 1));
        finished.recv().await.unwrap();

        let deliveries = handler.deliveries.lock().unwrap().clone();
        assert_eq!(deliveries.len(), 3);
        assert_eq!(
            deliveries.iter().map(|j| j.attempt).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        let exhausted = handler.exhausted.lock().unwrap();
        assert_eq!(exhausted.len(), 1);
        assert_eq!(exhausted[0].1, "store down");
    }

    #[tokio::test]
    async fn test_fatal_is_not_redelivered() {
        let (queue, worker) = EvaluationQueue::new(settings(1, 5));
        let (handler, mut finished) =
            RecordingHandler::new(|_| JobOutcome::Fatal("bad job".to_string()), Duration::ZERO);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(worker.run(handler.clone(), shutdown_rx));

        queue.enqueue(EvaluationJob::new("https://bad.example", 1));
        finished.recv().await.unwrap();

        assert_eq!(handler.deliveries.lock().unwrap().len(), 1);
        assert_eq!(handler.exhausted.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_jobs_are_capped() {
        let (queue, worker) = EvaluationQueue::new(settings(2, 1));
        let (handler, mut finished) =
            RecordingHandler::new(|_| JobOutcome::Ack, Duration::from_secs(1));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(worker.run(handler.clone(), shutdown_rx));

        for i in 0..6 {
            queue.enqueue(EvaluationJob::new(format!("https://{i}.example"), 1));
        }
        for _ in 0..6 {
            finished.recv().await.unwrap();
        }

        assert_eq!(handler.max_running.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_key_never_runs_concurrently() {
        let (queue, worker) = EvaluationQueue::new(settings(4, 1));
        let (handler, mut finished) =
            RecordingHandler::new(|_| JobOutcome::Ack, Duration::from_secs(1));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(worker.run(handler.clone(), shutdown_rx));

        assert!(queue.enqueue(EvaluationJob::new("https://same.example", 1)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.in_flight(), 1);

        // Dequeued already, so this one is accepted and must wait its turn.
        assert!(queue.enqueue(EvaluationJob::new("https://same.example", 1)));
        finished.recv().await.unwrap();
        finished.recv().await.unwrap();

        assert_eq!(handler.deliveries.lock().unwrap().len(), 2);
        assert_eq!(handler.max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_worker_stops_on_shutdown() {
        let (_queue, worker) = EvaluationQueue::new(settings(1, 1));
        let (handler, _finished) = RecordingHandler::new(|_| JobOutcome::Ack, Duration::ZERO);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(worker.run(handler, shutdown_rx));

        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("worker did not stop")
            .unwrap();
    }
}
