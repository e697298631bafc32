//! Per-link click aggregation actor.
//!
//! The actor owns every counter of its link; nothing else mutates them.
//! Clicks, flush requests and subscriptions all arrive through one bounded
//! inbox and are handled strictly in order.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, trace};

use super::update::{AnalyticsUpdate, BucketState, BucketView, CounterView};
use crate::domain::entities::{ClickAggregate, ClickEvent, DeviceClass};
use crate::domain::repositories::ClickAggregateRepository;

#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    /// Width of one aggregation window.
    pub bucket: Duration,
    pub inbox_capacity: usize,
    /// Flushed buckets kept for new subscribers' snapshots.
    pub recent_buckets: usize,
    /// An actor without subscribers retires after this long without messages.
    pub idle_timeout: Duration,
    pub broadcast_capacity: usize,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            bucket: Duration::from_secs(60),
            inbox_capacity: 1024,
            recent_buckets: 10,
            idle_timeout: Duration::from_secs(600),
            broadcast_capacity: 256,
        }
    }
}

/// Snapshot of a link's buckets plus the live delta stream that follows it.
#[derive(Debug)]
pub struct AnalyticsSubscription {
    pub snapshot: AnalyticsUpdate,
    pub updates: broadcast::Receiver<AnalyticsUpdate>,
}

pub(crate) enum ActorMessage {
    Click(ClickEvent),
    /// Close the open bucket now; replies with what was flushed.
    Flush(oneshot::Sender<Option<ClickAggregate>>),
    Subscribe(oneshot::Sender<AnalyticsSubscription>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Close {
    /// The window is over; later clicks for it are late.
    WindowEnded,
    /// Flush on request or at shutdown; the window stays open for clicks.
    Early,
}

pub(crate) struct ClickAggregatorActor {
    link_id: i64,
    bucket_ms: i64,
    settings: AggregatorSettings,
    store: Arc<dyn ClickAggregateRepository>,
    inbox: mpsc::Receiver<ActorMessage>,
    updates: broadcast::Sender<AnalyticsUpdate>,
    open: Option<ClickAggregate>,
    /// When the open bucket's window ends.
    deadline: Option<Instant>,
    recent: VecDeque<ClickAggregate>,
    /// Messages pulled from the inbox while a bucket was closing.
    deferred: VecDeque<ActorMessage>,
    /// Clicks in windows starting before this are late.
    watermark_ms: i64,
    /// Finalized buckets whose write failed; retried on the next close.
    unpersisted: Vec<ClickAggregate>,
}

impl ClickAggregatorActor {
    pub(crate) fn new(
        link_id: i64,
        settings: AggregatorSettings,
        store: Arc<dyn ClickAggregateRepository>,
        inbox: mpsc::Receiver<ActorMessage>,
    ) -> Self {
        let (updates, _) = broadcast::channel(settings.broadcast_capacity.max(1));
        Self {
            link_id,
            bucket_ms: i64::try_from(settings.bucket.as_millis()).unwrap_or(i64::MAX).max(1),
            settings,
            store,
            inbox,
            updates,
            open: None,
            deadline: None,
            recent: VecDeque::new(),
            deferred: VecDeque::new(),
            watermark_ms: i64::MIN,
            unpersisted: Vec::new(),
        }
    }

    fn bucket_start(&self, timestamp_ms: i64) -> i64 {
        timestamp_ms - timestamp_ms.rem_euclid(self.bucket_ms)
    }

    pub(crate) async fn run(mut self) {
        debug!(link_id = self.link_id, "Click aggregator started");
        let idle = self.settings.idle_timeout;
        let mut idle_deadline = Instant::now() + idle;

        loop {
            if let Some(message) = self.deferred.pop_front() {
                self.handle(message).await;
                continue;
            }

            let deadline = self.deadline;
            tokio::select! {
                message = self.inbox.recv() => match message {
                    Some(message) => {
                        idle_deadline = Instant::now() + idle;
                        self.handle(message).await;
                    }
                    None => break,
                },
                _ = sleep_until_opt(deadline) => {
                    self.close_open_bucket(Close::WindowEnded).await;
                }
                _ = tokio::time::sleep_until(idle_deadline) => {
                    if self.updates.receiver_count() == 0 {
                        debug!(link_id = self.link_id, "Retiring idle click aggregator");
                        // Senders now see a closed channel and spawn a successor.
                        self.inbox.close();
                        break;
                    }
                    idle_deadline = Instant::now() + idle;
                }
            }
        }

        while let Some(message) = self.next_buffered() {
            self.handle(message).await;
        }
        self.close_open_bucket(Close::Early).await;
        if !self.unpersisted.is_empty() {
            error!(
                link_id = self.link_id,
                buckets = self.unpersisted.len(),
                "Click aggregator stopped with unpersisted buckets"
            );
        }
        debug!(link_id = self.link_id, "Click aggregator stopped");
    }

    fn next_buffered(&mut self) -> Option<ActorMessage> {
        match self.deferred.pop_front() {
            Some(message) => Some(message),
            None => self.inbox.try_recv().ok(),
        }
    }

    async fn handle(&mut self, message: ActorMessage) {
        match message {
            ActorMessage::Click(event) => self.handle_click(event).await,
            ActorMessage::Flush(reply) => {
                let flushed = self.close_open_bucket(Close::Early).await;
                let _ = reply.send(flushed);
            }
            ActorMessage::Subscribe(reply) => {
                let subscription = AnalyticsSubscription {
                    snapshot: self.snapshot(),
                    updates: self.updates.subscribe(),
                };
                let _ = reply.send(subscription);
            }
        }
    }

    async fn handle_click(&mut self, event: ClickEvent) {
        let start = self.bucket_start(event.timestamp_ms);
        if start < self.watermark_ms {
            trace!(link_id = self.link_id, bucket_start_ms = start, "Dropping click for finalized bucket");
            metrics::counter!("clicks_late_dropped_total").increment(1);
            return;
        }

        match self.open.as_ref().map(|b| b.bucket_start_ms) {
            Some(open_start) if open_start == start => {}
            Some(open_start) if start > open_start => {
                self.close_open_bucket(Close::WindowEnded).await;
                self.open_bucket(start, event.timestamp_ms);
            }
            Some(_) => {
                metrics::counter!("clicks_late_dropped_total").increment(1);
                return;
            }
            None => self.open_bucket(start, event.timestamp_ms),
        }

        if let Some(bucket) = self.open.as_mut() {
            let count = bucket.increment(&event.region_code, event.device_class);
            self.publish_delta(start, &event.region_code, event.device_class, count);
        }
    }

    fn open_bucket(&mut self, start: i64, first_click_ms: i64) {
        let remaining_ms = (start + self.bucket_ms - first_click_ms).clamp(0, self.bucket_ms);
        self.deadline = Some(Instant::now() + Duration::from_millis(remaining_ms as u64));
        self.open = Some(ClickAggregate::new(self.link_id, start));
    }

    /// Open → Closing → Flushed. Returns the counts flushed by this close.
    ///
    /// An early close leaves the window accepting clicks: the next one opens
    /// a new segment under the same bucket key, and the store sums segments.
    async fn close_open_bucket(&mut self, close: Close) -> Option<ClickAggregate> {
        let mut aggregate = self.open.take()?;
        self.deadline = None;
        let start = aggregate.bucket_start_ms;

        // Closing: count clicks for this window that were already queued.
        while let Ok(message) = self.inbox.try_recv() {
            match message {
                ActorMessage::Click(event) if self.bucket_start(event.timestamp_ms) == start => {
                    let count = aggregate.increment(&event.region_code, event.device_class);
                    self.publish_delta(start, &event.region_code, event.device_class, count);
                }
                other => self.deferred.push_back(other),
            }
        }

        self.watermark_ms = match close {
            Close::WindowEnded => start.saturating_add(self.bucket_ms),
            Close::Early => self.watermark_ms.max(start),
        };
        self.unpersisted.push(aggregate.clone());
        self.persist_pending().await;

        // Recent buckets hold whole windows, so early segments are folded together.
        if let Some(last) = self.recent.back_mut().filter(|last| last.bucket_start_ms == start) {
            last.merge(&aggregate);
        } else {
            self.recent.push_back(aggregate.clone());
        }
        while self.recent.len() > self.settings.recent_buckets {
            self.recent.pop_front();
        }

        let window = self.recent.back().unwrap_or(&aggregate);
        let _ = self.updates.send(AnalyticsUpdate::Flushed {
            link_id: self.link_id,
            bucket: BucketView::from_aggregate(window, BucketState::Flushed),
        });
        metrics::counter!("click_buckets_flushed_total").increment(1);

        debug!(
            link_id = self.link_id,
            bucket_start_ms = start,
            total = aggregate.total(),
            "Flushed click bucket"
        );
        Some(aggregate)
    }

    async fn persist_pending(&mut self) {
        let pending = std::mem::take(&mut self.unpersisted);
        for aggregate in pending {
            if let Err(e) = self.store.merge(&aggregate).await {
                error!(
                    link_id = self.link_id,
                    bucket_start_ms = aggregate.bucket_start_ms,
                    error = %e,
                    "Failed to persist click bucket"
                );
                self.unpersisted.push(aggregate);
            }
        }
    }

    fn publish_delta(&self, bucket_start_ms: i64, region_code: &str, device_class: DeviceClass, count: u64) {
        if self.updates.receiver_count() == 0 {
            return;
        }
        let _ = self.updates.send(AnalyticsUpdate::Delta {
            link_id: self.link_id,
            bucket_start_ms,
            counter: CounterView {
                region_code: region_code.to_string(),
                device_class,
                count,
            },
        });
    }

    fn snapshot(&self) -> AnalyticsUpdate {
        let mut buckets: Vec<BucketView> = self
            .recent
            .iter()
            .map(|b| BucketView::from_aggregate(b, BucketState::Flushed))
            .collect();
        if let Some(open) = &self.open {
            buckets.push(BucketView::from_aggregate(open, BucketState::Open));
        }

        AnalyticsUpdate::Snapshot {
            link_id: self.link_id,
            buckets,
        }
    }
}

fn sleep_until_opt(deadline: Option<Instant>) -> impl Future<Output = ()> {
    async move {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}
