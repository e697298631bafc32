//! Routing of click events to the single aggregator owning each link.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::actor::{ActorMessage, AggregatorSettings, AnalyticsSubscription, ClickAggregatorActor};
use crate::domain::click_dispatch::{ClickDispatcher, ClickError};
use crate::domain::entities::{ClickAggregate, ClickEvent};
use crate::domain::repositories::{ClickAggregateRepository, LinkRepository};

struct ActorHandle {
    tx: mpsc::Sender<ActorMessage>,
    generation: u64,
}

/// Owns the `link_id` → aggregator mapping.
///
/// Lookup and spawn happen under the map's entry lock, so concurrent first
/// clicks for a link converge on one actor. A retired actor closes its inbox;
/// the next message for that link spawns a successor.
pub struct AggregatorRegistry {
    actors: DashMap<i64, ActorHandle>,
    store: Arc<dyn ClickAggregateRepository>,
    links: Arc<dyn LinkRepository>,
    settings: AggregatorSettings,
    generations: AtomicU64,
}

impl AggregatorRegistry {
    pub fn new(
        store: Arc<dyn ClickAggregateRepository>,
        links: Arc<dyn LinkRepository>,
        settings: AggregatorSettings,
    ) -> Self {
        Self {
            actors: DashMap::new(),
            store,
            links,
            settings,
            generations: AtomicU64::new(0),
        }
    }

    fn spawn(&self, link_id: i64) -> ActorHandle {
        let (tx, rx) = mpsc::channel(self.settings.inbox_capacity.max(1));
        let actor = ClickAggregatorActor::new(link_id, self.settings.clone(), self.store.clone(), rx);
        tokio::spawn(actor.run());

        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(link_id, generation, "Spawned click aggregator");
        metrics::counter!("click_aggregators_spawned_total").increment(1);

        ActorHandle { tx, generation }
    }

    /// Returns the inbox of the live actor for `link_id`, spawning one if needed.
    fn sender(&self, link_id: i64) -> mpsc::Sender<ActorMessage> {
        match self.actors.entry(link_id) {
            Entry::Occupied(mut entry) => {
                if entry.get().tx.is_closed() {
                    debug!(link_id, retired = entry.get().generation, "Replacing retired click aggregator");
                    let handle = self.spawn(link_id);
                    let tx = handle.tx.clone();
                    entry.insert(handle);
                    tx
                } else {
                    entry.get().tx.clone()
                }
            }
            Entry::Vacant(entry) => {
                let handle = self.spawn(link_id);
                let tx = handle.tx.clone();
                entry.insert(handle);
                tx
            }
        }
    }

    fn live_sender(&self, link_id: i64) -> Option<mpsc::Sender<ActorMessage>> {
        self.actors
            .get(&link_id)
            .filter(|h| !h.tx.is_closed())
            .map(|h| h.tx.clone())
    }

    async fn request<T>(
        &self,
        link_id: i64,
        make: impl Fn(oneshot::Sender<T>) -> ActorMessage,
    ) -> Result<T, ClickError> {
        // Second attempt covers an actor that retired between lookup and send.
        for _ in 0..2 {
            let (reply_tx, reply_rx) = oneshot::channel();
            if self.sender(link_id).send(make(reply_tx)).await.is_err() {
                continue;
            }
            if let Ok(reply) = reply_rx.await {
                return Ok(reply);
            }
        }
        Err(ClickError::ActorGone { link_id })
    }

    /// Returns a snapshot of the link's recent and open buckets plus a
    /// receiver for every update after it.
    ///
    /// The snapshot and the receiver are produced in one actor turn, so no
    /// delta falls between them.
    ///
    /// # Errors
    ///
    /// Returns [`ClickError::UnknownLink`] without starting an aggregator
    /// when the link does not exist.
    pub async fn subscribe(&self, link_id: i64) -> Result<AnalyticsSubscription, ClickError> {
        let link = self
            .links
            .find_by_id(link_id)
            .await
            .map_err(|e| ClickError::Lookup(e.to_string()))?;
        if link.is_none() {
            return Err(ClickError::UnknownLink { link_id });
        }

        self.request(link_id, ActorMessage::Subscribe).await
    }

    /// Closes and persists the link's open bucket, if it has a live actor.
    pub async fn flush(&self, link_id: i64) -> Result<Option<ClickAggregate>, ClickError> {
        let Some(tx) = self.live_sender(link_id) else {
            return Ok(None);
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if tx.send(ActorMessage::Flush(reply_tx)).await.is_err() {
            // Retiring actors flush on their own way out.
            return Ok(None);
        }
        Ok(reply_rx.await.unwrap_or(None))
    }

    /// Flushes every live actor. Returns the number of buckets persisted.
    pub async fn flush_all(&self) -> usize {
        let link_ids: Vec<i64> = self.actors.iter().map(|e| *e.key()).collect();

        let mut flushed = 0;
        for link_id in link_ids {
            match self.flush(link_id).await {
                Ok(Some(_)) => flushed += 1,
                Ok(None) => {}
                Err(e) => warn!(link_id, error = %e, "Failed to flush click aggregator"),
            }
        }
        flushed
    }

    /// Number of actors currently accepting messages.
    pub fn active_actors(&self) -> usize {
        self.actors.iter().filter(|e| !e.tx.is_closed()).count()
    }

    /// Forgets retired actors. Returns how many remain.
    pub fn prune_retired(&self) -> usize {
        self.actors.retain(|_, handle| !handle.tx.is_closed());
        self.actors.len()
    }
}

impl ClickDispatcher for AggregatorRegistry {
    fn dispatch(&self, event: ClickEvent) -> Result<(), ClickError> {
        let link_id = event.link_id;
        let mut message = ActorMessage::Click(event);

        for _ in 0..2 {
            match self.sender(link_id).try_send(message) {
                Ok(()) => {
                    metrics::counter!("clicks_dispatched_total").increment(1);
                    return Ok(());
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    metrics::counter!("clicks_dropped_total", "reason" => "overload").increment(1);
                    return Err(ClickError::ActorOverload { link_id });
                }
                Err(mpsc::error::TrySendError::Closed(returned)) => message = returned,
            }
        }

        metrics::counter!("clicks_dropped_total", "reason" => "gone").increment(1);
        Err(ClickError::ActorGone { link_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::update::{AnalyticsUpdate, BucketState};
    use crate::domain::entities::{DeviceClass, Link, LinkStatus};
    use crate::infrastructure::memory::{MemoryClickAggregateRepository, MemoryLinkRepository};
    use chrono::Utc;
    use std::time::Duration;

    /// Aligned to a minute boundary.
    const BASE_MS: i64 = 1_700_000_040_000;

    fn registry(settings: AggregatorSettings) -> (Arc<AggregatorRegistry>, Arc<MemoryClickAggregateRepository>) {
        let store = Arc::new(MemoryClickAggregateRepository::new());
        let links = MemoryLinkRepository::with_links((1..=30).map(|id| {
            Link::new(
                id,
                format!("code{id}"),
                1,
                Utc::now(),
                "https://example.com".to_string(),
                LinkStatus::Active,
            )
        }));
        (
            Arc::new(AggregatorRegistry::new(store.clone(), Arc::new(links), settings)),
            store,
        )
    }

    fn click(link_id: i64, region: &str, offset_ms: i64) -> ClickEvent {
        ClickEvent::new(link_id, region, DeviceClass::Desktop, BASE_MS + offset_ms)
    }

    #[tokio::test]
    async fn test_flushed_bucket_holds_region_counts() {
        let (registry, store) = registry(AggregatorSettings::default());

        for i in 0..5 {
            registry.dispatch(click(1, "EU", i * 100)).unwrap();
        }
        for i in 0..3 {
            registry.dispatch(click(1, "US", 1_000 + i * 100)).unwrap();
        }

        let flushed = registry.flush(1).await.unwrap().unwrap();
        assert_eq!(flushed.bucket_start_ms, BASE_MS);

        let stored = store.get(1, BASE_MS).await.unwrap().unwrap();
        let by_region = stored.counts_by_region();
        assert_eq!(by_region.len(), 2);
        assert_eq!(by_region["EU"], 5);
        assert_eq!(by_region["US"], 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_dispatch_uses_one_actor_and_loses_nothing() {
        let (registry, store) = registry(AggregatorSettings {
            inbox_capacity: 4096,
            ..AggregatorSettings::default()
        });

        let mut tasks = Vec::new();
        for t in 0..8 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..250 {
                    registry.dispatch(click(7, if t % 2 == 0 { "EU" } else { "US" }, i)).unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.active_actors(), 1);
        registry.flush(7).await.unwrap();

        let stored = store.get(7, BASE_MS).await.unwrap().unwrap();
        assert_eq!(stored.total(), 2000);
        assert_eq!(stored.counts_by_region()["EU"], 1000);
    }

    #[tokio::test]
    async fn test_subscriber_gets_snapshot_then_deltas() {
        let (registry, _) = registry(AggregatorSettings::default());

        registry.dispatch(click(3, "EU", 0)).unwrap();
        registry.dispatch(click(3, "EU", 10)).unwrap();

        let mut subscription = registry.subscribe(3).await.unwrap();
        match &subscription.snapshot {
            AnalyticsUpdate::Snapshot { link_id, buckets } => {
                assert_eq!(*link_id, 3);
                assert_eq!(buckets.len(), 1);
                assert_eq!(buckets[0].state, BucketState::Open);
                assert_eq!(buckets[0].total, 2);
            }
            other => panic!("expected snapshot, got {:?}", other),
        }

        registry.dispatch(click(3, "EU", 20)).unwrap();
        match subscription.updates.recv().await.unwrap() {
            AnalyticsUpdate::Delta { counter, bucket_start_ms, .. } => {
                assert_eq!(bucket_start_ms, BASE_MS);
                assert_eq!(counter.region_code, "EU");
                assert_eq!(counter.count, 3);
            }
            other => panic!("expected delta, got {:?}", other),
        }

        registry.flush(3).await.unwrap();
        match subscription.updates.recv().await.unwrap() {
            AnalyticsUpdate::Flushed { bucket, .. } => {
                assert_eq!(bucket.state, BucketState::Flushed);
                assert_eq!(bucket.total, 3);
            }
            other => panic!("expected flushed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_click_past_window_end_closes_bucket() {
        let (registry, store) = registry(AggregatorSettings::default());

        registry.dispatch(click(4, "US", 0)).unwrap();
        registry.dispatch(click(4, "US", 59_999)).unwrap();
        registry.dispatch(click(4, "JP", 60_000)).unwrap();

        let second = registry.flush(4).await.unwrap().unwrap();
        assert_eq!(second.bucket_start_ms, BASE_MS + 60_000);
        assert_eq!(second.total(), 1);

        let first = store.get(4, BASE_MS).await.unwrap().unwrap();
        assert_eq!(first.total(), 2);
        assert_eq!(first.counts_by_region()["US"], 2);

        // The first window ended; the second was only flushed early.
        registry.dispatch(click(4, "US", 5)).unwrap();
        registry.dispatch(click(4, "JP", 60_005)).unwrap();
        let reopened = registry.flush(4).await.unwrap().unwrap();
        assert_eq!(reopened.bucket_start_ms, BASE_MS + 60_000);
        assert_eq!(reopened.total(), 1);

        assert_eq!(store.get(4, BASE_MS).await.unwrap().unwrap().total(), 2);
        assert_eq!(store.get(4, BASE_MS + 60_000).await.unwrap().unwrap().total(), 2);
    }

    #[tokio::test]
    async fn test_clicks_after_explicit_flush_are_kept() {
        let (registry, store) = registry(AggregatorSettings::default());

        registry.dispatch(click(20, "EU", 0)).unwrap();
        let first = registry.flush(20).await.unwrap().unwrap();
        assert_eq!(first.total(), 1);

        for offset in 1..=4 {
            registry.dispatch(click(20, "EU", offset * 1_000)).unwrap();
        }
        let second = registry.flush(20).await.unwrap().unwrap();
        assert_eq!(second.bucket_start_ms, BASE_MS);
        assert_eq!(second.total(), 4);

        let stored = store.get(20, BASE_MS).await.unwrap().unwrap();
        assert_eq!(stored.total(), 5);
        assert_eq!(stored.counts_by_region()["EU"], 5);
    }

    #[tokio::test]
    async fn test_snapshot_after_early_flush_shows_whole_window() {
        let (registry, _) = registry(AggregatorSettings::default());

        registry.dispatch(click(21, "EU", 0)).unwrap();
        registry.dispatch(click(21, "EU", 10)).unwrap();
        registry.flush(21).await.unwrap();
        registry.dispatch(click(21, "US", 20)).unwrap();
        registry.flush(21).await.unwrap();

        let subscription = registry.subscribe(21).await.unwrap();
        match subscription.snapshot {
            AnalyticsUpdate::Snapshot { buckets, .. } => {
                assert_eq!(buckets.len(), 1);
                assert_eq!(buckets[0].bucket_start_ms, BASE_MS);
                assert_eq!(buckets[0].total, 3);
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closing_bucket_counts_queued_clicks() {
        let (registry, store) = registry(AggregatorSettings::default());

        registry.dispatch(click(10, "US", 0)).unwrap();
        registry.dispatch(click(10, "US", 60_000)).unwrap();
        // Queued before the first window finished closing.
        registry.dispatch(click(10, "EU", 10)).unwrap();

        registry.flush(10).await.unwrap();
        let first = store.get(10, BASE_MS).await.unwrap().unwrap();
        assert_eq!(first.total(), 2);
        assert_eq!(first.counts_by_region()["EU"], 1);
        assert_eq!(store.get(10, BASE_MS + 60_000).await.unwrap().unwrap().total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_closes_when_window_elapses() {
        let (registry, store) = registry(AggregatorSettings::default());

        registry.dispatch(click(5, "EU", 30_000)).unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;

        let stored = store.get(5, BASE_MS).await.unwrap().unwrap();
        assert_eq!(stored.total(), 1);
        assert_eq!(registry.flush(5).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_actor_retires_and_is_respawned() {
        let (registry, store) = registry(AggregatorSettings {
            idle_timeout: Duration::from_secs(10),
            ..AggregatorSettings::default()
        });

        registry.dispatch(click(6, "EU", 0)).unwrap();
        assert_eq!(registry.active_actors(), 1);

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(registry.active_actors(), 0);
        assert_eq!(store.get(6, BASE_MS).await.unwrap().unwrap().total(), 1);

        registry.dispatch(click(6, "EU", 120_000)).unwrap();
        assert_eq!(registry.active_actors(), 1);
        assert_eq!(registry.prune_retired(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_actor_with_subscriber_stays_alive() {
        let (registry, _) = registry(AggregatorSettings {
            idle_timeout: Duration::from_secs(10),
            ..AggregatorSettings::default()
        });

        let _subscription = registry.subscribe(8).await.unwrap();
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(registry.active_actors(), 1);
    }

    #[tokio::test]
    async fn test_full_inbox_reports_overload() {
        let (registry, _) = registry(AggregatorSettings {
            inbox_capacity: 1,
            ..AggregatorSettings::default()
        });

        // Current-thread runtime: the actor cannot drain until we yield.
        registry.dispatch(click(9, "EU", 0)).unwrap();
        assert_eq!(
            registry.dispatch(click(9, "EU", 1)),
            Err(ClickError::ActorOverload { link_id: 9 })
        );
    }

    #[tokio::test]
    async fn test_subscribe_to_unknown_link_starts_no_actor() {
        let (registry, _) = registry(AggregatorSettings::default());

        let err = registry.subscribe(404).await.unwrap_err();

        assert_eq!(err, ClickError::UnknownLink { link_id: 404 });
        assert_eq!(registry.active_actors(), 0);
    }

    #[tokio::test]
    async fn test_flush_without_actor_is_noop() {
        let (registry, _) = registry(AggregatorSettings::default());
        assert_eq!(registry.flush(42).await.unwrap(), None);
        assert_eq!(registry.flush_all().await, 0);
        assert_eq!(registry.active_actors(), 0);
    }
}
