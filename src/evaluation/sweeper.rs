//! Periodic re-evaluation of stale destinations.
//!
//! Independent of per-job retries: any destination whose verdict is older
//! than the staleness threshold is queued again, so a record can never stay
//! stuck. Enqueues are paced by a direct `governor` limiter so a large
//! backlog trickles into the queue.
//!
//! Each job is attributed to a link that still references the destination.
//! Records no link references are removed; otherwise they would stay the
//! oldest rows forever and crowd live destinations out of every batch.

use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::domain::entities::{EvaluationJob, EvaluationRecord};
use crate::domain::job_queue::JobQueue;
use crate::domain::repositories::{EvaluationRepository, GeoRuleRepository, LinkRepository};
use crate::error::AppError;
use crate::infrastructure::Repositories;

#[derive(Debug, Clone)]
pub struct SweepSettings {
    pub interval: Duration,
    pub stale_after: Duration,
    pub rate_per_sec: NonZeroU32,
    pub batch_size: usize,
}

pub struct StaleSweeper {
    evaluations: Arc<dyn EvaluationRepository>,
    links: Arc<dyn LinkRepository>,
    geo_rules: Arc<dyn GeoRuleRepository>,
    queue: Arc<dyn JobQueue>,
    limiter: DefaultDirectRateLimiter,
    settings: SweepSettings,
}

impl StaleSweeper {
    pub fn new(repositories: &Repositories, queue: Arc<dyn JobQueue>, settings: SweepSettings) -> Self {
        Self {
            evaluations: repositories.evaluations.clone(),
            links: repositories.links.clone(),
            geo_rules: repositories.geo_rules.clone(),
            queue,
            limiter: RateLimiter::direct(Quota::per_second(settings.rate_per_sec)),
            settings,
        }
    }

    fn cutoff(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.settings.stale_after)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Picks the link a re-evaluation runs for.
    ///
    /// The recorded link wins while it still references the destination;
    /// otherwise the lowest referencing link id is used.
    async fn owning_link(&self, record: &EvaluationRecord) -> Result<Option<i64>, AppError> {
        let url = record.destination_url.as_str();
        let mut owners = self.links.find_ids_by_default_destination(url).await?;
        owners.extend(self.geo_rules.find_link_ids_by_destination(url).await?);

        if owners.contains(&record.link_id) {
            return Ok(Some(record.link_id));
        }
        Ok(owners.into_iter().min())
    }

    /// Queues one batch of the oldest stale destinations.
    ///
    /// Returns the number of jobs actually enqueued (already pending ones are
    /// skipped). Records of destinations no link references are deleted.
    pub async fn sweep_once(&self) -> Result<usize, AppError> {
        let stale = self
            .evaluations
            .list_stale(self.cutoff(), self.settings.batch_size)
            .await?;

        let mut enqueued = 0;
        let mut removed = 0;
        for record in stale {
            let Some(link_id) = self.owning_link(&record).await? else {
                debug!(url = %record.destination_url, "Removing evaluation of unreferenced destination");
                if self.evaluations.delete(&record.destination_url).await? {
                    removed += 1;
                }
                continue;
            };

            self.limiter.until_ready().await;
            if self
                .queue
                .enqueue(EvaluationJob::new(record.destination_url, link_id))
            {
                enqueued += 1;
            }
        }

        metrics::counter!("evaluation_sweep_enqueued_total").increment(enqueued as u64);
        metrics::counter!("evaluation_sweep_orphans_removed_total").increment(removed);
        Ok(enqueued)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval = ?self.settings.interval,
            stale_after = ?self.settings.stale_after,
            "Stale sweeper started"
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                result = self.sweep_once() => match result {
                    Ok(0) => {}
                    Ok(enqueued) => info!(enqueued, "Queued stale destinations"),
                    Err(e) => error!(error = %e, "Stale sweep failed"),
                },
            }
        }

        info!("Stale sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{GeoRule, Link, LinkStatus, Verdict};
    use crate::domain::job_queue::MockJobQueue;

    fn record(url: &str, age_secs: i64) -> EvaluationRecord {
        owned_record(url, 3, age_secs)
    }

    fn owned_record(url: &str, link_id: i64, age_secs: i64) -> EvaluationRecord {
        EvaluationRecord {
            destination_url: url.to_string(),
            link_id,
            verdict: Verdict::Healthy,
            quality_score: 80,
            last_checked_at: Utc::now() - chrono::Duration::seconds(age_secs),
            failure_streak: 0,
        }
    }

    fn settings(batch_size: usize) -> SweepSettings {
        SweepSettings {
            interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(3600),
            rate_per_sec: NonZeroU32::new(1000).unwrap(),
            batch_size,
        }
    }

    async fn repositories_with_link(link_id: i64, default: &str, rules: &[&str]) -> Repositories {
        let repos = Repositories::in_memory();
        add_link(&repos, link_id, default, rules).await;
        repos
    }

    async fn add_link(repos: &Repositories, link_id: i64, default: &str, rules: &[&str]) {
        repos
            .links
            .upsert(Link::new(
                link_id,
                format!("code{link_id}"),
                1,
                Utc::now(),
                default.to_string(),
                LinkStatus::Active,
            ))
            .await
            .unwrap();
        let rules = rules
            .iter()
            .enumerate()
            .map(|(i, dest)| GeoRule::new(link_id, "US", dest, i as i32 + 1))
            .collect();
        repos.geo_rules.replace_for_link(link_id, rules).await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_enqueues_only_stale_records() {
        let repos = repositories_with_link(
            3,
            "https://old.example",
            &["https://older.example", "https://fresh.example"],
        )
        .await;
        let evaluations = repos.evaluations.clone();
        evaluations.upsert(record("https://old.example", 7200)).await.unwrap();
        evaluations.upsert(record("https://older.example", 9000)).await.unwrap();
        evaluations.upsert(record("https://fresh.example", 10)).await.unwrap();

        let mut queue = MockJobQueue::new();
        queue
            .expect_enqueue()
            .withf(|job| job.destination_url != "https://fresh.example" && job.link_id == 3)
            .times(2)
            .returning(|_| true);

        let sweeper = StaleSweeper::new(&repos, Arc::new(queue), settings(10));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sweep_respects_batch_size_oldest_first() {
        let repos = repositories_with_link(3, "https://a.example", &["https://b.example"]).await;
        let evaluations = repos.evaluations.clone();
        evaluations.upsert(record("https://a.example", 4000)).await.unwrap();
        evaluations.upsert(record("https://b.example", 8000)).await.unwrap();

        let mut queue = MockJobQueue::new();
        queue
            .expect_enqueue()
            .withf(|job| job.destination_url == "https://b.example")
            .times(1)
            .returning(|_| true);

        let sweeper = StaleSweeper::new(&repos, Arc::new(queue), settings(1));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_already_pending_jobs_are_not_counted() {
        let repos = repositories_with_link(3, "https://a.example", &[]).await;
        repos.evaluations.upsert(record("https://a.example", 4000)).await.unwrap();

        let mut queue = MockJobQueue::new();
        queue.expect_enqueue().times(1).returning(|_| false);

        let sweeper = StaleSweeper::new(&repos, Arc::new(queue), settings(10));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unreferenced_records_do_not_starve_live_ones() {
        let repos = repositories_with_link(4, "https://live.example", &[]).await;
        for i in 0..3 {
            repos
                .evaluations
                .upsert(owned_record(&format!("https://orphan{i}.example"), 99, 9000 + i))
                .await
                .unwrap();
        }
        repos
            .evaluations
            .upsert(owned_record("https://live.example", 4, 7200))
            .await
            .unwrap();

        let mut queue = MockJobQueue::new();
        queue
            .expect_enqueue()
            .withf(|job| job.destination_url == "https://live.example" && job.link_id == 4)
            .times(1)
            .returning(|_| true);

        let sweeper = StaleSweeper::new(&repos, Arc::new(queue), settings(1));
        let mut enqueued = 0;
        for _ in 0..4 {
            enqueued += sweeper.sweep_once().await.unwrap();
        }

        assert_eq!(enqueued, 1);
        assert!(repos.evaluations.get("https://orphan0.example").await.unwrap().is_none());
        assert!(repos.evaluations.get("https://live.example").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_shared_destination_moves_to_surviving_link() {
        let repos = repositories_with_link(5, "https://shared.example", &[]).await;
        add_link(&repos, 6, "https://other.example", &["https://shared.example"]).await;
        repos.links.delete(5).await.unwrap();
        repos
            .evaluations
            .upsert(owned_record("https://shared.example", 5, 7200))
            .await
            .unwrap();

        let mut queue = MockJobQueue::new();
        queue
            .expect_enqueue()
            .withf(|job| job.destination_url == "https://shared.example" && job.link_id == 6)
            .times(1)
            .returning(|_| true);

        let sweeper = StaleSweeper::new(&repos, Arc::new(queue), settings(10));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
    }
}
