//! Handling of link lifecycle events pushed by the link management service.

use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::entities::{EvaluationJob, GeoRule, Link};
use crate::domain::job_queue::JobQueue;
use crate::domain::repositories::{GeoRuleRepository, LinkRepository};
use crate::error::AppError;
use crate::infrastructure::Repositories;
use crate::infrastructure::cache::CacheService;

/// Mirrors link records locally and schedules evaluation of their destinations.
pub struct LinkEventService {
    links: Arc<dyn LinkRepository>,
    geo_rules: Arc<dyn GeoRuleRepository>,
    cache: Arc<dyn CacheService>,
    queue: Arc<dyn JobQueue>,
}

impl LinkEventService {
    pub fn new(
        repositories: &Repositories,
        cache: Arc<dyn CacheService>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            links: repositories.links.clone(),
            geo_rules: repositories.geo_rules.clone(),
            cache,
            queue,
        }
    }

    /// Stores a new link with its rules and enqueues every destination.
    ///
    /// Returns the number of jobs enqueued.
    pub async fn link_created(&self, link: Link, rules: Vec<GeoRule>) -> Result<usize, AppError> {
        if let Some(existing) = self.links.find_by_id(link.id).await?
            && existing.short_code != link.short_code
        {
            return Err(short_code_conflict(&existing, &link));
        }

        let link = self.links.upsert(link).await?;
        self.geo_rules.replace_for_link(link.id, rules.clone()).await?;
        self.invalidate(&link.short_code).await;

        let enqueued = self.enqueue_destinations(&link, &rules);
        info!(link_id = link.id, short_code = %link.short_code, enqueued, "Link created");
        Ok(enqueued)
    }

    /// Applies an update and re-evaluates every destination.
    ///
    /// `rules` of `None` keeps the stored rules.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Conflict`] if the update changes the short code.
    pub async fn link_updated(
        &self,
        link: Link,
        rules: Option<Vec<GeoRule>>,
        changed_fields: &[String],
    ) -> Result<usize, AppError> {
        if let Some(existing) = self.links.find_by_id(link.id).await? {
            if existing.short_code != link.short_code {
                return Err(short_code_conflict(&existing, &link));
            }
        } else {
            warn!(link_id = link.id, "Update for unknown link; storing it as new");
        }

        let link = self.links.upsert(link).await?;
        let rules = match rules {
            Some(rules) => {
                self.geo_rules.replace_for_link(link.id, rules.clone()).await?;
                rules
            }
            None => self.geo_rules.find_by_link_id(link.id).await?,
        };
        self.invalidate(&link.short_code).await;

        let enqueued = self.enqueue_destinations(&link, &rules);
        info!(
            link_id = link.id,
            changed = ?changed_fields,
            enqueued,
            "Link updated"
        );
        Ok(enqueued)
    }

    /// Removes a link and its rules.
    ///
    /// Evaluations already in flight notice the missing link before
    /// persisting and are abandoned. Returns `false` for unknown links.
    pub async fn link_deleted(&self, link_id: i64) -> Result<bool, AppError> {
        let Some(link) = self.links.find_by_id(link_id).await? else {
            return Ok(false);
        };

        self.geo_rules.replace_for_link(link_id, Vec::new()).await?;
        let deleted = self.links.delete(link_id).await?;
        self.invalidate(&link.short_code).await;

        info!(link_id, short_code = %link.short_code, "Link deleted");
        Ok(deleted)
    }

    async fn invalidate(&self, short_code: &str) {
        if let Err(e) = self.cache.invalidate(short_code).await {
            warn!("Failed to invalidate cached link {}: {}", short_code, e);
        }
    }

    /// Enqueues the default destination and each distinct rule destination.
    fn enqueue_destinations(&self, link: &Link, rules: &[GeoRule]) -> usize {
        let mut seen = HashSet::new();
        std::iter::once(link.default_destination.as_str())
            .chain(rules.iter().map(|r| r.destination.as_str()))
            .filter(|url| seen.insert(*url))
            .filter(|url| self.queue.enqueue(EvaluationJob::new(*url, link.id)))
            .count()
    }
}

fn short_code_conflict(existing: &Link, incoming: &Link) -> AppError {
    AppError::conflict(
        "Short code is immutable",
        json!({
            "link_id": existing.id,
            "short_code": existing.short_code,
            "requested": incoming.short_code,
        }),
    )
}
