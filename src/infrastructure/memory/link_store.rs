//! In-process link and geo rule storage.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;

use crate::domain::entities::geo_rule::sort_by_priority;
use crate::domain::entities::{GeoRule, Link};
use crate::domain::repositories::{GeoRuleRepository, LinkRepository};
use crate::error::AppError;

/// Links keyed by id with a short code index.
#[derive(Default)]
pub struct MemoryLinkRepository {
    by_id: DashMap<i64, Link>,
    code_index: DashMap<String, i64>,
}

impl MemoryLinkRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store holding `links`; ids and short codes must be distinct.
    pub fn with_links(links: impl IntoIterator<Item = Link>) -> Self {
        let repo = Self::new();
        for link in links {
            repo.code_index.insert(link.short_code.clone(), link.id);
            repo.by_id.insert(link.id, link);
        }
        repo
    }
}

#[async_trait]
impl LinkRepository for MemoryLinkRepository {
    async fn find_by_code(&self, short_code: &str) -> Result<Option<Link>, AppError> {
        let Some(id) = self.code_index.get(short_code).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self.by_id.get(&id).map(|e| e.value().clone()))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Link>, AppError> {
        Ok(self.by_id.get(&id).map(|e| e.value().clone()))
    }

    async fn find_ids_by_default_destination(
        &self,
        destination_url: &str,
    ) -> Result<Vec<i64>, AppError> {
        let mut ids: Vec<i64> = self
            .by_id
            .iter()
            .filter(|e| e.value().default_destination == destination_url)
            .map(|e| *e.key())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn upsert(&self, link: Link) -> Result<Link, AppError> {
        if let Some(owner) = self.code_index.get(&link.short_code)
            && *owner.value() != link.id
        {
            return Err(AppError::conflict(
                "Short code already belongs to another link",
                json!({ "short_code": link.short_code, "link_id": *owner.value() }),
            ));
        }

        // Short codes are immutable, but a replayed event may still carry a
        // different one; drop the stale index entry.
        if let Some(previous) = self.by_id.insert(link.id, link.clone())
            && previous.short_code != link.short_code
        {
            self.code_index.remove(&previous.short_code);
        }
        self.code_index.insert(link.short_code.clone(), link.id);

        Ok(link)
    }

    async fn delete(&self, id: i64) -> Result<bool, AppError> {
        match self.by_id.remove(&id) {
            Some((_, link)) => {
                self.code_index.remove(&link.short_code);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Geo rules grouped by link, kept sorted by priority.
#[derive(Default)]
pub struct MemoryGeoRuleRepository {
    rules: DashMap<i64, Vec<GeoRule>>,
}

impl MemoryGeoRuleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GeoRuleRepository for MemoryGeoRuleRepository {
    async fn find_by_link_id(&self, link_id: i64) -> Result<Vec<GeoRule>, AppError> {
        Ok(self
            .rules
            .get(&link_id)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }

    async fn find_link_ids_by_destination(&self, destination: &str) -> Result<Vec<i64>, AppError> {
        let mut ids: Vec<i64> = self
            .rules
            .iter()
            .filter(|e| e.value().iter().any(|r| r.destination == destination))
            .map(|e| *e.key())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn replace_for_link(&self, link_id: i64, mut rules: Vec<GeoRule>) -> Result<(), AppError> {
        if rules.is_empty() {
            self.rules.remove(&link_id);
            return Ok(());
        }
        sort_by_priority(&mut rules);
        self.rules.insert(link_id, rules);
        Ok(())
    }
}
