//! Redirect decision engine.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::click_dispatch::ClickDispatcher;
use crate::domain::entities::{ClickEvent, DeviceClass, Link, Verdict, geo_rule};
use crate::domain::repositories::{EvaluationRepository, GeoRuleRepository, LinkRepository};
use crate::error::AppError;
use crate::infrastructure::Repositories;
use crate::infrastructure::cache::CacheService;

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Answer 404 instead of redirecting to a default destination confirmed dead.
    pub block_dead_default: bool,
    pub cache_ttl_seconds: u64,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            block_dead_default: false,
            cache_ttl_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    GeoRule { priority: i32 },
    Default,
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub link_id: i64,
    pub destination: String,
    /// Verdict the decision was based on; `unknown` when no record exists.
    pub evaluation_hint: Verdict,
    pub source: ResolutionSource,
}

/// Resolves `(short_code, region)` to a destination.
///
/// Reads only the last-known evaluation snapshot; never waits on the
/// evaluation workflow or on click aggregation.
pub struct RedirectResolver {
    links: Arc<dyn LinkRepository>,
    geo_rules: Arc<dyn GeoRuleRepository>,
    evaluations: Arc<dyn EvaluationRepository>,
    cache: Arc<dyn CacheService>,
    clicks: Arc<dyn ClickDispatcher>,
    settings: ResolverSettings,
}

impl RedirectResolver {
    pub fn new(
        repositories: &Repositories,
        cache: Arc<dyn CacheService>,
        clicks: Arc<dyn ClickDispatcher>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            links: repositories.links.clone(),
            geo_rules: repositories.geo_rules.clone(),
            evaluations: repositories.evaluations.clone(),
            cache,
            clicks,
            settings,
        }
    }

    /// Looks up an active link, cache first.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the code is unknown or the link is disabled.
    pub async fn find_link(&self, short_code: &str) -> Result<Link, AppError> {
        let cached = match self.cache.get_link(short_code).await {
            Ok(link) => link,
            Err(e) => {
                warn!("Cache read failed for {}: {}", short_code, e);
                None
            }
        };

        let link = match cached {
            Some(link) => link,
            None => {
                let link = self
                    .links
                    .find_by_code(short_code)
                    .await?
                    .ok_or_else(|| not_found(short_code))?;

                if let Err(e) = self
                    .cache
                    .set_link(&link, Some(self.settings.cache_ttl_seconds))
                    .await
                {
                    warn!("Failed to cache link {}: {}", short_code, e);
                }
                link
            }
        };

        if !link.is_active() {
            return Err(not_found(short_code));
        }
        Ok(link)
    }

    /// Reads the verdict of a destination. Store errors route as `unknown`.
    async fn verdict_of(&self, destination: &str) -> Verdict {
        match self.evaluations.get(destination).await {
            Ok(Some(record)) => record.verdict,
            Ok(None) => Verdict::Unknown,
            Err(e) => {
                warn!(destination, error = %e, "Evaluation lookup failed; routing as unknown");
                Verdict::Unknown
            }
        }
    }

    /// Picks the destination without emitting a click.
    ///
    /// `region` is an upper-case code as produced by
    /// [`crate::utils::region::region_from_headers`].
    ///
    /// # Errors
    ///
    /// - [`AppError::NotFound`] for unknown or disabled links, or a dead
    ///   default destination when blocking is enabled
    /// - [`AppError::Internal`] on storage errors
    pub async fn decide(&self, short_code: &str, region: &str) -> Result<Resolution, AppError> {
        let link = self.find_link(short_code).await?;

        let mut rules = self.geo_rules.find_by_link_id(link.id).await?;
        geo_rule::sort_by_priority(&mut rules);

        for rule in rules.iter().filter(|r| r.matches_region(region)) {
            let verdict = self.verdict_of(&rule.destination).await;
            if verdict.is_routable() {
                return Ok(Resolution {
                    link_id: link.id,
                    destination: rule.destination.clone(),
                    evaluation_hint: verdict,
                    source: ResolutionSource::GeoRule {
                        priority: rule.priority,
                    },
                });
            }
            debug!(
                short_code,
                destination = %rule.destination,
                priority = rule.priority,
                "Skipping dead geo rule"
            );
        }

        let verdict = self.verdict_of(&link.default_destination).await;
        if verdict == Verdict::Dead && self.settings.block_dead_default {
            return Err(AppError::not_found(
                "Destination unavailable",
                json!({ "code": short_code, "verdict": verdict }),
            ));
        }

        Ok(Resolution {
            link_id: link.id,
            destination: link.default_destination,
            evaluation_hint: verdict,
            source: ResolutionSource::Default,
        })
    }

    /// Resolves a redirect and records exactly one click for it.
    ///
    /// The click is handed off without waiting; an overloaded aggregator
    /// drops it rather than delaying the response.
    pub async fn resolve(
        &self,
        short_code: &str,
        region: &str,
        device_class: DeviceClass,
    ) -> Result<Resolution, AppError> {
        let resolution = self.decide(short_code, region).await?;

        if let Err(e) = self
            .clicks
            .dispatch(ClickEvent::now(resolution.link_id, region, device_class))
        {
            debug!(short_code, error = %e, "Click not recorded");
        }
        metrics::counter!("redirects_total", "source" => source_label(resolution.source)).increment(1);

        Ok(resolution)
    }
}

fn source_label(source: ResolutionSource) -> &'static str {
    match source {
        ResolutionSource::GeoRule { .. } => "geo_rule",
        ResolutionSource::Default => "default",
    }
}

fn not_found(short_code: &str) -> AppError {
    AppError::not_found("Short link not found", json!({ "code": short_code }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::click_dispatch::{ClickError, MockClickDispatcher};
    use crate::domain::entities::{EvaluationRecord, GeoRule, LinkStatus};
    use crate::domain::repositories::{
        MockEvaluationRepository, MockGeoRuleRepository, MockLinkRepository,
    };
    use crate::infrastructure::cache::NullCache;
    use crate::infrastructure::memory::{
        MemoryCheckpointRepository, MemoryClickAggregateRepository,
    };
    use chrono::Utc;
    use std::collections::HashMap;

    fn link(status: LinkStatus) -> Link {
        Link::new(
            1,
            "promo".to_string(),
            10,
            Utc::now(),
            "https://c.example".to_string(),
            status,
        )
    }

    fn record(url: &str, verdict: Verdict) -> EvaluationRecord {
        EvaluationRecord {
            destination_url: url.to_string(),
            link_id: 1,
            verdict,
            quality_score: if verdict == Verdict::Dead { 0 } else { 90 },
            last_checked_at: Utc::now(),
            failure_streak: 0,
        }
    }

    fn resolver(
        link: Option<Link>,
        rules: Vec<GeoRule>,
        verdicts: Vec<(&str, Verdict)>,
        clicks: MockClickDispatcher,
        settings: ResolverSettings,
    ) -> RedirectResolver {
        let mut links = MockLinkRepository::new();
        links
            .expect_find_by_code()
            .returning(move |_| Ok(link.clone()));

        let mut geo_rules = MockGeoRuleRepository::new();
        geo_rules
            .expect_find_by_link_id()
            .returning(move |_| Ok(rules.clone()));

        let records: HashMap<String, EvaluationRecord> = verdicts
            .into_iter()
            .map(|(url, verdict)| (url.to_string(), record(url, verdict)))
            .collect();
        let mut evaluations = MockEvaluationRepository::new();
        evaluations
            .expect_get()
            .returning(move |url| Ok(records.get(url).cloned()));

        let repositories = Repositories {
            links: Arc::new(links),
            geo_rules: Arc::new(geo_rules),
            evaluations: Arc::new(evaluations),
            checkpoints: Arc::new(MemoryCheckpointRepository::new()),
            aggregates: Arc::new(MemoryClickAggregateRepository::new()),
        };

        RedirectResolver::new(
            &repositories,
            Arc::new(NullCache::new()),
            Arc::new(clicks),
            settings,
        )
    }

    fn one_click() -> MockClickDispatcher {
        let mut clicks = MockClickDispatcher::new();
        clicks.expect_dispatch().times(1).returning(|_| Ok(()));
        clicks
    }

    fn no_click() -> MockClickDispatcher {
        let mut clicks = MockClickDispatcher::new();
        clicks.expect_dispatch().times(0);
        clicks
    }

    #[tokio::test]
    async fn test_skips_dead_rule_for_next_priority() {
        let rules = vec![
            GeoRule::new(1, "US", "https://b.example", 2),
            GeoRule::new(1, "US", "https://a.example", 1),
        ];
        let verdicts = vec![
            ("https://a.example", Verdict::Dead),
            ("https://b.example", Verdict::Healthy),
        ];
        let resolver = resolver(
            Some(link(LinkStatus::Active)),
            rules,
            verdicts,
            one_click(),
            ResolverSettings::default(),
        );

        let resolution = resolver.resolve("promo", "US", DeviceClass::Desktop).await.unwrap();
        assert_eq!(resolution.destination, "https://b.example");
        assert_eq!(resolution.evaluation_hint, Verdict::Healthy);
        assert_eq!(resolution.source, ResolutionSource::GeoRule { priority: 2 });
    }

    #[tokio::test]
    async fn test_all_rules_dead_falls_back_to_default_without_record() {
        let rules = vec![
            GeoRule::new(1, "US", "https://a.example", 1),
            GeoRule::new(1, "US", "https://b.example", 2),
        ];
        let verdicts = vec![
            ("https://a.example", Verdict::Dead),
            ("https://b.example", Verdict::Dead),
        ];
        let resolver = resolver(
            Some(link(LinkStatus::Active)),
            rules,
            verdicts,
            one_click(),
            ResolverSettings::default(),
        );

        let resolution = resolver.resolve("promo", "US", DeviceClass::Mobile).await.unwrap();
        assert_eq!(resolution.destination, "https://c.example");
        assert_eq!(resolution.evaluation_hint, Verdict::Unknown);
        assert_eq!(resolution.source, ResolutionSource::Default);
    }

    #[tokio::test]
    async fn test_no_matching_region_uses_default() {
        let rules = vec![GeoRule::new(1, "EU", "https://eu.example", 1)];
        let resolver = resolver(
            Some(link(LinkStatus::Active)),
            rules,
            vec![],
            one_click(),
            ResolverSettings::default(),
        );

        let resolution = resolver.resolve("promo", "JP", DeviceClass::Desktop).await.unwrap();
        assert_eq!(resolution.destination, "https://c.example");
    }

    #[tokio::test]
    async fn test_unknown_verdict_routes_as_healthy() {
        let rules = vec![GeoRule::new(1, "US", "https://new.example", 1)];
        let resolver = resolver(
            Some(link(LinkStatus::Active)),
            rules,
            vec![],
            one_click(),
            ResolverSettings::default(),
        );

        let resolution = resolver.resolve("promo", "US", DeviceClass::Desktop).await.unwrap();
        assert_eq!(resolution.destination, "https://new.example");
        assert_eq!(resolution.evaluation_hint, Verdict::Unknown);
    }

    #[tokio::test]
    async fn test_degraded_destination_still_redirects() {
        let rules = vec![GeoRule::new(1, "US", "https://slow.example", 1)];
        let resolver = resolver(
            Some(link(LinkStatus::Active)),
            rules,
            vec![("https://slow.example", Verdict::Degraded)],
            one_click(),
            ResolverSettings::default(),
        );

        let resolution = resolver.resolve("promo", "US", DeviceClass::Desktop).await.unwrap();
        assert_eq!(resolution.destination, "https://slow.example");
    }

    #[tokio::test]
    async fn test_missing_and_disabled_links_are_not_found() {
        let missing = resolver(None, vec![], vec![], no_click(), ResolverSettings::default());
        let err = missing.resolve("nope", "US", DeviceClass::Desktop).await.unwrap_err();
        assert!(err.is_not_found());

        let disabled = resolver(
            Some(link(LinkStatus::Disabled)),
            vec![],
            vec![],
            no_click(),
            ResolverSettings::default(),
        );
        let err = disabled.resolve("promo", "US", DeviceClass::Desktop).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_dead_default_redirects_unless_blocked() {
        let verdicts = vec![("https://c.example", Verdict::Dead)];

        let lenient = resolver(
            Some(link(LinkStatus::Active)),
            vec![],
            verdicts.clone(),
            one_click(),
            ResolverSettings::default(),
        );
        let resolution = lenient.resolve("promo", "US", DeviceClass::Desktop).await.unwrap();
        assert_eq!(resolution.evaluation_hint, Verdict::Dead);

        let strict = resolver(
            Some(link(LinkStatus::Active)),
            vec![],
            verdicts,
            no_click(),
            ResolverSettings {
                block_dead_default: true,
                ..ResolverSettings::default()
            },
        );
        let err = strict.resolve("promo", "US", DeviceClass::Desktop).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_overloaded_aggregator_does_not_fail_redirect() {
        let mut clicks = MockClickDispatcher::new();
        clicks
            .expect_dispatch()
            .times(1)
            .returning(|e| Err(ClickError::ActorOverload { link_id: e.link_id }));

        let resolver = resolver(
            Some(link(LinkStatus::Active)),
            vec![],
            vec![],
            clicks,
            ResolverSettings::default(),
        );

        assert!(resolver.resolve("promo", "US", DeviceClass::Desktop).await.is_ok());
    }

    #[tokio::test]
    async fn test_click_carries_link_and_region() {
        let mut clicks = MockClickDispatcher::new();
        clicks
            .expect_dispatch()
            .withf(|e| e.link_id == 1 && e.region_code == "DE" && e.device_class == DeviceClass::Tablet)
            .times(1)
            .returning(|_| Ok(()));

        let resolver = resolver(
            Some(link(LinkStatus::Active)),
            vec![],
            vec![],
            clicks,
            ResolverSettings::default(),
        );

        resolver.resolve("promo", "DE", DeviceClass::Tablet).await.unwrap();
    }
}
