//! Shared application state injected into every handler.

use std::sync::Arc;

use crate::analytics::AggregatorRegistry;
use crate::application::services::{
    AuthService, LinkEventService, RedirectResolver, ResolverSettings,
};
use crate::domain::job_queue::JobQueue;
use crate::domain::repositories::{ClickAggregateRepository, EvaluationRepository, LinkRepository};
use crate::evaluation::EvaluationQueue;
use crate::infrastructure::Repositories;
use crate::infrastructure::cache::CacheService;

/// Request-path settings taken from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct RequestSettings {
    /// Lower-cased name of the header carrying the requester region.
    pub region_header: String,
    /// 302 or 307.
    pub redirect_status: u16,
    pub resolver: ResolverSettings,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            region_header: "cf-ipcountry".to_string(),
            redirect_status: 302,
            resolver: ResolverSettings::default(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<RedirectResolver>,
    pub link_events: Arc<LinkEventService>,
    pub auth_service: Arc<AuthService>,
    pub links: Arc<dyn LinkRepository>,
    pub evaluations: Arc<dyn EvaluationRepository>,
    pub aggregates: Arc<dyn ClickAggregateRepository>,
    pub aggregators: Arc<AggregatorRegistry>,
    pub queue: EvaluationQueue,
    pub cache: Arc<dyn CacheService>,
    pub settings: Arc<RequestSettings>,
}

impl AppState {
    pub fn new(
        repositories: &Repositories,
        cache: Arc<dyn CacheService>,
        queue: EvaluationQueue,
        aggregators: Arc<AggregatorRegistry>,
        auth_service: AuthService,
        settings: RequestSettings,
    ) -> Self {
        let resolver = RedirectResolver::new(
            repositories,
            cache.clone(),
            aggregators.clone(),
            settings.resolver.clone(),
        );
        let job_queue: Arc<dyn JobQueue> = Arc::new(queue.clone());
        let link_events = LinkEventService::new(repositories, cache.clone(), job_queue);

        Self {
            resolver: Arc::new(resolver),
            link_events: Arc::new(link_events),
            auth_service: Arc::new(auth_service),
            links: repositories.links.clone(),
            evaluations: repositories.evaluations.clone(),
            aggregates: repositories.aggregates.clone(),
            aggregators,
            queue,
            cache,
            settings: Arc::new(settings),
        }
    }
}
