//! Infrastructure layer for external integrations.
//!
//! This layer implements interfaces defined by the domain layer, providing
//! concrete implementations for data persistence and caching.
//!
//! # Modules
//!
//! - [`cache`] - Link lookup cache (Redis and no-op implementations)
//! - [`memory`] - In-process repositories for tests and database-less runs
//! - [`persistence`] - PostgreSQL repository implementations

pub mod cache;
pub mod memory;
pub mod persistence;

use sqlx::PgPool;
use std::sync::Arc;

use crate::domain::repositories::{
    CheckpointRepository, ClickAggregateRepository, EvaluationRepository, GeoRuleRepository,
    LinkRepository,
};

/// One handle per repository trait, shared by services and background tasks.
#[derive(Clone)]
pub struct Repositories {
    pub links: Arc<dyn LinkRepository>,
    pub geo_rules: Arc<dyn GeoRuleRepository>,
    pub evaluations: Arc<dyn EvaluationRepository>,
    pub checkpoints: Arc<dyn CheckpointRepository>,
    pub aggregates: Arc<dyn ClickAggregateRepository>,
}

impl Repositories {
    pub fn postgres(pool: Arc<PgPool>) -> Self {
        Self {
            links: Arc::new(persistence::PgLinkRepository::new(pool.clone())),
            geo_rules: Arc::new(persistence::PgGeoRuleRepository::new(pool.clone())),
            evaluations: Arc::new(persistence::PgEvaluationRepository::new(pool.clone())),
            checkpoints: Arc::new(persistence::PgCheckpointRepository::new(pool.clone())),
            aggregates: Arc::new(persistence::PgClickAggregateRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            links: Arc::new(memory::MemoryLinkRepository::new()),
            geo_rules: Arc::new(memory::MemoryGeoRuleRepository::new()),
            evaluations: Arc::new(memory::MemoryEvaluationRepository::new()),
            checkpoints: Arc::new(memory::MemoryCheckpointRepository::new()),
            aggregates: Arc::new(memory::MemoryClickAggregateRepository::new()),
        }
    }
}
