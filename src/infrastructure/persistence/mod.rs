//! PostgreSQL repository implementations.
//!
//! Concrete implementations of domain repository traits using SQLx runtime
//! queries bound with typed parameters.
//!
//! # Repositories
//!
//! - [`PgLinkRepository`] / [`PgGeoRuleRepository`] - Link reference data and routing rules
//! - [`PgEvaluationRepository`] - Latest verdict per destination
//! - [`PgCheckpointRepository`] - Durable workflow progress
//! - [`PgClickAggregateRepository`] - Flushed click buckets

pub mod pg_click_aggregate_repository;
pub mod pg_evaluation_repository;
pub mod pg_link_repository;

pub use pg_click_aggregate_repository::PgClickAggregateRepository;
pub use pg_evaluation_repository::{PgCheckpointRepository, PgEvaluationRepository};
pub use pg_link_repository::{PgGeoRuleRepository, PgLinkRepository};
