//! Repository trait definitions for the domain layer.
//!
//! This module defines the repository interfaces (traits) that abstract data access
//! operations following the Repository pattern. These traits are implemented by
//! concrete repositories in the infrastructure layer.
//!
//! # Architecture
//!
//! - Traits define the contract for data operations
//! - PostgreSQL implementations live in `crate::infrastructure::persistence`
//! - In-process implementations live in `crate::infrastructure::memory`
//! - Mock implementations are auto-generated via `mockall` for testing
//!
//! # Available Repositories
//!
//! - [`LinkRepository`] - Link reference data
//! - [`GeoRuleRepository`] - Per-link routing rules
//! - [`EvaluationRepository`] - Latest verdict per destination
//! - [`ClickAggregateRepository`] - Flushed click buckets
//! - [`CheckpointRepository`] - Durable workflow progress

pub mod checkpoint_repository;
pub mod click_aggregate_repository;
pub mod evaluation_repository;
pub mod geo_rule_repository;
pub mod link_repository;

pub use checkpoint_repository::CheckpointRepository;
pub use click_aggregate_repository::ClickAggregateRepository;
pub use evaluation_repository::EvaluationRepository;
pub use geo_rule_repository::GeoRuleRepository;
pub use link_repository::LinkRepository;

#[cfg(test)]
pub use checkpoint_repository::MockCheckpointRepository;
#[cfg(test)]
pub use click_aggregate_repository::MockClickAggregateRepository;
#[cfg(test)]
pub use evaluation_repository::MockEvaluationRepository;
#[cfg(test)]
pub use geo_rule_repository::MockGeoRuleRepository;
#[cfg(test)]
pub use link_repository::MockLinkRepository;
