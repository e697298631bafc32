//! In-process repository implementations backed by `dashmap`.
//!
//! Used by tests and by `STORAGE=memory` deployments that run without
//! PostgreSQL. State is lost on restart, including workflow checkpoints.

mod aggregate_store;
mod evaluation_store;
mod link_store;

pub use aggregate_store::MemoryClickAggregateRepository;
pub use evaluation_store::{MemoryCheckpointRepository, MemoryEvaluationRepository};
pub use link_store::{MemoryGeoRuleRepository, MemoryLinkRepository};
