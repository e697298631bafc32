//! Repository trait for flushed click aggregates.

use crate::domain::entities::ClickAggregate;
use crate::error::AppError;
use async_trait::async_trait;

/// Storage of [`ClickAggregate`]s keyed by `(link_id, bucket_start_ms)`.
///
/// # Implementations
///
/// - [`crate::infrastructure::persistence::PgClickAggregateRepository`] - PostgreSQL implementation
/// - [`crate::infrastructure::memory::MemoryClickAggregateRepository`] - In-process implementation
/// - Test mocks available with `cfg(test)`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClickAggregateRepository: Send + Sync {
    /// Adds the counters of a flushed bucket segment to the stored aggregate.
    ///
    /// A bucket flushed early and reopened, or owned by a respawned aggregator,
    /// produces several segments for the same key; they are summed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn merge(&self, aggregate: &ClickAggregate) -> Result<(), AppError>;

    /// Returns the stored aggregate of one bucket.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn get(
        &self,
        link_id: i64,
        bucket_start_ms: i64,
    ) -> Result<Option<ClickAggregate>, AppError>;
}
