//! Repository trait for destination evaluation records.

use crate::domain::entities::EvaluationRecord;
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Storage of the latest [`EvaluationRecord`] per destination URL.
///
/// Lookups are keyed by `destination_url`. A record is removed only once no
/// link references its destination any more.
///
/// # Implementations
///
/// - [`crate::infrastructure::persistence::PgEvaluationRepository`] - PostgreSQL implementation
/// - [`crate::infrastructure::memory::MemoryEvaluationRepository`] - In-process implementation
/// - Test mocks available with `cfg(test)`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EvaluationRepository: Send + Sync {
    /// Returns the record for a destination, if any evaluation has completed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn get(&self, destination_url: &str) -> Result<Option<EvaluationRecord>, AppError>;

    /// Upserts a record with last-write-wins on `last_checked_at`.
    ///
    /// A write older than the stored record is ignored. Returns the record
    /// stored after the call.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn upsert(&self, record: EvaluationRecord) -> Result<EvaluationRecord, AppError>;

    /// Removes the record of a destination. Returns `Ok(false)` if there was none.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn delete(&self, destination_url: &str) -> Result<bool, AppError>;

    /// Lists records last checked before `checked_before`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn list_stale(
        &self,
        checked_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<EvaluationRecord>, AppError>;
}
