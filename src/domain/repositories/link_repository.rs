//! Repository trait for link reference data.

use crate::domain::entities::Link;
use crate::error::AppError;
use async_trait::async_trait;

/// Read access to links, plus the mirror writes driven by link events.
///
/// # Implementations
///
/// - [`crate::infrastructure::persistence::PgLinkRepository`] - PostgreSQL implementation
/// - [`crate::infrastructure::memory::MemoryLinkRepository`] - In-process implementation
/// - Test mocks available with `cfg(test)`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LinkRepository: Send + Sync {
    /// Finds a link by its short code, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn find_by_code(&self, short_code: &str) -> Result<Option<Link>, AppError>;

    /// Finds a link by id.
    ///
    /// Used by the evaluation workflow to confirm a job is still valid before
    /// persisting its result.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn find_by_id(&self, id: i64) -> Result<Option<Link>, AppError>;

    /// Returns the ids of links whose default destination is `destination_url`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn find_ids_by_default_destination(
        &self,
        destination_url: &str,
    ) -> Result<Vec<i64>, AppError>;

    /// Inserts or replaces a link.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Conflict`] if the short code belongs to another link.
    /// Returns [`AppError::Internal`] on storage errors.
    async fn upsert(&self, link: Link) -> Result<Link, AppError>;

    /// Removes a link. Returns `Ok(false)` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn delete(&self, id: i64) -> Result<bool, AppError>;

    /// Checks that the backing store answers.
    async fn health_check(&self) -> Result<(), AppError>;
}
