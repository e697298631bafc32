//! Repository trait for per-link geographic routing rules.

use crate::domain::entities::GeoRule;
use crate::error::AppError;
use async_trait::async_trait;

/// Storage of [`GeoRule`]s.
///
/// # Implementations
///
/// - [`crate::infrastructure::persistence::PgGeoRuleRepository`] - PostgreSQL implementation
/// - [`crate::infrastructure::memory::MemoryGeoRuleRepository`] - In-process implementation
/// - Test mocks available with `cfg(test)`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GeoRuleRepository: Send + Sync {
    /// Returns the rules of a link ordered by priority ascending.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn find_by_link_id(&self, link_id: i64) -> Result<Vec<GeoRule>, AppError>;

    /// Returns the ids of links with at least one rule targeting `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn find_link_ids_by_destination(&self, destination: &str) -> Result<Vec<i64>, AppError>;

    /// Replaces the whole rule set of a link.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on storage errors.
    async fn replace_for_link(&self, link_id: i64, rules: Vec<GeoRule>) -> Result<(), AppError>;
}
