//! Cache service trait and error types.

use crate::domain::entities::Link;
use async_trait::async_trait;

/// Errors that can occur during cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache connection error: {0}")]
    ConnectionError(String),
    #[error("Cache operation error: {0}")]
    OperationError(String),
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Trait for caching short code to [`Link`] lookups on the redirect path.
///
/// Implementations must be thread-safe and handle errors gracefully without
/// disrupting the application (cache failures should degrade to repository lookups).
///
/// Only links are cached. Geo rules and evaluation records are read fresh on
/// every resolution so verdict changes take effect immediately.
///
/// # Implementations
///
/// - [`crate::infrastructure::cache::RedisCache`] - Redis-backed cache with TTL support
/// - [`crate::infrastructure::cache::NullCache`] - No-op implementation for disabled caching
#[async_trait]
pub trait CacheService: Send + Sync {
    /// Retrieves a cached link by short code.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(link))` on cache hit
    /// - `Ok(None)` on cache miss or undecodable entry (fail-open behavior)
    async fn get_link(&self, short_code: &str) -> CacheResult<Option<Link>>;

    /// Stores a link with optional TTL.
    ///
    /// # Arguments
    ///
    /// - `link` - The link to cache, keyed by its short code
    /// - `ttl_seconds` - Optional TTL in seconds (implementation-specific default if None)
    async fn set_link(&self, link: &Link, ttl_seconds: Option<u64>) -> CacheResult<()>;

    /// Removes a cached link.
    ///
    /// Called when a link is updated or deleted.
    async fn invalidate(&self, short_code: &str) -> CacheResult<()>;

    /// Checks if the cache backend is healthy.
    ///
    /// Used by health check endpoints to report cache status.
    async fn health_check(&self) -> bool;
}
