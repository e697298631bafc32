use super::service::{CacheResult, CacheService};
use crate::domain::entities::Link;
use async_trait::async_trait;

/// Cache that never stores anything.
///
/// Used when Redis is not configured or unreachable at startup; every
/// lookup misses, so the resolver always reads the link repository.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCache;

impl NullCache {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CacheService for NullCache {
    async fn get_link(&self, _short_code: &str) -> CacheResult<Option<Link>> {
        Ok(None)
    }

    async fn set_link(&self, _link: &Link, _ttl: Option<u64>) -> CacheResult<()> {
        Ok(())
    }

    async fn invalidate(&self, _short_code: &str) -> CacheResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }
}
