//! Redis-backed link cache.

use super::service::{CacheError, CacheResult, CacheService};
use crate::domain::entities::Link;
use async_trait::async_trait;
use redis::{AsyncCommands, Client, RedisError, aio::ConnectionManager};
use tracing::{debug, info, warn};

/// Bumped whenever the JSON shape of [`Link`] changes, so entries written by
/// an older build miss instead of failing to decode.
const KEY_PREFIX: &str = "link:v1:";

/// Redis cache of short code to [`Link`].
///
/// Entries are JSON. Every operation is fail-open: Redis errors are logged
/// and reported to the caller as a miss or a no-op.
pub struct RedisCache {
    conn: ConnectionManager,
    default_ttl: u64,
}

impl RedisCache {
    /// Connects and verifies the connection with a PING.
    ///
    /// `default_ttl_seconds` applies when [`CacheService::set_link`] gets
    /// `None`; it comes from `CACHE_TTL_SECONDS`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ConnectionError`] if the URL is invalid, the
    /// connection cannot be established, or the PING fails.
    pub async fn connect(redis_url: &str, default_ttl_seconds: u64) -> CacheResult<Self> {
        info!("Connecting to Redis");

        let client = Client::open(redis_url).map_err(connection_error)?;
        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(connection_error)?;
        conn.ping::<()>().await.map_err(connection_error)?;

        info!("Connected to Redis");
        Ok(Self {
            conn,
            default_ttl: default_ttl_seconds,
        })
    }

    fn key(short_code: &str) -> String {
        format!("{KEY_PREFIX}{short_code}")
    }
}

fn connection_error(e: RedisError) -> CacheError {
    CacheError::ConnectionError(e.to_string())
}

#[async_trait]
impl CacheService for RedisCache {
    async fn get_link(&self, short_code: &str) -> CacheResult<Option<Link>> {
        let mut conn = self.conn.clone();

        let raw: Option<String> = match conn.get(Self::key(short_code)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(short_code, error = %e, "Redis GET failed");
                return Ok(None);
            }
        };

        let Some(raw) = raw else {
            debug!(short_code, "Link cache miss");
            return Ok(None);
        };

        match serde_json::from_str::<Link>(&raw) {
            Ok(link) => {
                debug!(short_code, "Link cache hit");
                Ok(Some(link))
            }
            Err(e) => {
                warn!(short_code, error = %e, "Discarding undecodable link cache entry");
                Ok(None)
            }
        }
    }

    async fn set_link(&self, link: &Link, ttl: Option<u64>) -> CacheResult<()> {
        let payload = serde_json::to_string(link)
            .map_err(|e| CacheError::OperationError(format!("Failed to encode link: {}", e)))?;
        let ttl_seconds = ttl.unwrap_or(self.default_ttl);

        let mut conn = self.conn.clone();
        if let Err(e) = conn
            .set_ex::<_, _, ()>(Self::key(&link.short_code), payload, ttl_seconds)
            .await
        {
            warn!(short_code = %link.short_code, error = %e, "Redis SET failed");
        }
        Ok(())
    }

    async fn invalidate(&self, short_code: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        match conn.del::<_, i32>(Self::key(short_code)).await {
            Ok(removed) if removed > 0 => debug!(short_code, "Link cache entry invalidated"),
            Ok(_) => {}
            Err(e) => warn!(short_code, error = %e, "Redis DEL failed"),
        }
        Ok(())
    }

    async fn health_check(&self) -> bool {
        let mut conn = self.conn.clone();
        conn.ping::<()>().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_versioned() {
        assert_eq!(RedisCache::key("promo"), "link:v1:promo");
    }
}
