//! Short code lookup cache for the redirect path.
//!
//! [`CacheService`] is implemented by [`RedisCache`] when `REDIS_URL` is
//! configured and by [`NullCache`] otherwise.

mod null_cache;
mod redis_cache;
mod service;

pub use null_cache::NullCache;
pub use redis_cache::RedisCache;
pub use service::{CacheError, CacheResult, CacheService};
