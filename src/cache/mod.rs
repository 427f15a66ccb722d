//! Configuration cache subsystem.
//!
//! # Data Flow
//! ```text
//! store read
//!     → Cache::get (hit: decode and return)
//!     → miss: load from the database
//!     → Cache::set with TTL
//!
//! store mutation
//!     → Cache::delete (scalar keys) + Cache::delete_by_prefix (families)
//! ```
//!
//! # Design Decisions
//! - Values are opaque bytes; callers use serde_json for schema types
//! - Implementations never fail: a broken cache degrades to misses, it does
//!   not surface errors on the request path
//! - Decrypted tokens and stats writes are never cached

use std::sync::Arc;
use std::time::Duration;

pub mod memory;
pub mod noop;
pub mod redis;

pub use memory::Memory;
pub use noop::NoOp;
pub use redis::Redis;

/// Default cache TTL when `CACHE_TTL` is not set.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// The abstract caching capability. Implementations may be in-memory, an
/// external service, or a no-op. Call `close()` when the cache is no longer
/// needed so background tasks can exit.
pub trait Cache: Send + Sync {
    /// Returns the value for `key` if present and not expired.
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Stores `value` under `key` for `ttl`.
    fn set(&self, key: &str, value: &[u8], ttl: Duration);

    /// Removes `key`.
    fn delete(&self, key: &str);

    /// Removes every key that starts with `prefix`. Used for bulk
    /// invalidation (e.g. `"route:"`).
    fn delete_by_prefix(&self, prefix: &str);

    /// Stops background work. Subsequent calls are no-ops.
    fn close(&self);
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("unknown CACHING_STRATEGY {0:?} (use none, memory, or redis)")]
    UnknownStrategy(String),
}

/// Builds a cache from `CACHING_STRATEGY` and `CACHE_TTL`.
///
/// `none` or empty returns `None` so callers can skip wrapping entirely.
/// Invalid TTLs fall back to [`DEFAULT_TTL`].
pub fn from_env() -> Result<(Option<Arc<dyn Cache>>, Duration), CacheError> {
    let strategy = std::env::var("CACHING_STRATEGY")
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let ttl = crate::config::env_duration("CACHE_TTL", DEFAULT_TTL);

    match strategy.as_str() {
        "" | "none" => Ok((None, ttl)),
        "memory" => Ok((Some(Arc::new(Memory::new(ttl))), ttl)),
        // Stub: behaves like a no-op until a real client is wired from REDIS_* env.
        "redis" => Ok((Some(Arc::new(Redis::default())), ttl)),
        other => Err(CacheError::UnknownStrategy(other.to_string())),
    }
}
