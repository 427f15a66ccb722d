//! Redis cache stub.
//!
//! Conforms to the [`Cache`](super::Cache) contract but performs no caching
//! yet; every `get` misses and writes are ignored, so enabling the strategy
//! is safe before a real client is wired up from `REDIS_*` settings.

use std::time::Duration;

use super::Cache;

/// Placeholder for an external Redis-backed cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct Redis;

impl Cache for Redis {
    fn get(&self, _key: &str) -> Option<Vec<u8>> {
        None
    }

    fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) {}

    fn delete(&self, _key: &str) {}

    fn delete_by_prefix(&self, _prefix: &str) {}

    fn close(&self) {}
}
