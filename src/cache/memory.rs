//! In-memory cache with per-entry TTL.
//!
//! Expired entries are removed lazily on `get` and by a periodic sweep task
//! that also logs hit/miss/set/delete/evict counters and resets them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::watch;

use super::{Cache, DEFAULT_TTL};

/// Sweep cadence for expired entries and counter logging.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// An in-memory cache with a default TTL.
///
/// Entries live in a concurrent map; the hot path takes only the map's
/// per-shard lock briefly. Call `close()` to stop the sweeper when the cache
/// is no longer needed.
pub struct Memory {
    items: Arc<DashMap<String, Entry>>,
    default_ttl: Duration,
    stop: watch::Sender<bool>,

    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    sets: Arc<AtomicU64>,
    deletes: Arc<AtomicU64>,
    evictions: Arc<AtomicU64>,
}

impl Memory {
    /// Creates an in-memory cache with the given default TTL and spawns the
    /// sweep task. A non-positive TTL falls back to [`DEFAULT_TTL`].
    pub fn new(default_ttl: Duration) -> Self {
        let default_ttl = if default_ttl > Duration::ZERO {
            default_ttl
        } else {
            DEFAULT_TTL
        };
        let (stop, stopped) = watch::channel(false);
        let cache = Self {
            items: Arc::new(DashMap::new()),
            default_ttl,
            stop,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            sets: Arc::new(AtomicU64::new(0)),
            deletes: Arc::new(AtomicU64::new(0)),
            evictions: Arc::new(AtomicU64::new(0)),
        };
        cache.spawn_sweeper(stopped);
        cache
    }

    fn spawn_sweeper(&self, mut stopped: watch::Receiver<bool>) {
        let items = self.items.clone();
        let hits = self.hits.clone();
        let misses = self.misses.clone();
        let sets = self.sets.clone();
        let deletes = self.deletes.clone();
        let evictions = self.evictions.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        let before = items.len();
                        items.retain(|_, entry| entry.expires_at > now);
                        let evicted = before.saturating_sub(items.len()) as u64;
                        evictions.fetch_add(evicted, Ordering::Relaxed);
                        tracing::debug!(
                            hits = hits.swap(0, Ordering::Relaxed),
                            misses = misses.swap(0, Ordering::Relaxed),
                            sets = sets.swap(0, Ordering::Relaxed),
                            deletes = deletes.swap(0, Ordering::Relaxed),
                            evictions = evictions.swap(0, Ordering::Relaxed),
                            entries = items.len(),
                            "cache sweep"
                        );
                    }
                    _ = stopped.changed() => return,
                }
            }
        });
    }
}

impl Cache for Memory {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let hit = match self.items.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => None,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        match hit {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                // Expired: drop it now rather than waiting for the sweeper.
                self.items.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn set(&self, key: &str, value: &[u8], ttl: Duration) {
        let ttl = if ttl > Duration::ZERO {
            ttl
        } else {
            self.default_ttl
        };
        self.items.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    fn delete(&self, key: &str) {
        if self.items.remove(key).is_some() {
            self.deletes.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn delete_by_prefix(&self, prefix: &str) {
        let before = self.items.len();
        self.items.retain(|key, _| !key.starts_with(prefix));
        self.deletes.fetch_add(
            before.saturating_sub(self.items.len()) as u64,
            Ordering::Relaxed,
        );
    }

    fn close(&self) {
        let _ = self.stop.send(true);
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_after_set_within_ttl() {
        let cache = Memory::new(Duration::from_secs(60));
        assert_eq!(cache.get("k"), None);
        cache.set("k", b"v", Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn expired_entries_miss() {
        let cache = Memory::new(Duration::from_secs(60));
        cache.set("k", b"v", Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let cache = Memory::new(Duration::from_secs(60));
        cache.set("k", b"v", Duration::from_secs(60));
        cache.delete("k");
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test]
    async fn delete_by_prefix_spares_others() {
        let cache = Memory::new(Duration::from_secs(60));
        cache.set("route:1", b"a", Duration::from_secs(60));
        cache.set("route:method_path:x", b"b", Duration::from_secs(60));
        cache.set("auth:1", b"c", Duration::from_secs(60));
        cache.delete_by_prefix("route:");
        assert_eq!(cache.get("route:1"), None);
        assert_eq!(cache.get("route:method_path:x"), None);
        assert_eq!(cache.get("auth:1"), Some(b"c".to_vec()));
    }

    #[tokio::test]
    async fn zero_ttl_uses_default() {
        let cache = Memory::new(Duration::from_secs(60));
        cache.set("k", b"v", Duration::ZERO);
        assert_eq!(cache.get("k"), Some(b"v".to_vec()));
    }
}
