//! Reverse DNS for hostname ACL entries.
//!
//! Hostnames are lowercased with the trailing dot stripped. The caching
//! wrapper shares the config cache and TTL, storing the JSON-encoded name
//! list under `dns:<ip>`; an undecodable cached value triggers a fresh
//! lookup.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

use crate::cache::Cache;
use crate::store::keys;

#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("reverse lookup: {0}")]
    Lookup(String),
}

/// Reverse DNS lookups for client IPs. Implementations must be safe for
/// concurrent use and may return cached results.
#[async_trait]
pub trait HostnameResolver: Send + Sync {
    /// The hostnames associated with `ip`, lowercased, without trailing dots.
    async fn reverse_lookup(&self, ip: IpAddr) -> Result<Vec<String>, ResolverError>;
}

/// PTR lookups against the system resolver configuration.
pub struct PtrResolver {
    inner: TokioAsyncResolver,
}

impl PtrResolver {
    /// Uses `/etc/resolv.conf` where available, defaults otherwise.
    pub fn from_system() -> Self {
        let inner = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "system resolver config unavailable, using defaults");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { inner }
    }
}

#[async_trait]
impl HostnameResolver for PtrResolver {
    async fn reverse_lookup(&self, ip: IpAddr) -> Result<Vec<String>, ResolverError> {
        let response = self
            .inner
            .reverse_lookup(ip)
            .await
            .map_err(|e| ResolverError::Lookup(e.to_string()))?;
        let hostnames = response
            .iter()
            .map(|name| {
                name.to_utf8()
                    .trim()
                    .trim_end_matches('.')
                    .to_ascii_lowercase()
            })
            .filter(|name| !name.is_empty())
            .collect();
        Ok(hostnames)
    }
}

/// Caches another resolver's results in the shared config cache.
pub struct CachingResolver {
    inner: Arc<dyn HostnameResolver>,
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl CachingResolver {
    pub fn new(inner: Arc<dyn HostnameResolver>, cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { inner, cache, ttl }
    }
}

#[async_trait]
impl HostnameResolver for CachingResolver {
    async fn reverse_lookup(&self, ip: IpAddr) -> Result<Vec<String>, ResolverError> {
        let key = keys::dns(&ip.to_string());
        if let Some(bytes) = self.cache.get(&key) {
            if let Ok(hostnames) = serde_json::from_slice::<Vec<String>>(&bytes) {
                return Ok(hostnames);
            }
            // Invalid cached JSON falls through to a fresh lookup.
        }
        let hostnames = self.inner.reverse_lookup(ip).await?;
        if let Ok(bytes) = serde_json::to_vec(&hostnames) {
            self.cache.set(&key, &bytes, self.ttl);
        }
        Ok(hostnames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Memory;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        calls: AtomicUsize,
        names: Vec<String>,
    }

    #[async_trait]
    impl HostnameResolver for CountingResolver {
        async fn reverse_lookup(&self, _ip: IpAddr) -> Result<Vec<String>, ResolverError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.names.clone())
        }
    }

    #[tokio::test]
    async fn caches_lookup_results() {
        let counting = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
            names: vec!["host.internal.example".into()],
        });
        let cache: Arc<dyn Cache> = Arc::new(Memory::new(Duration::from_secs(60)));
        let resolver = CachingResolver::new(counting.clone(), cache, Duration::from_secs(60));

        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let first = resolver.reverse_lookup(ip).await.unwrap();
        let second = resolver.reverse_lookup(ip).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_cached_json_re_resolves() {
        let counting = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
            names: vec!["host.internal.example".into()],
        });
        let cache: Arc<dyn Cache> = Arc::new(Memory::new(Duration::from_secs(60)));
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        cache.set(&keys::dns("10.0.0.1"), b"not json", Duration::from_secs(60));

        let resolver = CachingResolver::new(counting.clone(), cache, Duration::from_secs(60));
        let names = resolver.reverse_lookup(ip).await.unwrap();
        assert_eq!(names, vec!["host.internal.example".to_string()]);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }
}
