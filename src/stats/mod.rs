//! Asynchronous stats pipeline.
//!
//! # Data Flow
//! ```text
//! proxy handler → Recorder::record (non-blocking try_send, drop when full)
//!     → bounded channel
//!     → worker (batch on size or interval, bulk insert, at-most-once)
//!     → store
//!
//! vacuum ticker → delete stats older than the retention window
//! ```
//!
//! # Design Decisions
//! - `record` never blocks and never fails: a full queue drops the stat and
//!   counts it
//! - Insert failures are logged and the batch is not retried; stats are
//!   advisory
//! - Shutdown drains the queue best-effort, flushes once more, and exits

mod service;

pub use service::{Config, Service, Sink};

use crate::model::ProxyStat;
use crate::store::StoreError;

/// The narrow capability handed to the proxy handler: hand off one stat.
/// Implementations must not block the caller.
pub trait Recorder: Send + Sync {
    fn record(&self, stat: ProxyStat);
}

/// What the pipeline needs from persistence.
#[async_trait::async_trait]
pub trait StatsStore: Send + Sync {
    async fn insert_proxy_stats(&self, stats: &[ProxyStat]) -> Result<(), StoreError>;
    async fn delete_stats_older_than(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> Result<u64, StoreError>;
}

#[async_trait::async_trait]
impl StatsStore for crate::store::Store {
    async fn insert_proxy_stats(&self, stats: &[ProxyStat]) -> Result<(), StoreError> {
        crate::store::Store::insert_proxy_stats(self, stats).await
    }

    async fn delete_stats_older_than(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> Result<u64, StoreError> {
        crate::store::Store::delete_stats_older_than(self, cutoff).await
    }
}
