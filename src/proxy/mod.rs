//! Data-plane subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (per-source listener)
//!     → debug.rs (optional payload peek)
//!     → acl.rs (allow/deny on client IP, resolver.rs for hostname entries)
//!     → route lookup (store, via the config cache)
//!     → source auth check, target auth injection
//!     → URL rewrite + forwarded headers
//!     → upstream proxy (shared hyper client)
//!     → stat handed to the stats sink
//! ```
//!
//! # Design Decisions
//! - One listener per source server; a failing listener is skipped with a
//!   warning and never takes the fleet down
//! - The handler owns the whole dispatch sequence; nothing here retries,
//!   the next request re-reads configuration through the cache

pub mod acl;
pub mod debug;
pub mod resolver;
pub mod service;

pub use resolver::{CachingResolver, HostnameResolver, PtrResolver};
pub use service::ProxyService;
