//! FeatherProxy: a configurable reverse HTTP(S) proxy with a live control
//! plane, built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!  Client Request        ┌──────────────────────────────────────────────┐
//!  ─────────────────────▶│ proxy (one listener per source server)       │
//!                        │   debug hook → acl → route lookup →          │
//!                        │   source auth → target auth → rewrite →      │
//!                        │   upstream proxy → stat emission             │
//!                        └───────┬──────────────────────┬───────────────┘
//!                                │ reads                │ fire-and-forget
//!                                ▼                      ▼
//!                        ┌───────────────┐      ┌───────────────┐
//!                        │ cache ◀─▶ store│      │ stats sink    │
//!                        │ (read-through, │      │ (batch worker │
//!                        │  TTL, prefix   │      │  + vacuum)    │
//!                        │  invalidation) │      └───────┬───────┘
//!                        └───────▲───────┘              │ bulk insert
//!                                │ mutations + reload   ▼
//!  Operator ────────────▶┌───────┴──────────────────────────────────────┐
//!                        │ admin (management API) + lifecycle (reload   │
//!                        │ coordinator, graceful shutdown)              │
//!                        └──────────────────────────────────────────────┘
//! ```
//!
//! Configuration lives in a SQL store (sqlite or postgres) fronted by a
//! TTL cache; upstream credentials are AES-256-GCM encrypted at rest and
//! decrypted only on the proxy path.

pub mod admin;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod lifecycle;
pub mod model;
pub mod observability;
pub mod proxy;
pub mod stats;
pub mod store;

pub use lifecycle::Shutdown;
pub use proxy::ProxyService;
pub use store::Store;
