//! Persistence subsystem.
//!
//! # Data Flow
//! ```text
//! reads:
//!     caller → cached(key, loader)
//!         → cache hit: decode and return
//!         → miss: SQL query → encode → cache set (TTL) → return
//!
//! mutations:
//!     caller → SQL statement → on success: cache delete/delete_by_prefix
//! ```
//!
//! # Design Decisions
//! - One SQL dialect for both backends: UUIDs as TEXT, timestamps as epoch
//!   milliseconds, `$N` placeholders, ACL lists as JSON text columns
//! - `StoreError::NotFound` is a dedicated kind so the proxy can distinguish
//!   a missing route (404) from a failing database (500)
//! - Decrypted-token reads and stats writes bypass the cache entirely

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::AnyPool;

use crate::cache::{Cache, NoOp, DEFAULT_TTL};
use crate::crypto::TokenError;

pub mod authentications;
pub mod keys;
pub mod options;
pub mod route_auth;
pub mod routes;
pub mod source_servers;
pub mod stats;
pub mod target_servers;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The queried record does not exist.
    #[error("not found")]
    NotFound,

    /// A route links a source and target server with incompatible protocols.
    #[error("source and target server protocols are incompatible")]
    ProtocolMismatch,

    /// A credential create was attempted without a token.
    #[error("token is required")]
    TokenRequired,

    /// Credential encryption/decryption failed (key missing, record corrupt).
    #[error(transparent)]
    Token(#[from] TokenError),

    /// `DB_DRIVER`/`DB_DSN` missing or unsupported.
    #[error("database configuration: {0}")]
    Config(String),

    /// A stored value failed to decode (e.g. malformed UUID column).
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            other => StoreError::Database(other),
        }
    }
}

/// Statements run at startup. Portable across sqlite and postgres.
const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS source_servers (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        protocol TEXT NOT NULL,
        host TEXT NOT NULL,
        port BIGINT NOT NULL,
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS server_options (
        source_id TEXT PRIMARY KEY,
        tls_cert_path TEXT NOT NULL,
        tls_key_path TEXT NOT NULL,
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS acl_options (
        source_id TEXT PRIMARY KEY,
        mode TEXT NOT NULL,
        client_ip_header TEXT NOT NULL,
        allow_list TEXT NOT NULL,
        deny_list TEXT NOT NULL,
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS target_servers (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        protocol TEXT NOT NULL,
        host TEXT NOT NULL,
        port BIGINT NOT NULL,
        base_path TEXT NOT NULL,
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS routes (
        id TEXT PRIMARY KEY,
        source_id TEXT NOT NULL,
        target_id TEXT NOT NULL,
        method TEXT NOT NULL,
        source_path TEXT NOT NULL,
        target_path TEXT NOT NULL,
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_routes_source_method_path
        ON routes (source_id, method, source_path)",
    "CREATE TABLE IF NOT EXISTS authentications (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        token_type TEXT NOT NULL,
        token_ciphertext TEXT NOT NULL,
        token_nonce TEXT NOT NULL,
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS route_source_auths (
        route_id TEXT NOT NULL,
        auth_id TEXT NOT NULL,
        position BIGINT NOT NULL,
        PRIMARY KEY (route_id, auth_id)
    )",
    "CREATE TABLE IF NOT EXISTS route_target_auths (
        route_id TEXT PRIMARY KEY,
        auth_id TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS proxy_stats (
        id TEXT PRIMARY KEY,
        timestamp BIGINT NOT NULL,
        source_id TEXT NOT NULL,
        route_id TEXT NOT NULL,
        target_id TEXT NOT NULL,
        method TEXT NOT NULL,
        path TEXT NOT NULL,
        status_code BIGINT,
        duration_ms BIGINT,
        client_ip TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_proxy_stats_timestamp ON proxy_stats (timestamp)",
];

/// The configuration store: a connection pool plus the read-through cache.
///
/// Cloning is cheap; all clones share the pool and cache.
#[derive(Clone)]
pub struct Store {
    pool: AnyPool,
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl Store {
    /// Opens the store from `DB_DRIVER` and `DB_DSN`.
    pub async fn connect_from_env(
        cache: Option<Arc<dyn Cache>>,
        ttl: Duration,
    ) -> Result<Self, StoreError> {
        let driver = std::env::var("DB_DRIVER").unwrap_or_default();
        let dsn = std::env::var("DB_DSN").unwrap_or_default();
        if driver.is_empty() || dsn.is_empty() {
            return Err(StoreError::Config(
                "DB_DRIVER and DB_DSN must be set".into(),
            ));
        }
        match driver.as_str() {
            "postgres" | "postgresql" | "sqlite" => {}
            other => {
                return Err(StoreError::Config(format!(
                    "unsupported DB_DRIVER {other:?} (use postgres or sqlite)"
                )))
            }
        }
        Self::connect(&dsn, cache, ttl).await
    }

    /// Opens the store against the given DSN (`sqlite:...` or `postgres:...`).
    pub async fn connect(
        dsn: &str,
        cache: Option<Arc<dyn Cache>>,
        ttl: Duration,
    ) -> Result<Self, StoreError> {
        static INSTALL_DRIVERS: std::sync::Once = std::sync::Once::new();
        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);
        let pool = AnyPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(5))
            .connect(dsn)
            .await?;
        Ok(Self {
            pool,
            cache: cache.unwrap_or_else(|| Arc::new(NoOp)),
            ttl: if ttl > Duration::ZERO { ttl } else { DEFAULT_TTL },
        })
    }

    /// Creates all tables and indexes. Idempotent.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub(crate) fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Read-through helper: cache hit decodes and returns; a miss runs the
    /// loader, caches a successful result with the store TTL, and returns it.
    /// Loader errors are never cached; undecodable cached bytes count as a
    /// miss and are reloaded.
    pub(crate) async fn cached<T, F, Fut>(&self, key: &str, load: F) -> Result<T, StoreError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        if let Some(bytes) = self.cache.get(key) {
            if let Ok(value) = serde_json::from_slice(&bytes) {
                return Ok(value);
            }
        }
        let value = load().await?;
        if let Ok(bytes) = serde_json::to_vec(&value) {
            self.cache.set(key, &bytes, self.ttl);
        }
        Ok(value)
    }

    /// Drops the given scalar keys and key families after a mutation.
    pub(crate) fn invalidate(&self, keys: &[String], prefixes: &[&str]) {
        for key in keys {
            self.cache.delete(key);
        }
        for prefix in prefixes {
            self.cache.delete_by_prefix(prefix);
        }
    }
}

pub(crate) fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

pub(crate) fn parse_uuid(row: &AnyRow, column: &str) -> Result<uuid::Uuid, StoreError> {
    use sqlx::Row;
    let raw: String = row.try_get(column)?;
    uuid::Uuid::parse_str(&raw)
        .map_err(|e| StoreError::Corrupt(format!("uuid in column {column}: {e}")))
}
