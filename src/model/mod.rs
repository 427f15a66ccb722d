//! Domain model types.
//!
//! These are the schema types the rest of the crate works with. Persistence
//! details (columns, soft deletes) stay inside the store; everything above it
//! (proxy, stats, management API) sees only these structs. All types derive
//! Serde traits because they are both the API payloads and the cache encoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A listener endpoint owned by the proxy (the "front door").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceServer {
    pub id: Uuid,
    pub name: String,
    /// "http" or "https".
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An upstream backend that matched requests are forwarded to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetServer {
    pub id: Uuid,
    pub name: String,
    pub protocol: String,
    pub host: String,
    /// 0 means "no explicit port" (scheme default).
    pub port: u16,
    pub base_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Maps `(source, method, source_path)` to `(target, target_path)`.
///
/// The linked source and target protocols must be compatible; see
/// [`protocols_compatible`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: Uuid,
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub method: String,
    pub source_path: String,
    pub target_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An authentication credential.
///
/// `token` carries the plaintext only transiently: as API input on
/// create/update and when decrypted for proxy use. The stored form is AEAD
/// ciphertext plus a per-record nonce. `token_masked` is what API reads see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authentication {
    pub id: Uuid,
    pub name: String,
    /// "bearer" formats the header as `Bearer <token>`; anything else is sent raw.
    pub token_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token_masked: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// TLS options attached 1:1 to an HTTPS source server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerOptions {
    pub source_id: Uuid,
    pub tls_cert_path: String,
    pub tls_key_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// ACL mode for a source server.
pub mod acl_mode {
    pub const OFF: &str = "off";
    pub const ALLOW_ONLY: &str = "allow_only";
    pub const DENY_ONLY: &str = "deny_only";
}

/// Per-source-server allow/deny policy on the client IP.
///
/// List entries may be exact IPs, CIDRs, hostnames, or `*.suffix` wildcard
/// hostnames. When `client_ip_header` is set it names the request header the
/// client IP is read from; empty means the remote address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclOptions {
    pub source_id: Uuid,
    pub mode: String,
    pub client_ip_header: String,
    pub allow_list: Vec<String>,
    pub deny_list: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Links a route to one of its allowed client credentials (ordered list).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSourceAuth {
    pub route_id: Uuid,
    pub auth_id: Uuid,
    pub position: i32,
}

/// Links a route to the single credential injected on upstream calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteTargetAuth {
    pub route_id: Uuid,
    pub auth_id: Uuid,
}

/// One proxied request metric. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyStat {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source_id: Uuid,
    pub route_id: Uuid,
    pub target_id: Uuid,
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_ip: String,
}

/// Aggregated counts for the stats summary endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsSummary {
    pub total: i64,
    pub last_24h: i64,
    pub status_2xx: i64,
    pub status_4xx: i64,
    pub status_5xx: i64,
    pub tps_last_minute: i64,
}

/// One row of the by-route aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteCount {
    pub route_id: Uuid,
    pub method: String,
    pub source_path: String,
    pub count: i64,
}

/// One row of the by-caller aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerCount {
    pub client_ip: String,
    pub count: i64,
}

/// One row of the by-source-server or by-target-server aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCount {
    pub server_id: Uuid,
    pub count: i64,
}

/// One time bucket of the TPS aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketCount {
    pub at: DateTime<Utc>,
    pub count: i64,
}

/// Whether a source and target protocol may be linked by a route.
///
/// Equal protocols are always compatible, and `http`/`https` are compatible
/// in either direction (TLS-terminating proxying). Anything else is rejected.
pub fn protocols_compatible(source: &str, target: &str) -> bool {
    if source == target {
        return true;
    }
    matches!(
        (source, target),
        ("http", "https") | ("https", "http")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_compatibility_is_symmetric() {
        assert!(protocols_compatible("http", "http"));
        assert!(protocols_compatible("https", "https"));
        assert!(protocols_compatible("http", "https"));
        assert!(protocols_compatible("https", "http"));
        assert!(!protocols_compatible("http", "grpc"));
        assert!(!protocols_compatible("grpc", "http"));
        assert!(!protocols_compatible("grpc", "grpc2"));
    }
}
