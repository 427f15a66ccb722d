//! Client IP access control.
//!
//! # Responsibilities
//! - Extract the client IP from the configured header or the remote address
//! - Match it against allow/deny lists of IPs, CIDRs, and hostnames
//! - Decide deny/allow per the configured mode
//!
//! # Design Decisions
//! - Header extraction: trim, first comma-separated token, strip a port
//! - IP and CIDR entries are evaluated without DNS; hostname entries trigger
//!   one reverse lookup per request (cached by the resolver)
//! - Resolver failures are no-matches, never a deny or allow on their own

use std::net::IpAddr;

use axum::http::HeaderMap;

use crate::model::{acl_mode, AclOptions};
use crate::proxy::resolver::HostnameResolver;

/// Strips a `:port` suffix if one is present, handling bracketed IPv6.
fn strip_port(s: &str) -> &str {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
    }
    if s.parse::<IpAddr>().is_ok() {
        return s;
    }
    match s.rfind(':') {
        // A single colon means host:port; more than one is bare IPv6.
        Some(idx) if s[..idx].find(':').is_none() => &s[..idx],
        _ => s,
    }
}

/// The client IP for ACL checks and stats.
///
/// When `client_ip_header` is configured, its value is trimmed, the first
/// comma-separated segment is taken, and any port is stripped. Otherwise the
/// host portion of the remote address is used.
pub fn client_ip(headers: &HeaderMap, remote_addr: &str, opts: Option<&AclOptions>) -> Option<IpAddr> {
    if let Some(opts) = opts {
        if !opts.client_ip_header.is_empty() {
            let value = headers
                .get(&opts.client_ip_header)
                .and_then(|v| v.to_str().ok())?;
            let first = value.trim().split(',').next()?.trim();
            return strip_port(first).parse().ok();
        }
    }
    strip_port(remote_addr).parse().ok()
}

/// The client IP as a string for stats, falling back to the host portion of
/// the remote address when no IP parses.
pub fn client_ip_string(headers: &HeaderMap, remote_addr: &str, opts: Option<&AclOptions>) -> String {
    match client_ip(headers, remote_addr, opts) {
        Some(ip) => ip.to_string(),
        None => strip_port(remote_addr).to_string(),
    }
}

fn cidr_contains(entry: &str, ip: IpAddr) -> bool {
    let Some((net, bits)) = entry.split_once('/') else {
        return false;
    };
    let Ok(bits) = bits.trim().parse::<u32>() else {
        return false;
    };
    let Ok(net) = net.trim().parse::<IpAddr>() else {
        return false;
    };
    match (net, ip) {
        (IpAddr::V4(net), IpAddr::V4(ip)) if bits <= 32 => {
            let mask = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
            (u32::from(net) & mask) == (u32::from(ip) & mask)
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) if bits <= 128 => {
            let mask = if bits == 0 { 0 } else { u128::MAX << (128 - bits) };
            (u128::from(net) & mask) == (u128::from(ip) & mask)
        }
        _ => false,
    }
}

/// `*.suffix` matches any hostname ending in `.suffix` with at least one
/// label before it; other entries match case-insensitively exact.
fn hostname_matches(entry: &str, hostname: &str) -> bool {
    if let Some(suffix) = entry.strip_prefix("*.") {
        if suffix.is_empty() {
            return false;
        }
        return hostname.len() > suffix.len() + 1 && hostname.ends_with(&format!(".{suffix}"));
    }
    hostname == entry
}

/// Whether `ip` matches any entry in `list`.
///
/// IP and CIDR entries are checked first without DNS. If hostname entries
/// remain and a resolver is available, the IP's reverse names are matched
/// against them.
async fn matches_list(
    ip: IpAddr,
    list: &[String],
    resolver: Option<&dyn HostnameResolver>,
) -> bool {
    let mut hostname_entries: Vec<String> = Vec::new();
    for raw in list {
        let entry = raw.trim();
        if entry.is_empty() {
            continue;
        }
        if entry.contains('/') {
            if cidr_contains(entry, ip) {
                return true;
            }
            continue;
        }
        if let Ok(other) = entry.parse::<IpAddr>() {
            if other == ip {
                return true;
            }
            continue;
        }
        hostname_entries.push(entry.to_ascii_lowercase());
    }

    if hostname_entries.is_empty() {
        return false;
    }
    let Some(resolver) = resolver else {
        return false;
    };
    let hostnames = match resolver.reverse_lookup(ip).await {
        Ok(names) => names,
        Err(err) => {
            tracing::debug!(ip = %ip, error = %err, "reverse lookup failed, hostname entries do not match");
            return false;
        }
    };
    for hostname in &hostnames {
        let hostname = hostname.trim().to_ascii_lowercase();
        if hostname.is_empty() {
            continue;
        }
        for entry in &hostname_entries {
            if hostname_matches(entry, &hostname) {
                return true;
            }
        }
    }
    false
}

/// Whether the request should be denied.
///
/// Mode `off` (or absent options) allows everything. `allow_only` denies
/// unless an entry matches, including when the list is empty or the client
/// IP is unparsable. `deny_only` denies only on a match.
pub async fn deny(
    headers: &HeaderMap,
    remote_addr: &str,
    opts: Option<&AclOptions>,
    resolver: Option<&dyn HostnameResolver>,
) -> bool {
    let Some(opts) = opts else {
        return false;
    };
    if opts.mode == acl_mode::OFF {
        return false;
    }
    let ip = client_ip(headers, remote_addr, Some(opts));
    match opts.mode.as_str() {
        acl_mode::ALLOW_ONLY => {
            if opts.allow_list.is_empty() {
                return true; // allow nobody
            }
            let Some(ip) = ip else {
                return true;
            };
            !matches_list(ip, &opts.allow_list, resolver).await
        }
        acl_mode::DENY_ONLY => {
            let Some(ip) = ip else {
                return false;
            };
            matches_list(ip, &opts.deny_list, resolver).await
        }
        _ => false,
    }
}
