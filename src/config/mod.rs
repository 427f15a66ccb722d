//! Environment configuration helpers.
//!
//! # Responsibilities
//! - Parse durations, counts, and flags from environment variables
//! - Fall back to defaults on invalid or non-positive values (never fatal)
//!
//! # Design Decisions
//! - Each subsystem reads its own variables (store, cache, stats, crypto);
//!   this module only provides the shared parsing primitives
//! - Durations use Go-style strings ("5s", "5m", "24h") because that is what
//!   operators of the deployed config already write

use std::time::Duration;

/// Default bind address for the management API.
pub const DEFAULT_ADMIN_ADDR: &str = "127.0.0.1:4545";

/// Environment variable for the management API bind address.
pub const ADMIN_ADDR_ENV: &str = "ADMIN_LISTEN_ADDR";

/// Environment variable for the optional Prometheus exporter address.
pub const METRICS_ADDR_ENV: &str = "METRICS_ADDR";

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum DurationParseError {
    #[error("empty duration")]
    Empty,

    #[error("invalid number in duration")]
    NotANumber,

    #[error("invalid unit (expected one of 'ms', 's', 'm', 'h')")]
    InvalidUnit,
}

/// Parses a Go-style duration string such as `"500ms"`, `"5s"`, `"5m"`, `"24h"`.
///
/// Multiple segments are allowed (`"1h30m"`). A bare number is rejected, a
/// unit is required.
pub fn parse_duration(s: &str) -> Result<Duration, DurationParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(DurationParseError::Empty);
    }
    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or(DurationParseError::InvalidUnit)?;
        if digits_end == 0 {
            return Err(DurationParseError::NotANumber);
        }
        let value: f64 = rest[..digits_end]
            .parse()
            .map_err(|_| DurationParseError::NotANumber)?;
        rest = &rest[digits_end..];
        let (unit_len, unit_secs) = if rest.starts_with("ms") {
            (2, 0.001)
        } else if rest.starts_with('s') {
            (1, 1.0)
        } else if rest.starts_with('m') {
            (1, 60.0)
        } else if rest.starts_with('h') {
            (1, 3600.0)
        } else {
            return Err(DurationParseError::InvalidUnit);
        };
        rest = &rest[unit_len..];
        total += Duration::from_secs_f64(value * unit_secs);
    }
    Ok(total)
}

/// Reads a duration variable; invalid or non-positive values yield `default`.
pub fn env_duration(name: &str, default: Duration) -> Duration {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => match parse_duration(&v) {
            Ok(d) if d > Duration::ZERO => d,
            _ => default,
        },
        _ => default,
    }
}

/// Reads a positive integer variable; invalid or non-positive values yield `default`.
pub fn env_positive(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(v) => match v.trim().parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => default,
        },
        _ => default,
    }
}

/// Truthy flags: "1" or "true" (case-insensitive).
pub fn env_truthy(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => v == "1" || v.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// The management API bind address (`ADMIN_LISTEN_ADDR`, default `127.0.0.1:4545`).
pub fn admin_listen_addr() -> String {
    std::env::var(ADMIN_ADDR_ENV).unwrap_or_else(|_| DEFAULT_ADMIN_ADDR.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_durations() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn parses_compound_durations() {
        assert_eq!(
            parse_duration("1h30m").unwrap(),
            Duration::from_secs(3600 + 1800)
        );
    }

    #[test]
    fn rejects_bad_durations() {
        assert_eq!(parse_duration("").unwrap_err(), DurationParseError::Empty);
        assert_eq!(
            parse_duration("5").unwrap_err(),
            DurationParseError::InvalidUnit
        );
        assert_eq!(
            parse_duration("5d").unwrap_err(),
            DurationParseError::InvalidUnit
        );
        assert_eq!(
            parse_duration("m").unwrap_err(),
            DurationParseError::NotANumber
        );
    }
}
