//! Request payload debugging.
//!
//! When `FEATHERPROXY_DEBUG_PAYLOAD` is truthy, up to 2 MiB of each request
//! body is logged (or appended to `FEATHERPROXY_DEBUG_PAYLOAD_FILE`) before
//! the body is reconstituted and forwarded unchanged. File appends are
//! serialized through one mutex.

use axum::body::{Body, Bytes};
use axum::http::request::Parts;
use chrono::Utc;
use futures_util::StreamExt;
use http_body_util::BodyExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub const DEBUG_PAYLOAD_ENV: &str = "FEATHERPROXY_DEBUG_PAYLOAD";
pub const DEBUG_PAYLOAD_FILE_ENV: &str = "FEATHERPROXY_DEBUG_PAYLOAD_FILE";

/// Maximum request body bytes to log.
pub const MAX_DEBUG_PAYLOAD_BYTES: usize = 2 * 1024 * 1024;

static FILE_LOCK: Mutex<()> = Mutex::const_new(());

pub fn enabled() -> bool {
    crate::config::env_truthy(DEBUG_PAYLOAD_ENV)
}

fn file_path() -> Option<String> {
    match std::env::var(DEBUG_PAYLOAD_FILE_ENV) {
        Ok(path) if !path.is_empty() => Some(path),
        _ => None,
    }
}

/// Reads up to [`MAX_DEBUG_PAYLOAD_BYTES`] of the body, records it, and
/// returns a body that yields the peeked prefix followed by the remainder.
pub async fn peek_and_restore(parts: &Parts, body: Body) -> Body {
    let mut body = body;
    let mut prefix: Vec<u8> = Vec::new();
    let mut ended = false;
    while prefix.len() < MAX_DEBUG_PAYLOAD_BYTES {
        match body.frame().await {
            Some(Ok(frame)) => {
                if let Ok(data) = frame.into_data() {
                    prefix.extend_from_slice(&data);
                }
            }
            Some(Err(err)) => {
                tracing::warn!(error = %err, "debug payload: read body prefix");
                ended = true;
                break;
            }
            None => {
                ended = true;
                break;
            }
        }
    }

    let logged = &prefix[..prefix.len().min(MAX_DEBUG_PAYLOAD_BYTES)];
    let truncated = logged.len() == MAX_DEBUG_PAYLOAD_BYTES;
    if !logged.is_empty() {
        record(parts, logged, truncated).await;
    }

    // Reconstitute: prefix first, then whatever the client is still sending.
    let head = futures_util::stream::iter(if prefix.is_empty() {
        None
    } else {
        Some(Ok::<Bytes, axum::Error>(Bytes::from(prefix)))
    });
    if ended {
        Body::from_stream(head)
    } else {
        Body::from_stream(head.chain(body.into_data_stream()))
    }
}

async fn record(parts: &Parts, payload: &[u8], truncated: bool) {
    let mut summary = format!(
        "{} {} {} bytes",
        parts.method,
        parts.uri.path(),
        payload.len()
    );
    if truncated {
        summary.push_str(" (truncated)");
    }
    match file_path() {
        Some(path) => {
            let line = format!(
                "{} {}\n{}\n",
                Utc::now().to_rfc3339(),
                summary,
                String::from_utf8_lossy(payload)
            );
            let _guard = FILE_LOCK.lock().await;
            let open = open_append(&path).await;
            match open {
                Ok(mut file) => {
                    if let Err(err) = file.write_all(line.as_bytes()).await {
                        tracing::warn!(path = %path, error = %err, "debug payload: write file");
                    }
                }
                Err(err) => {
                    tracing::warn!(path = %path, error = %err, "debug payload: open file");
                }
            }
        }
        None => {
            tracing::info!(
                payload = %String::from_utf8_lossy(payload),
                "debug payload: {summary}"
            );
        }
    }
}

async fn open_append(path: &str) -> std::io::Result<tokio::fs::File> {
    let mut options = tokio::fs::OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    options.mode(0o644);
    options.open(path).await
}
