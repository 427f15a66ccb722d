//! Listener fleet and request dispatch.
//!
//! # Responsibilities
//! - Run one HTTP(S) listener per source server
//! - Dispatch each request: ACL → route lookup → source auth → target auth →
//!   URL rewrite → upstream proxy → stat emission
//! - Drain gracefully on shutdown
//!
//! # Design Decisions
//! - HTTPS listeners without TLS cert/key paths are skipped with a warning;
//!   one bad listener never takes down the fleet
//! - The upstream client is built once and shared: connection pooling across
//!   requests and listeners
//! - Hop-by-hop headers are stripped in both directions; everything else is
//!   relayed verbatim

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::header::{AUTHORIZATION, CONNECTION, HOST};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use chrono::Utc;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::resolver::{CachingResolver, HostnameResolver, PtrResolver};
use super::{acl, debug};
use crate::cache::Cache;
use crate::model::{Authentication, ProxyStat, Route, SourceServer, TargetServer};
use crate::observability::metrics;
use crate::stats::Recorder;
use crate::store::{Store, StoreError};

type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Body>;

/// How long draining listeners may keep in-flight requests on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs one listener per source server and proxies matching requests.
pub struct ProxyService {
    store: Store,
    resolver: Arc<dyn HostnameResolver>,
    recorder: Option<Arc<dyn Recorder>>,
    client: HttpClient,
}

#[derive(Clone)]
struct ListenerState {
    source_id: Uuid,
    /// Scheme clients connected with; drives `X-Forwarded-Proto`.
    scheme: &'static str,
    service: Arc<ProxyService>,
}

impl ProxyService {
    /// Builds the service. The resolver shares the config cache and TTL when
    /// caching is enabled; otherwise lookups go straight to DNS.
    pub fn new(
        store: Store,
        cache: Option<Arc<dyn Cache>>,
        cache_ttl: Duration,
        recorder: Option<Arc<dyn Recorder>>,
    ) -> Self {
        let mut http = HttpConnector::new();
        http.set_connect_timeout(Some(Duration::from_secs(15)));
        http.enforce_http(false);
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http);
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(60))
            .build(connector);

        let ptr: Arc<dyn HostnameResolver> = Arc::new(PtrResolver::from_system());
        let resolver: Arc<dyn HostnameResolver> = match cache {
            Some(cache) => Arc::new(CachingResolver::new(ptr, cache, cache_ttl)),
            None => ptr,
        };

        Self {
            store,
            resolver,
            recorder,
            client,
        }
    }

    /// Starts a listener for each source server and blocks until `shutdown`
    /// fires. With no source servers configured it just waits.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let sources = match self.store.list_source_servers().await {
            Ok(sources) => sources,
            Err(err) => {
                tracing::error!(error = %err, "list source servers failed, no listeners started");
                let _ = shutdown.recv().await;
                return;
            }
        };
        if sources.is_empty() {
            tracing::info!("no source servers configured, waiting for shutdown");
            let _ = shutdown.recv().await;
            return;
        }

        let mut handles: Vec<Handle> = Vec::new();
        let mut tasks = Vec::new();
        for source in sources {
            let handle = Handle::new();
            if let Some(task) = self.clone().spawn_listener(&source, handle.clone()).await {
                handles.push(handle);
                tasks.push(task);
            }
        }

        let _ = shutdown.recv().await;
        for handle in &handles {
            handle.graceful_shutdown(Some(DRAIN_TIMEOUT));
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Binds one listener. Returns `None` when the listener is skipped
    /// (unresolvable address, HTTPS without TLS options).
    async fn spawn_listener(
        self: Arc<Self>,
        source: &SourceServer,
        handle: Handle,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let addr_string = join_host_port(&source.host, source.port);
        let addr: SocketAddr = match tokio::net::lookup_host(&addr_string).await {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => addr,
                None => {
                    tracing::warn!(source = %source.name, address = %addr_string, "listener address resolves to nothing, skipping");
                    return None;
                }
            },
            Err(err) => {
                tracing::warn!(source = %source.name, address = %addr_string, error = %err, "listener address invalid, skipping");
                return None;
            }
        };

        let https = source.protocol == "https";
        let scheme = if https { "https" } else { "http" };
        let state = ListenerState {
            source_id: source.id,
            scheme,
            service: self.clone(),
        };
        let app = Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(state)
            .into_make_service_with_connect_info::<SocketAddr>();

        let name = source.name.clone();
        if https {
            let opts = match self.store.get_server_options(source.id).await {
                Ok(opts) => opts,
                Err(StoreError::NotFound) => {
                    tracing::warn!(source = %name, address = %addr_string, "HTTPS source has no TLS options, skipping");
                    return None;
                }
                Err(err) => {
                    tracing::warn!(source = %name, address = %addr_string, error = %err, "server options lookup failed, skipping");
                    return None;
                }
            };
            if opts.tls_cert_path.is_empty() || opts.tls_key_path.is_empty() {
                tracing::warn!(source = %name, address = %addr_string, "HTTPS source missing TLS cert/key paths, skipping");
                return None;
            }
            let tls = match RustlsConfig::from_pem_file(&opts.tls_cert_path, &opts.tls_key_path).await {
                Ok(tls) => tls,
                Err(err) => {
                    tracing::warn!(source = %name, address = %addr_string, error = %err, "TLS material unreadable, skipping listener");
                    return None;
                }
            };
            tracing::info!(source = %name, address = %addr_string, "listening on https");
            Some(tokio::spawn(async move {
                if let Err(err) = axum_server::bind_rustls(addr, tls)
                    .handle(handle)
                    .serve(app)
                    .await
                {
                    tracing::error!(source = %name, address = %addr, error = %err, "listener stopped");
                }
            }))
        } else {
            tracing::info!(source = %name, address = %addr_string, "listening on http");
            Some(tokio::spawn(async move {
                if let Err(err) = axum_server::bind(addr).handle(handle).serve(app).await {
                    tracing::error!(source = %name, address = %addr, error = %err, "listener stopped");
                }
            }))
        }
    }

    /// The dispatch sequence for one request.
    async fn handle(
        &self,
        source_id: Uuid,
        scheme: &'static str,
        remote: SocketAddr,
        request: Request<Body>,
    ) -> Response<Body> {
        let (parts, body) = request.into_parts();
        let body = if debug::enabled() {
            debug::peek_and_restore(&parts, body).await
        } else {
            body
        };
        let remote_addr = remote.to_string();

        // ACL first; absent options mean no policy.
        let acl_opts = match self.store.get_acl_options(source_id).await {
            Ok(opts) => Some(opts),
            Err(StoreError::NotFound) => None,
            Err(err) => {
                tracing::warn!(error = %err, "ACL options lookup failed, treating as off");
                None
            }
        };
        if acl::deny(
            &parts.headers,
            &remote_addr,
            acl_opts.as_ref(),
            Some(self.resolver.as_ref()),
        )
        .await
        {
            tracing::info!(method = %parts.method, path = %parts.uri.path(), "denied by ACL");
            return plain_response(StatusCode::FORBIDDEN, "Forbidden");
        }

        let route = match self
            .store
            .find_route_by_source_method_path(source_id, parts.method.as_str(), parts.uri.path())
            .await
        {
            Ok(route) => route,
            Err(StoreError::NotFound) => {
                tracing::info!(method = %parts.method, path = %parts.uri.path(), "no route match");
                return plain_response(StatusCode::NOT_FOUND, "404 page not found");
            }
            Err(err) => {
                tracing::error!(error = %err, "route lookup failed");
                return plain_response(StatusCode::INTERNAL_SERVER_ERROR, "route lookup error");
            }
        };
        tracing::debug!(
            method = %parts.method,
            path = %parts.uri.path(),
            route = %route.id,
            target = %route.target_id,
            "route matched"
        );

        let client_ip = acl::client_ip_string(&parts.headers, &remote_addr, acl_opts.as_ref());
        let method = parts.method.to_string();
        let path = parts.uri.path().to_string();

        // Short-circuit responses (auth denials, missing target) return here
        // without touching the upstream and are not recorded.
        let outbound = match self.prepare(&route, scheme, &remote_addr, parts, body).await {
            Ok(outbound) => outbound,
            Err(response) => return response,
        };

        // Only requests that reach the reverse-proxy leg are recorded.
        let started = Instant::now();
        let timestamp = Utc::now();
        let response = self.proxy_upstream(&route, outbound).await;

        metrics::record_request(&method, response.status().as_u16(), &source_id.to_string(), started);
        if let Some(recorder) = &self.recorder {
            recorder.record(ProxyStat {
                id: Uuid::nil(),
                timestamp,
                source_id,
                route_id: route.id,
                target_id: route.target_id,
                method,
                path,
                status_code: Some(response.status().as_u16() as i32),
                duration_ms: Some(started.elapsed().as_millis() as i64),
                client_ip,
            });
        }
        response
    }

    /// Steps between route resolution and the upstream call: auth checks,
    /// credential injection, and the URL/header rewrite. A denial or lookup
    /// failure yields the finished error response as `Err`.
    async fn prepare(
        &self,
        route: &Route,
        scheme: &'static str,
        remote_addr: &str,
        parts: axum::http::request::Parts,
        body: Body,
    ) -> Result<Request<Body>, Response<Body>> {
        // Client credential enforcement, when the route restricts callers.
        match self.source_authorized(route.id, &parts.headers).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(route = %route.id, "source auth denied");
                return Err(plain_response(StatusCode::FORBIDDEN, "Forbidden"));
            }
            Err(err) => {
                tracing::error!(route = %route.id, error = %err, "source auth check failed");
                return Err(plain_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "source auth error",
                ));
            }
        }

        let target = match self.store.get_target_server(route.target_id).await {
            Ok(target) => target,
            Err(err) => {
                tracing::error!(route = %route.id, error = %err, "target server not found");
                return Err(plain_response(
                    StatusCode::BAD_GATEWAY,
                    "target server not found",
                ));
            }
        };

        // Upstream credential, decrypted. A configured-but-broken credential
        // fails the request rather than silently forwarding the client's.
        let target_auth = match self
            .store
            .get_target_authentication_with_plain_token(route.id)
            .await
        {
            Ok(auth) => auth,
            Err(err) => {
                tracing::error!(route = %route.id, error = %err, "target credential unavailable");
                return Err(plain_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "target auth error",
                ));
            }
        };

        let uri = match build_target_uri(&target, route, parts.uri.query()) {
            Ok(uri) => uri,
            Err(err) => {
                tracing::error!(route = %route.id, error = %err, "target URL invalid");
                return Err(plain_response(StatusCode::BAD_GATEWAY, "invalid target URL"));
            }
        };

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(HOST); // the client sets it from the rewritten URI
        if !headers.contains_key("x-forwarded-for") {
            if let Ok(value) = HeaderValue::from_str(remote_addr) {
                headers.insert("x-forwarded-for", value);
            }
        }
        headers.insert("x-forwarded-proto", HeaderValue::from_static(scheme));
        match target_auth {
            Some(auth) => {
                if let Ok(value) = HeaderValue::from_str(&auth_header_value(&auth)) {
                    headers.insert(AUTHORIZATION, value);
                }
            }
            None => {
                // No target auth: the inbound Authorization passes through.
            }
        }

        let mut outbound = match Request::builder().method(parts.method.clone()).uri(uri).body(body) {
            Ok(request) => request,
            Err(err) => {
                tracing::error!(route = %route.id, error = %err, "outbound request build failed");
                return Err(plain_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "proxy error",
                ));
            }
        };
        *outbound.headers_mut() = headers;
        Ok(outbound)
    }

    /// The reverse-proxy leg: relay the upstream response verbatim apart from
    /// hop-by-hop headers; a failed upstream call is a 502.
    async fn proxy_upstream(&self, route: &Route, outbound: Request<Body>) -> Response<Body> {
        match self.client.request(outbound).await {
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                Response::from_parts(parts, Body::new(body))
            }
            Err(err) => {
                tracing::error!(route = %route.id, error = %err, "upstream request failed");
                plain_response(StatusCode::BAD_GATEWAY, "upstream request failed")
            }
        }
    }

    /// Whether the request may use the route, per its allowed credentials.
    /// Zero configured credentials means the route is open.
    async fn source_authorized(
        &self,
        route_id: Uuid,
        headers: &HeaderMap,
    ) -> Result<bool, StoreError> {
        let allowed = self.store.list_source_auths_for_route(route_id).await?;
        if allowed.is_empty() {
            return Ok(true);
        }
        let incoming = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .unwrap_or_default();
        if incoming.is_empty() {
            return Ok(false);
        }
        for mapping in allowed {
            let auth = self
                .store
                .get_authentication_with_plain_token(mapping.auth_id)
                .await?;
            let expected = auth_header_value(&auth);
            if !expected.is_empty() && incoming == expected {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

async fn proxy_handler(
    State(state): State<ListenerState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> impl IntoResponse {
    state
        .service
        .handle(state.source_id, state.scheme, remote, request)
        .await
}

fn plain_response(status: StatusCode, message: &'static str) -> Response<Body> {
    (status, message).into_response()
}

/// Formats a credential as an `Authorization` header value: bearer tokens get
/// the `Bearer ` prefix, anything else is sent raw.
fn auth_header_value(auth: &Authentication) -> String {
    if auth.token.is_empty() {
        return String::new();
    }
    match auth.token_type.as_str() {
        "bearer" | "Bearer" => format!("Bearer {}", auth.token),
        _ => auth.token.clone(),
    }
}

/// `host` or `host:port`; a zero port means the scheme default.
fn join_host_port(host: &str, port: u16) -> String {
    if port == 0 {
        host.to_string()
    } else {
        format!("{host}:{port}")
    }
}

/// Joins a base path and a route path with exactly one `/` between them:
/// one trailing slash of `base` and one leading slash of `path` are trimmed.
fn join_path(base: &str, path: &str) -> String {
    let base = base.strip_suffix('/').unwrap_or(base);
    let path = path.strip_prefix('/').unwrap_or(path);
    if base.is_empty() {
        format!("/{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// The upstream URL: target scheme, host[:port], joined path, original query.
fn build_target_uri(
    target: &TargetServer,
    route: &Route,
    raw_query: Option<&str>,
) -> Result<Uri, axum::http::Error> {
    let path = join_path(&target.base_path, &route.target_path);
    let path_and_query = match raw_query {
        Some(query) if !query.is_empty() => format!("{path}?{query}"),
        _ => path,
    };
    Uri::builder()
        .scheme(target.protocol.as_str())
        .authority(join_host_port(&target.host, target.port).as_str())
        .path_and_query(path_and_query.as_str())
        .build()
}

/// Removes connection-scoped headers per HTTP/1.1: anything named by
/// `Connection` plus the standard hop-by-hop set.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| token.trim().parse().ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in [
        "connection",
        "proxy-connection",
        "keep-alive",
        "te",
        "trailer",
        "transfer-encoding",
        "upgrade",
    ] {
        headers.remove(name);
    }
}
