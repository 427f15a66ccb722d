//! End-to-end dispatch tests: real listeners, real sqlite store, mock
//! upstream backends.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use featherproxy::cache::{Cache, Memory};
use featherproxy::lifecycle::{reload_channel, Shutdown};
use featherproxy::model::{acl_mode, AclOptions, Authentication};
use featherproxy::proxy::ProxyService;

async fn start_proxy(
    store: featherproxy::Store,
    cache: Option<Arc<dyn Cache>>,
    listen_port: u16,
) -> Shutdown {
    let service = Arc::new(ProxyService::new(
        store,
        cache,
        Duration::from_secs(300),
        None,
    ));
    let shutdown = Shutdown::new();
    let stop = shutdown.subscribe();
    tokio::spawn(service.run(stop));
    common::wait_for_port(SocketAddr::from(([127, 0, 0, 1], listen_port))).await;
    shutdown
}

#[tokio::test]
async fn proxies_to_rewritten_target_url() {
    common::ensure_auth_key();
    let backend = common::start_echo_backend().await;
    let (store, _dir) = common::sqlite_store(None).await;
    common::seed_route(&store, 18080, backend, "/api", "GET", "/foo", "/bar").await;

    let shutdown = start_proxy(store, None, 18080).await;
    let response = common::http_client()
        .get("http://127.0.0.1:18080/foo?q=1")
        .send()
        .await
        .expect("proxy reachable");
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["method"], "GET");
    assert_eq!(body["path"], "/api/bar");
    assert_eq!(body["query"], "q=1");
    assert_eq!(body["x_forwarded_proto"], "http");
    assert!(body["x_forwarded_for"].as_str().unwrap().starts_with("127.0.0.1"));

    shutdown.trigger();
}

#[tokio::test]
async fn unknown_path_is_404_and_unknown_method_too() {
    common::ensure_auth_key();
    let backend = common::start_echo_backend().await;
    let (store, _dir) = common::sqlite_store(None).await;
    common::seed_route(&store, 18081, backend, "", "GET", "/foo", "/bar").await;

    let shutdown = start_proxy(store, None, 18081).await;
    let client = common::http_client();
    let response = client
        .get("http://127.0.0.1:18081/nope")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let response = client
        .post("http://127.0.0.1:18081/foo")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    shutdown.trigger();
}

#[tokio::test]
async fn injects_target_credential() {
    common::ensure_auth_key();
    let backend = common::start_echo_backend().await;
    let (store, _dir) = common::sqlite_store(None).await;
    let (_, _, route) = common::seed_route(&store, 18082, backend, "", "GET", "/foo", "/bar").await;

    let now = Utc::now();
    let auth = Authentication {
        id: Uuid::new_v4(),
        name: "upstream".into(),
        token_type: "bearer".into(),
        token: "secret".into(),
        token_masked: String::new(),
        created_at: now,
        updated_at: now,
    };
    store.create_authentication(&auth).await.unwrap();
    store
        .set_target_auth_for_route(route.id, Some(auth.id))
        .await
        .unwrap();

    let shutdown = start_proxy(store, None, 18082).await;
    let response = common::http_client()
        .get("http://127.0.0.1:18082/foo")
        .header("Authorization", "Bearer client")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["authorization"], "Bearer secret");

    shutdown.trigger();
}

#[tokio::test]
async fn forwards_client_credential_without_target_auth() {
    common::ensure_auth_key();
    let backend = common::start_echo_backend().await;
    let (store, _dir) = common::sqlite_store(None).await;
    common::seed_route(&store, 18083, backend, "", "GET", "/foo", "/bar").await;

    let shutdown = start_proxy(store, None, 18083).await;
    let response = common::http_client()
        .get("http://127.0.0.1:18083/foo")
        .header("Authorization", "Bearer client")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["authorization"], "Bearer client");

    shutdown.trigger();
}

#[tokio::test]
async fn source_auth_gates_the_route() {
    common::ensure_auth_key();
    let backend = common::start_echo_backend().await;
    let (store, _dir) = common::sqlite_store(None).await;
    let (_, _, route) = common::seed_route(&store, 18084, backend, "", "GET", "/foo", "/bar").await;

    let now = Utc::now();
    let auth = Authentication {
        id: Uuid::new_v4(),
        name: "caller".into(),
        token_type: "bearer".into(),
        token: "good".into(),
        token_masked: String::new(),
        created_at: now,
        updated_at: now,
    };
    store.create_authentication(&auth).await.unwrap();
    store
        .set_source_auths_for_route(route.id, &[auth.id])
        .await
        .unwrap();

    let shutdown = start_proxy(store, None, 18084).await;
    let client = common::http_client();

    let denied = client
        .get("http://127.0.0.1:18084/foo")
        .header("Authorization", "Bearer bad")
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 403);

    let missing = client.get("http://127.0.0.1:18084/foo").send().await.unwrap();
    assert_eq!(missing.status(), 403);

    let allowed = client
        .get("http://127.0.0.1:18084/foo")
        .header("Authorization", "Bearer good")
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), 200);

    shutdown.trigger();
}

#[tokio::test]
async fn acl_deny_only_cidr_via_header() {
    common::ensure_auth_key();
    let backend = common::start_echo_backend().await;
    let (store, _dir) = common::sqlite_store(None).await;
    let (source, _, _) = common::seed_route(&store, 18085, backend, "", "GET", "/foo", "/bar").await;

    let now = Utc::now();
    store
        .set_acl_options(&AclOptions {
            source_id: source.id,
            mode: acl_mode::DENY_ONLY.into(),
            client_ip_header: "X-Forwarded-For".into(),
            allow_list: vec![],
            deny_list: vec!["10.0.0.0/24".into()],
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();

    let shutdown = start_proxy(store, None, 18085).await;
    let client = common::http_client();

    let denied = client
        .get("http://127.0.0.1:18085/foo")
        .header("X-Forwarded-For", "10.0.0.5")
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 403);

    let allowed = client
        .get("http://127.0.0.1:18085/foo")
        .header("X-Forwarded-For", "10.0.1.5")
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), 200);

    shutdown.trigger();
}

#[tokio::test]
async fn route_update_invalidates_cached_lookup() {
    common::ensure_auth_key();
    let backend = common::start_echo_backend().await;
    let cache: Arc<dyn Cache> = Arc::new(Memory::new(Duration::from_secs(300)));
    let (store, _dir) = common::sqlite_store(Some(cache.clone())).await;
    let (_, _, mut route) =
        common::seed_route(&store, 18086, backend, "/api", "GET", "/foo", "/bar").await;

    let shutdown = start_proxy(store.clone(), Some(cache), 18086).await;
    let client = common::http_client();

    let first = client.get("http://127.0.0.1:18086/foo").send().await.unwrap();
    let body: serde_json::Value = first.json().await.unwrap();
    assert_eq!(body["path"], "/api/bar");

    route.target_path = "/baz".into();
    store.update_route(&route).await.unwrap();

    let second = client.get("http://127.0.0.1:18086/foo").send().await.unwrap();
    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body["path"], "/api/baz", "stale cached route served after update");

    shutdown.trigger();
}

#[tokio::test]
async fn reload_picks_up_new_source_servers() {
    common::ensure_auth_key();
    let backend = common::start_echo_backend().await;
    let (store, _dir) = common::sqlite_store(None).await;

    // Start the coordinator with zero sources: the fleet just waits.
    let service = Arc::new(ProxyService::new(
        store.clone(),
        None,
        Duration::from_secs(300),
        None,
    ));
    let shutdown = Shutdown::new();
    let (reload, coordinator) = reload_channel();
    let run = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { coordinator.run(service, &shutdown).await })
    };

    // Register a source and ask for a reload; the next generation serves it.
    common::seed_route(&store, 18089, backend, "", "GET", "/foo", "/bar").await;
    assert!(reload.request());
    common::wait_for_port(SocketAddr::from(([127, 0, 0, 1], 18089))).await;

    let response = common::http_client()
        .get("http://127.0.0.1:18089/foo")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    shutdown.trigger();
    let _ = run.await;
}

#[tokio::test]
async fn missing_target_server_is_502() {
    common::ensure_auth_key();
    let backend = common::start_echo_backend().await;
    let (store, _dir) = common::sqlite_store(None).await;
    let (_, target, _) = common::seed_route(&store, 18087, backend, "", "GET", "/foo", "/bar").await;
    store.delete_target_server(target.id).await.unwrap();

    let shutdown = start_proxy(store, None, 18087).await;
    let response = common::http_client()
        .get("http://127.0.0.1:18087/foo")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);

    shutdown.trigger();
}

#[tokio::test]
async fn unreachable_upstream_is_502() {
    common::ensure_auth_key();
    let (store, _dir) = common::sqlite_store(None).await;
    // Point the route at a port nothing listens on.
    let dead: SocketAddr = "127.0.0.1:1".parse().unwrap();
    common::seed_route(&store, 18088, dead, "", "GET", "/foo", "/bar").await;

    let shutdown = start_proxy(store, None, 18088).await;
    let response = common::http_client()
        .get("http://127.0.0.1:18088/foo")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);

    shutdown.trigger();
}
