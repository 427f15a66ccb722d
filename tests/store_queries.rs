//! Store-level behavior against a real sqlite database: lookups, cascade
//! deletes, credential handling, cache interplay, and stats queries.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use featherproxy::cache::{Cache, Memory};
use featherproxy::model::{Authentication, ProxyStat, Route, TargetServer};
use featherproxy::store::StoreError;

fn auth(name: &str, token: &str) -> Authentication {
    let now = Utc::now();
    Authentication {
        id: Uuid::new_v4(),
        name: name.into(),
        token_type: "bearer".into(),
        token: token.into(),
        token_masked: String::new(),
        created_at: now,
        updated_at: now,
    }
}

fn stat(route: &Route, timestamp: chrono::DateTime<Utc>) -> ProxyStat {
    ProxyStat {
        id: Uuid::new_v4(),
        timestamp,
        source_id: route.source_id,
        route_id: route.id,
        target_id: route.target_id,
        method: route.method.clone(),
        path: route.source_path.clone(),
        status_code: Some(200),
        duration_ms: Some(5),
        client_ip: "10.0.0.9".into(),
    }
}

#[tokio::test]
async fn find_route_returns_exact_tuple_or_not_found() {
    common::ensure_auth_key();
    let (store, _dir) = common::sqlite_store(None).await;
    let backend = "127.0.0.1:9".parse().unwrap();
    let (source, _, route) =
        common::seed_route(&store, 28080, backend, "", "GET", "/foo", "/bar").await;

    let found = store
        .find_route_by_source_method_path(source.id, "GET", "/foo")
        .await
        .unwrap();
    assert_eq!(found.id, route.id);

    for (method, path) in [("POST", "/foo"), ("GET", "/fo"), ("GET", "/foo/")] {
        let err = store
            .find_route_by_source_method_path(source.id, method, path)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound), "{method} {path}");
    }
    let err = store
        .find_route_by_source_method_path(Uuid::new_v4(), "GET", "/foo")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
}

#[tokio::test]
async fn route_rejects_incompatible_protocols() {
    common::ensure_auth_key();
    let (store, _dir) = common::sqlite_store(None).await;
    let backend = "127.0.0.1:9".parse().unwrap();
    let (source, _, _) = common::seed_route(&store, 28081, backend, "", "GET", "/foo", "/bar").await;

    let now = Utc::now();
    let grpc_target = TargetServer {
        id: Uuid::new_v4(),
        name: "grpc".into(),
        protocol: "grpc".into(),
        host: "127.0.0.1".into(),
        port: 50051,
        base_path: String::new(),
        created_at: now,
        updated_at: now,
    };
    store.create_target_server(&grpc_target).await.unwrap();

    let route = Route {
        id: Uuid::new_v4(),
        source_id: source.id,
        target_id: grpc_target.id,
        method: "GET".into(),
        source_path: "/grpc".into(),
        target_path: "/x".into(),
        created_at: now,
        updated_at: now,
    };
    let err = store.create_route(&route).await.unwrap_err();
    assert!(matches!(err, StoreError::ProtocolMismatch));
}

#[tokio::test]
async fn https_target_is_compatible_with_http_source() {
    common::ensure_auth_key();
    let (store, _dir) = common::sqlite_store(None).await;
    let backend = "127.0.0.1:9".parse().unwrap();
    let (source, _, _) = common::seed_route(&store, 28082, backend, "", "GET", "/foo", "/bar").await;

    let now = Utc::now();
    let tls_target = TargetServer {
        id: Uuid::new_v4(),
        name: "tls".into(),
        protocol: "https".into(),
        host: "backend.internal".into(),
        port: 0,
        base_path: String::new(),
        created_at: now,
        updated_at: now,
    };
    store.create_target_server(&tls_target).await.unwrap();

    let route = Route {
        id: Uuid::new_v4(),
        source_id: source.id,
        target_id: tls_target.id,
        method: "GET".into(),
        source_path: "/tls".into(),
        target_path: "/x".into(),
        created_at: now,
        updated_at: now,
    };
    store.create_route(&route).await.unwrap();
}

#[tokio::test]
async fn deleting_route_removes_auth_mappings() {
    common::ensure_auth_key();
    let (store, _dir) = common::sqlite_store(None).await;
    let backend = "127.0.0.1:9".parse().unwrap();
    let (_, _, route) = common::seed_route(&store, 28083, backend, "", "GET", "/foo", "/bar").await;

    let a = auth("a", "t1");
    let b = auth("b", "t2");
    store.create_authentication(&a).await.unwrap();
    store.create_authentication(&b).await.unwrap();
    store
        .set_source_auths_for_route(route.id, &[a.id, b.id])
        .await
        .unwrap();
    store
        .set_target_auth_for_route(route.id, Some(b.id))
        .await
        .unwrap();

    store.delete_route(route.id).await.unwrap();
    assert!(store
        .list_source_auths_for_route(route.id)
        .await
        .unwrap()
        .is_empty());
    assert!(store
        .get_target_auth_for_route(route.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn deleting_authentication_removes_references() {
    common::ensure_auth_key();
    let (store, _dir) = common::sqlite_store(None).await;
    let backend = "127.0.0.1:9".parse().unwrap();
    let (_, _, route) = common::seed_route(&store, 28084, backend, "", "GET", "/foo", "/bar").await;

    let a = auth("a", "t1");
    store.create_authentication(&a).await.unwrap();
    store
        .set_source_auths_for_route(route.id, &[a.id])
        .await
        .unwrap();
    store
        .set_target_auth_for_route(route.id, Some(a.id))
        .await
        .unwrap();

    store.delete_authentication(a.id).await.unwrap();
    assert!(store
        .list_source_auths_for_route(route.id)
        .await
        .unwrap()
        .is_empty());
    assert!(store
        .get_target_auth_for_route(route.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn credential_reads_are_masked_or_plaintext() {
    common::ensure_auth_key();
    let (store, _dir) = common::sqlite_store(None).await;
    let a = auth("upstream", "super-secret");
    store.create_authentication(&a).await.unwrap();

    let masked = store.get_authentication(a.id).await.unwrap();
    assert_eq!(masked.token_masked, "***");
    assert!(masked.token.is_empty());

    let listed = store.list_authentications().await.unwrap();
    assert!(listed.iter().all(|item| item.token.is_empty()));

    let plain = store.get_authentication_with_plain_token(a.id).await.unwrap();
    assert_eq!(plain.token, "super-secret");
}

#[tokio::test]
async fn update_with_empty_token_keeps_stored_credential() {
    common::ensure_auth_key();
    let (store, _dir) = common::sqlite_store(None).await;
    let mut a = auth("upstream", "first");
    store.create_authentication(&a).await.unwrap();

    a.name = "renamed".into();
    a.token = String::new();
    store.update_authentication(&a).await.unwrap();
    let plain = store.get_authentication_with_plain_token(a.id).await.unwrap();
    assert_eq!(plain.name, "renamed");
    assert_eq!(plain.token, "first");

    a.token = "second".into();
    store.update_authentication(&a).await.unwrap();
    let plain = store.get_authentication_with_plain_token(a.id).await.unwrap();
    assert_eq!(plain.token, "second");
}

#[tokio::test]
async fn plaintext_reads_never_touch_the_cache() {
    common::ensure_auth_key();
    let cache: Arc<dyn Cache> = Arc::new(Memory::new(Duration::from_secs(300)));
    let (store, _dir) = common::sqlite_store(Some(cache.clone())).await;
    let a = auth("upstream", "super-secret");
    store.create_authentication(&a).await.unwrap();

    let _ = store.get_authentication(a.id).await.unwrap();
    let _ = store.get_authentication_with_plain_token(a.id).await.unwrap();

    // The masked read is cached; the cached bytes must not hold the secret.
    let cached = cache.get(&format!("auth:{}", a.id)).expect("masked read cached");
    let cached_text = String::from_utf8_lossy(&cached);
    assert!(!cached_text.contains("super-secret"));
}

#[tokio::test]
async fn stats_roundtrip_vacuum_and_aggregates() {
    common::ensure_auth_key();
    let (store, _dir) = common::sqlite_store(None).await;
    let backend = "127.0.0.1:9".parse().unwrap();
    let (_, _, route) = common::seed_route(&store, 28085, backend, "", "GET", "/foo", "/bar").await;

    let now = Utc::now();
    store
        .insert_proxy_stats(&[
            stat(&route, now - ChronoDuration::days(2)),
            stat(&route, now - ChronoDuration::hours(1)),
            stat(&route, now),
        ])
        .await
        .unwrap();

    let (listed, total) = store.list_proxy_stats(10, 0, None).await.unwrap();
    assert_eq!(total, 3);
    assert_eq!(listed.len(), 3);
    // Newest first.
    assert!(listed[0].timestamp >= listed[1].timestamp);

    let summary = store.stats_summary().await.unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.last_24h, 2);
    assert_eq!(summary.status_2xx, 2);

    let by_route = store.stats_by_route(None, 10).await.unwrap();
    assert_eq!(by_route.len(), 1);
    assert_eq!(by_route[0].route_id, route.id);
    assert_eq!(by_route[0].count, 3);

    let by_caller = store.stats_by_caller(None, 10).await.unwrap();
    assert_eq!(by_caller[0].client_ip, "10.0.0.9");
    assert_eq!(by_caller[0].count, 3);

    // Retention of one day removes only the two-day-old stat.
    let removed = store
        .delete_stats_older_than(now - ChronoDuration::days(1))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    let (_, total) = store.list_proxy_stats(10, 0, None).await.unwrap();
    assert_eq!(total, 2);

    store.clear_all_proxy_stats().await.unwrap();
    let (_, total) = store.list_proxy_stats(10, 0, None).await.unwrap();
    assert_eq!(total, 0);
}

#[tokio::test]
async fn stats_tps_buckets_by_minute() {
    common::ensure_auth_key();
    let (store, _dir) = common::sqlite_store(None).await;
    let backend = "127.0.0.1:9".parse().unwrap();
    let (_, _, route) = common::seed_route(&store, 28086, backend, "", "GET", "/foo", "/bar").await;

    let now = Utc::now();
    store
        .insert_proxy_stats(&[
            stat(&route, now - ChronoDuration::minutes(2)),
            stat(&route, now - ChronoDuration::minutes(2)),
            stat(&route, now),
        ])
        .await
        .unwrap();

    let buckets = store
        .stats_tps(now - ChronoDuration::minutes(10), Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(buckets.iter().map(|b| b.count).sum::<i64>(), 3);
    assert!(buckets.len() >= 2);
    assert!(buckets.windows(2).all(|w| w[0].at <= w[1].at));
}

#[tokio::test]
async fn bulk_insert_chunks_large_batches() {
    common::ensure_auth_key();
    let (store, _dir) = common::sqlite_store(None).await;
    let backend = "127.0.0.1:9".parse().unwrap();
    let (_, _, route) = common::seed_route(&store, 28087, backend, "", "GET", "/foo", "/bar").await;

    let now = Utc::now();
    let batch: Vec<_> = (0..137).map(|_| stat(&route, now)).collect();
    store.insert_proxy_stats(&batch).await.unwrap();
    let (_, total) = store.list_proxy_stats(1, 0, None).await.unwrap();
    assert_eq!(total, 137);
}
