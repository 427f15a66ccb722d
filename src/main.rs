//! FeatherProxy entrypoint.
//!
//! Startup order: logging, cache, store (connect + migrate, fatal on error),
//! stats pipeline, management API (fatal on bind error), then the reload
//! coordinator driving the listener fleet until shutdown.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use featherproxy::admin::{self, AdminState};
use featherproxy::lifecycle::{reload_channel, Shutdown};
use featherproxy::observability::metrics;
use featherproxy::proxy::ProxyService;
use featherproxy::stats::{self, Recorder};
use featherproxy::store::Store;
use featherproxy::{cache, config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "featherproxy=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "featherproxy starting");

    // Cache is optional; a misconfigured strategy runs uncached.
    let (shared_cache, cache_ttl) = match cache::from_env() {
        Ok(pair) => pair,
        Err(err) => {
            tracing::warn!(error = %err, "cache not enabled");
            (None, cache::DEFAULT_TTL)
        }
    };

    let store = Store::connect_from_env(shared_cache.clone(), cache_ttl).await?;
    store.migrate().await?;
    tracing::info!("database connected and migrated");

    if let Ok(raw) = std::env::var(config::METRICS_ADDR_ENV) {
        match raw.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(err) => tracing::error!(address = %raw, error = %err, "invalid metrics address"),
        }
    }

    let shutdown = Shutdown::new();
    shutdown.trigger_on_signals();

    // Stats pipeline: the sink is the only handle the data plane sees.
    let stats_service = stats::Service::new(Arc::new(store.clone()), stats::Config::from_env());
    let sink = stats_service.sink();
    let stats_task = tokio::spawn(stats_service.run(shutdown.subscribe()));

    // Management API. A failed bind is fatal; a later serve error stops the
    // whole process so the operator notices.
    let (reload, coordinator) = reload_channel();
    let admin_addr = config::admin_listen_addr();
    let admin_listener = tokio::net::TcpListener::bind(&admin_addr).await?;
    tracing::info!(address = %admin_addr, "management API listening");
    let admin_state = AdminState {
        store: store.clone(),
        reload,
    };
    {
        let shutdown = shutdown.clone();
        let admin_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(err) = admin::serve(admin_listener, admin_state, admin_shutdown).await {
                tracing::error!(error = %err, "management API failed");
                shutdown.trigger();
            }
        });
    }

    // Data plane, restarted by the coordinator on reload requests.
    let recorder: Arc<dyn Recorder> = Arc::new(sink);
    let proxy = Arc::new(ProxyService::new(
        store,
        shared_cache.clone(),
        cache_ttl,
        Some(recorder),
    ));
    coordinator.run(proxy, &shutdown).await;

    // Fleet is down; let the stats worker drain before exit.
    let _ = stats_task.await;
    if let Some(cache) = shared_cache {
        cache.close();
    }
    tracing::info!("featherproxy stopped");
    Ok(())
}
