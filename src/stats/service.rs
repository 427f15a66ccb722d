//! Stats worker and retention vacuum.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};

use super::{Recorder, StatsStore};
use crate::model::ProxyStat;

const DEFAULT_BATCH_SIZE: usize = 50;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_CHANNEL_CAP: usize = 1000;
const DEFAULT_RETENTION_DAYS: usize = 30;
const DEFAULT_VACUUM_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Stats pipeline configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub channel_cap: usize,
    pub retention_days: usize,
    pub vacuum_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            channel_cap: DEFAULT_CHANNEL_CAP,
            retention_days: DEFAULT_RETENTION_DAYS,
            vacuum_interval: DEFAULT_VACUUM_INTERVAL,
        }
    }
}

impl Config {
    /// Reads `STATS_BATCH_SIZE`, `STATS_FLUSH_INTERVAL`, `STATS_CHANNEL_CAP`,
    /// `STATS_RETENTION_DAYS`, and `STATS_VACUUM_INTERVAL`. Invalid or
    /// non-positive values keep their defaults.
    pub fn from_env() -> Self {
        use crate::config::{env_duration, env_positive};
        Self {
            batch_size: env_positive("STATS_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            flush_interval: env_duration("STATS_FLUSH_INTERVAL", DEFAULT_FLUSH_INTERVAL),
            channel_cap: env_positive("STATS_CHANNEL_CAP", DEFAULT_CHANNEL_CAP),
            retention_days: env_positive("STATS_RETENTION_DAYS", DEFAULT_RETENTION_DAYS),
            vacuum_interval: env_duration("STATS_VACUUM_INTERVAL", DEFAULT_VACUUM_INTERVAL),
        }
    }
}

/// The recorder handle injected into proxy handlers. Cheap to clone.
#[derive(Clone)]
pub struct Sink {
    tx: mpsc::Sender<ProxyStat>,
    dropped: Arc<AtomicU64>,
}

impl Sink {
    /// Total stats dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Recorder for Sink {
    fn record(&self, stat: ProxyStat) {
        if let Err(mpsc::error::TrySendError::Full(stat)) = self.tx.try_send(stat) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            crate::observability::metrics::record_stat_dropped();
            tracing::warn!(
                method = %stat.method,
                path = %stat.path,
                "stats queue full, dropping stat"
            );
        }
    }
}

/// Owns the queue receiver, the batch worker, and the vacuum ticker.
pub struct Service<S> {
    store: Arc<S>,
    config: Config,
    rx: mpsc::Receiver<ProxyStat>,
    sink: Sink,
}

impl<S: StatsStore + 'static> Service<S> {
    pub fn new(store: Arc<S>, config: Config) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_cap.max(1));
        let sink = Sink {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        Self {
            store,
            config,
            rx,
            sink,
        }
    }

    /// The recorder handle for this pipeline.
    pub fn sink(&self) -> Sink {
        self.sink.clone()
    }

    /// Runs the batch worker and the vacuum ticker until `shutdown` fires,
    /// then drains the queue best-effort, flushes what is left, and returns.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let Service {
            store,
            config,
            mut rx,
            sink,
        } = self;
        drop(sink); // the service's own handle must not keep the channel open

        run_vacuum(store.as_ref(), config.retention_days).await;
        let mut vacuum_ticker = tokio::time::interval(config.vacuum_interval);
        vacuum_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        vacuum_ticker.tick().await; // immediate first tick; the start vacuum just ran

        let mut batch: Vec<ProxyStat> = Vec::with_capacity(config.batch_size * 2);
        let flush_timer = tokio::time::sleep(config.flush_interval);
        tokio::pin!(flush_timer);

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(stat) => {
                        batch.push(stat);
                        if batch.len() >= config.batch_size {
                            flush(store.as_ref(), &mut batch).await;
                            flush_timer
                                .as_mut()
                                .reset(tokio::time::Instant::now() + config.flush_interval);
                        }
                    }
                    None => {
                        flush(store.as_ref(), &mut batch).await;
                        return;
                    }
                },
                _ = &mut flush_timer => {
                    flush(store.as_ref(), &mut batch).await;
                    flush_timer
                        .as_mut()
                        .reset(tokio::time::Instant::now() + config.flush_interval);
                }
                _ = vacuum_ticker.tick() => {
                    run_vacuum(store.as_ref(), config.retention_days).await;
                }
                _ = shutdown.recv() => {
                    // Drain whatever is already queued, flush, and exit.
                    while let Ok(stat) = rx.try_recv() {
                        batch.push(stat);
                        if batch.len() >= config.batch_size {
                            flush(store.as_ref(), &mut batch).await;
                        }
                    }
                    flush(store.as_ref(), &mut batch).await;
                    return;
                }
            }
        }
    }
}

async fn flush<S: StatsStore>(store: &S, batch: &mut Vec<ProxyStat>) {
    if batch.is_empty() {
        return;
    }
    let to_insert = std::mem::take(batch);
    if let Err(err) = store.insert_proxy_stats(&to_insert).await {
        tracing::error!(count = to_insert.len(), error = %err, "stats batch insert failed");
    }
}

async fn run_vacuum<S: StatsStore>(store: &S, retention_days: usize) {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
    tracing::info!(cutoff = %cutoff.format("%Y-%m-%d"), retention_days, "stats vacuum running");
    match store.delete_stats_older_than(cutoff).await {
        Ok(removed) => tracing::info!(removed, "stats vacuum completed"),
        Err(err) => tracing::error!(error = %err, "stats vacuum failed"),
    }
}
