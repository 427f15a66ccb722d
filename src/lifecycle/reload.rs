//! Listener fleet reload.
//!
//! The coordinator owns the fleet lifecycle: it spawns one generation of
//! listeners, waits for either a reload request or process shutdown, stops
//! the generation gracefully, and (on reload) spawns the next one from the
//! current configuration.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::Shutdown;
use crate::proxy::ProxyService;

/// Posts reload requests. Cheap to clone; non-blocking.
#[derive(Clone)]
pub struct ReloadHandle {
    tx: mpsc::Sender<()>,
}

impl ReloadHandle {
    /// Requests a fleet reload. If one is already pending the request is
    /// coalesced into it. Returns whether a new request was enqueued.
    pub fn request(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(())) => false, // already pending
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }
}

/// Receives coalesced reload requests and drives fleet generations.
pub struct Coordinator {
    rx: mpsc::Receiver<()>,
}

/// Builds the buffered-1 reload signal pair.
pub fn reload_channel() -> (ReloadHandle, Coordinator) {
    let (tx, rx) = mpsc::channel(1);
    (ReloadHandle { tx }, Coordinator { rx })
}

impl Coordinator {
    /// Consumes the pending reload request, if any.
    pub fn take_pending(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }

    /// Runs listener fleets until `shutdown` fires.
    ///
    /// Each generation gets its own shutdown channel so the coordinator can
    /// stop it without touching the rest of the process. The next generation
    /// is spawned only after the previous one has fully drained.
    pub async fn run(mut self, service: Arc<ProxyService>, shutdown: &Shutdown) {
        let mut stop = shutdown.subscribe();
        loop {
            let fleet_shutdown = Shutdown::new();
            let fleet_stop = fleet_shutdown.subscribe();
            let fleet = tokio::spawn(service.clone().run(fleet_stop));

            tokio::select! {
                _ = stop.recv() => {
                    fleet_shutdown.trigger();
                    let _ = fleet.await;
                    tracing::info!("proxy stopped");
                    return;
                }
                request = self.rx.recv() => {
                    fleet_shutdown.trigger();
                    let _ = fleet.await;
                    if request.is_none() {
                        // All handles dropped; nothing can ask for a fleet again.
                        tracing::info!("reload channel closed, proxy stopped");
                        return;
                    }
                    tracing::info!("reload requested, restarting listener fleet");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn requests_coalesce_when_pending() {
        let (handle, mut coordinator) = reload_channel();
        assert!(handle.request());
        // Nobody consumed the pending request yet; further posts coalesce.
        for _ in 0..10 {
            assert!(!handle.request());
        }
        assert!(coordinator.take_pending());
        // Drained: exactly one request was pending.
        assert!(!coordinator.take_pending());
        // And the next request goes through again.
        assert!(handle.request());
    }
}
