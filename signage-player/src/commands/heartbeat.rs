//! Periodic heartbeat with backend-driven control flags.

use std::sync::Arc;
use std::time::Duration;

use backoff_engine::Retrier;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Error;
use crate::backend::BackendApi;
use crate::cache::OfflineCache;

/// Reactions to heartbeat control flags, injected by the owning application.
pub struct HeartbeatCallbacks {
    /// The backend wants the device to re-resolve its content immediately.
    pub on_refresh_needed: Box<dyn Fn() + Send + Sync>,
    /// The backend wants a screenshot uploaded.
    pub on_screenshot_requested: Box<dyn Fn() + Send + Sync>,
}

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    /// Software version string reported with each beat.
    pub software_version: String,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Reports device status on a fixed cadence. A beat is attempted on every
/// tick even while content resolution is in flight; a successful beat also
/// flushes the pending telemetry queue.
pub struct Heartbeat<B: BackendApi> {
    device_id: String,
    backend: Arc<B>,
    cache: Arc<OfflineCache>,
    retrier: Retrier,
    config: HeartbeatConfig,
    callbacks: HeartbeatCallbacks,
}

impl<B: BackendApi> Heartbeat<B> {
    pub fn new(
        device_id: impl Into<String>,
        backend: Arc<B>,
        cache: Arc<OfflineCache>,
        retrier: Retrier,
        config: HeartbeatConfig,
        callbacks: HeartbeatCallbacks,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            backend,
            cache,
            retrier,
            config,
            callbacks,
        }
    }

    pub async fn run(self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.beat(&token).await;
        }
        info!(device_id = %self.device_id, "heartbeat stopped");
    }

    pub async fn beat(&self, token: &CancellationToken) {
        let reply = self
            .retrier
            .run("heartbeat", token, Error::class, |_| {
                let backend = self.backend.clone();
                let device_id = self.device_id.clone();
                let version = self.config.software_version.clone();
                async move { backend.report_status(&device_id, &version).await }
            })
            .await;

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "heartbeat failed");
                return;
            }
        };

        if reply.refresh_needed {
            debug!("backend requested content refresh");
            (self.callbacks.on_refresh_needed)();
        }
        if reply.screenshot_requested {
            debug!("backend requested screenshot");
            (self.callbacks.on_screenshot_requested)();
        }

        self.flush_events(token).await;
    }

    /// Drain queued telemetry and send it; put it back on failure so
    /// nothing is lost while offline.
    async fn flush_events(&self, token: &CancellationToken) {
        let events = match self.cache.take_events().await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "failed to drain telemetry queue");
                return;
            }
        };
        if events.is_empty() {
            return;
        }

        let count = events.len();
        let result = self
            .retrier
            .run("report_events", token, Error::class, |_| {
                let backend = self.backend.clone();
                let device_id = self.device_id.clone();
                let events = events.clone();
                async move { backend.report_events(&device_id, &events).await }
            })
            .await;

        match result {
            Ok(()) => debug!(count, "flushed telemetry events"),
            Err(e) => {
                warn!(error = %e, count, "failed to flush telemetry, requeueing");
                if let Err(e) = self.cache.requeue_events(events).await {
                    warn!(error = %e, "failed to requeue telemetry");
                }
            }
        }
    }
}
