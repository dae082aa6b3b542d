//! Player session lifecycle.
//!
//! [`PlayerSession`] owns one device's background services: the resolution
//! interval, the heartbeat, the command channel and the stuck-check timer.
//! `start()` spawns them all under one cancellation token; `shutdown()`
//! cancels the token and waits for the tasks to drain.
//!
//! Resolution cycles never overlap (a tick while one is in flight is
//! skipped) and carry a sequence number, so a slow cycle that completes
//! after a fresher one never wins. Heartbeats run on their own task and are
//! never skipped for an in-flight resolution.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use backoff_engine::Retrier;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::BackendApi;
use crate::cache::{OfflineCache, StateStore};
use crate::commands::{
    CommandChannel, CommandChannelConfig, CommandExecutor, Heartbeat, HeartbeatCallbacks,
    HeartbeatConfig,
};
use crate::domain::{Resolution, TelemetryEvent, TelemetryKind};
use crate::resolver::ContentResolver;
use crate::stuck::{StuckCallbacks, StuckDetector, StuckDetectorConfig};

/// All session tunables in one place.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Periodic resolution cadence.
    pub resolve_interval: Duration,
    /// Retry cadence while running on cached content.
    pub offline_retry_interval: Duration,
    pub heartbeat: HeartbeatConfig,
    pub commands: CommandChannelConfig,
    pub stuck: StuckDetectorConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            resolve_interval: Duration::from_secs(60),
            offline_retry_interval: Duration::from_secs(30),
            heartbeat: HeartbeatConfig::default(),
            commands: CommandChannelConfig::default(),
            stuck: StuckDetectorConfig::default(),
        }
    }
}

/// Hooks the embedding player provides.
pub struct SessionCallbacks {
    /// Applied whenever the resolved content changes.
    pub on_content: Box<dyn Fn(Resolution) + Send + Sync>,
    /// Screenshot requested, via heartbeat flag or command.
    pub on_screenshot: Box<dyn Fn() + Send + Sync>,
    /// Stuck-detector recovery hooks.
    pub on_video_stuck: Box<dyn Fn() + Send + Sync>,
    pub on_page_stuck: Box<dyn Fn() + Send + Sync>,
}

struct Applied {
    seq: u64,
    fingerprint: Option<String>,
}

/// One device's running engine.
pub struct PlayerSession<B: BackendApi, E: CommandExecutor> {
    device_id: String,
    config: SessionConfig,
    backend: Arc<B>,
    cache: Arc<OfflineCache>,
    resolver: Arc<ContentResolver<B>>,
    channel: Arc<CommandChannel<B, E>>,
    retrier: Retrier,
    stuck: Arc<Mutex<StuckDetector>>,
    token: CancellationToken,
    /// Re-entrancy guard for resolution cycles.
    resolving: Arc<AtomicBool>,
    next_seq: AtomicU64,
    applied: Arc<Mutex<Applied>>,
    /// Set while the applied resolution came from the offline cache.
    cache_served: Arc<AtomicBool>,
    current: Arc<RwLock<Option<Resolution>>>,
    refresh: Arc<Notify>,
    on_content: Arc<dyn Fn(Resolution) + Send + Sync>,
    on_screenshot: Arc<dyn Fn() + Send + Sync>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<B: BackendApi, E: CommandExecutor> PlayerSession<B, E> {
    pub fn new(
        device_id: impl Into<String>,
        backend: Arc<B>,
        executor: Arc<E>,
        cache: Arc<OfflineCache>,
        state: Arc<StateStore>,
        retrier: Retrier,
        config: SessionConfig,
        callbacks: SessionCallbacks,
    ) -> Arc<Self> {
        let device_id = device_id.into();
        let resolver = Arc::new(ContentResolver::new(
            device_id.clone(),
            backend.clone(),
            cache.clone(),
            state.clone(),
            retrier.clone(),
        ));
        let channel = Arc::new(CommandChannel::new(
            device_id.clone(),
            backend.clone(),
            executor,
            state,
            cache.clone(),
            retrier.clone(),
            config.commands.clone(),
        ));
        let stuck = Arc::new(Mutex::new(StuckDetector::new(
            config.stuck.clone(),
            StuckCallbacks {
                on_video_stuck: callbacks.on_video_stuck,
                on_page_stuck: callbacks.on_page_stuck,
            },
            Instant::now(),
        )));

        Arc::new(Self {
            device_id,
            config,
            backend,
            cache,
            resolver,
            channel,
            retrier,
            stuck,
            token: CancellationToken::new(),
            resolving: Arc::new(AtomicBool::new(false)),
            next_seq: AtomicU64::new(0),
            applied: Arc::new(Mutex::new(Applied {
                seq: 0,
                fingerprint: None,
            })),
            cache_served: Arc::new(AtomicBool::new(false)),
            current: Arc::new(RwLock::new(None)),
            refresh: Arc::new(Notify::new()),
            on_content: Arc::from(callbacks.on_content),
            on_screenshot: Arc::from(callbacks.on_screenshot),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn every background service and kick off an immediate first
    /// resolution.
    pub fn start(self: &Arc<Self>) {
        info!(device_id = %self.device_id, "starting player session");

        let mut tasks = self.tasks.lock();

        tasks.push(tokio::spawn({
            let session = self.clone();
            async move { session.resolution_loop().await }
        }));

        tasks.push(tokio::spawn({
            let session = self.clone();
            let heartbeat = Heartbeat::new(
                session.device_id.clone(),
                session.backend.clone(),
                session.cache.clone(),
                session.retrier.clone(),
                session.config.heartbeat.clone(),
                HeartbeatCallbacks {
                    on_refresh_needed: {
                        let refresh = session.refresh.clone();
                        Box::new(move || refresh.notify_one())
                    },
                    on_screenshot_requested: {
                        let on_screenshot = session.on_screenshot.clone();
                        Box::new(move || on_screenshot())
                    },
                },
            );
            let token = self.token.clone();
            async move { heartbeat.run(token).await }
        }));

        tasks.push(tokio::spawn({
            let channel = self.channel.clone();
            let token = self.token.clone();
            async move { channel.run(token).await }
        }));

        tasks.push(tokio::spawn({
            let session = self.clone();
            async move { session.stuck_loop().await }
        }));

        // Do not wait out the first interval tick.
        self.refresh.notify_one();
    }

    /// Cancel everything and wait for the tasks to finish.
    pub async fn shutdown(&self) {
        info!(device_id = %self.device_id, "shutting down player session");
        self.token.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await
                && !e.is_cancelled()
            {
                error!(error = %e, "session task panicked");
            }
        }
    }

    /// The applied resolution, if any.
    pub fn current(&self) -> Option<Resolution> {
        self.current.read().clone()
    }

    /// Ask for an immediate resolution cycle.
    pub fn request_refresh(&self) {
        self.refresh.notify_one();
    }

    /// Forward a playback position sample to the stuck detector.
    pub fn report_position(&self, position_secs: f64, playing: bool) {
        self.stuck
            .lock()
            .report_position(position_secs, playing, Instant::now());
    }

    /// Record general device activity for the stuck detector.
    pub fn touch_activity(&self) {
        self.stuck.lock().touch_activity(Instant::now());
    }

    async fn resolution_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.resolve_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The interval fires immediately on first tick; the startup notify
        // covers that instead.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.refresh.notified() => {}
            }
            self.spawn_resolution();
        }
    }

    /// Run one cycle on its own task unless one is already in flight.
    fn spawn_resolution(self: &Arc<Self>) {
        if self.resolving.swap(true, Ordering::SeqCst) {
            debug!(device_id = %self.device_id, "resolution already in flight, skipping tick");
            return;
        }
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let session = self.clone();
        tokio::spawn(async move {
            match session.resolver.resolve(&session.token).await {
                Ok(resolution) => session.apply(seq, resolution).await,
                Err(e) => {
                    warn!(device_id = %session.device_id, error = %e, "resolution cycle failed");
                }
            }
            session.resolving.store(false, Ordering::SeqCst);
        });
    }

    /// Apply a completed resolution if nothing fresher has been applied.
    async fn apply(&self, seq: u64, resolution: Resolution) {
        let changed = {
            let mut applied = self.applied.lock();
            if seq <= applied.seq {
                debug!(seq, applied_seq = applied.seq, "discarding stale resolution");
                return;
            }
            applied.seq = seq;
            let fingerprint = resolution.content().map(|c| c.fingerprint.clone());
            let changed = fingerprint != applied.fingerprint;
            applied.fingerprint = fingerprint;
            changed
        };

        self.cache_served
            .store(resolution.is_cache_served(), Ordering::SeqCst);
        if resolution.is_cache_served() {
            self.schedule_offline_retry();
        }

        *self.current.write() = Some(resolution.clone());

        if changed {
            info!(
                device_id = %self.device_id,
                fingerprint = resolution.content().map(|c| c.fingerprint.as_str()).unwrap_or("none"),
                "resolved content changed"
            );
            self.stuck.lock().reset(Instant::now());
            let event = TelemetryEvent::with_detail(
                TelemetryKind::ContentChanged,
                resolution
                    .content()
                    .map(|c| c.fingerprint.clone())
                    .unwrap_or_else(|| "not-configured".into()),
            );
            if let Err(e) = self.cache.push_event(event).await {
                warn!(error = %e, "failed to queue content-change telemetry");
            }
            (self.on_content)(resolution);
        }
    }

    /// While on cached content, retry sooner than the regular cadence so a
    /// stale cache is refreshed in the background as soon as connectivity
    /// returns.
    fn schedule_offline_retry(&self) {
        let token = self.token.clone();
        let refresh = self.refresh.clone();
        let cache_served = self.cache_served.clone();
        let delay = self.config.offline_retry_interval;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if cache_served.load(Ordering::SeqCst) {
                        refresh.notify_one();
                    }
                }
            }
        });
    }

    async fn stuck_loop(self: Arc<Self>) {
        let interval = self.config.stuck.check_interval;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.stuck.lock().check(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeartbeatReply;
    use crate::cache::CacheConfig;
    use crate::domain::{
        Command, CommandOutcome, ContentRef, ContentSnapshot, Device, TelemetryEvent,
    };
    use async_trait::async_trait;
    use backoff_engine::{CircuitBreakerConfig, RetryPolicy};
    use bytes::Bytes;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::mpsc;

    struct OverrideBackend {
        snapshots: AtomicU32,
    }

    fn snapshot_with_override(target_id: &str) -> ContentSnapshot {
        ContentSnapshot {
            device: Device {
                id: "d-1".into(),
                name: "lobby".into(),
                timezone: "UTC".into(),
                group: None,
                schedule: None,
                override_content: Some(ContentRef::new("playlist", target_id)),
                fallback_content: None,
                software_version: None,
            },
            campaigns: Vec::new(),
            media_index: HashMap::new(),
            fetched_at: Utc::now(),
        }
    }

    #[async_trait]
    impl BackendApi for OverrideBackend {
        async fn fetch_snapshot(&self, _: &str) -> crate::Result<ContentSnapshot> {
            self.snapshots.fetch_add(1, Ordering::SeqCst);
            Ok(snapshot_with_override("p-1"))
        }

        async fn fetch_media(&self, _: &str) -> crate::Result<Bytes> {
            Ok(Bytes::new())
        }

        async fn report_status(&self, _: &str, _: &str) -> crate::Result<HeartbeatReply> {
            Ok(HeartbeatReply::default())
        }

        async fn poll_commands(&self, _: &str) -> crate::Result<Vec<Command>> {
            Ok(Vec::new())
        }

        async fn subscribe_commands(
            &self,
            _: &str,
            _: CancellationToken,
        ) -> crate::Result<mpsc::Receiver<Command>> {
            Err(crate::Error::Push("no push in test".into()))
        }

        async fn report_command_result(&self, _: &CommandOutcome) -> crate::Result<()> {
            Ok(())
        }

        async fn report_events(&self, _: &str, _: &[TelemetryEvent]) -> crate::Result<()> {
            Ok(())
        }
    }

    struct NoopExecutor;

    #[async_trait]
    impl CommandExecutor for NoopExecutor {
        async fn execute(&self, _: &Command) -> crate::Result<()> {
            Ok(())
        }
    }

    fn callbacks(applied: Arc<AtomicU32>) -> SessionCallbacks {
        SessionCallbacks {
            on_content: Box::new(move |_| {
                applied.fetch_add(1, Ordering::SeqCst);
            }),
            on_screenshot: Box::new(|| {}),
            on_video_stuck: Box::new(|| {}),
            on_page_stuck: Box::new(|| {}),
        }
    }

    async fn session(
        backend: Arc<OverrideBackend>,
        dir: &std::path::Path,
        applied: Arc<AtomicU32>,
    ) -> Arc<PlayerSession<OverrideBackend, NoopExecutor>> {
        let cache = Arc::new(OfflineCache::open(CacheConfig::new(dir)).await.unwrap());
        let state = Arc::new(StateStore::open(dir).await.unwrap());
        let retrier = Retrier::new(
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                jitter: false,
            },
            CircuitBreakerConfig::default(),
        );
        PlayerSession::new(
            "d-1",
            backend,
            Arc::new(NoopExecutor),
            cache,
            state,
            retrier,
            SessionConfig {
                resolve_interval: Duration::from_secs(3600),
                offline_retry_interval: Duration::from_secs(3600),
                heartbeat: HeartbeatConfig {
                    interval: Duration::from_secs(3600),
                    software_version: "test".into(),
                },
                commands: CommandChannelConfig {
                    poll_interval: Duration::from_secs(3600),
                    resubscribe_delay: Duration::from_secs(3600),
                },
                stuck: StuckDetectorConfig::default(),
            },
            callbacks(applied),
        )
    }

    #[tokio::test]
    async fn startup_resolves_and_applies_content() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(OverrideBackend {
            snapshots: AtomicU32::new(0),
        });
        let applied = Arc::new(AtomicU32::new(0));
        let session = session(backend, dir.path(), applied.clone()).await;

        session.start();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let current = session.current().expect("content applied");
        assert!(!current.is_cache_served());
        assert_eq!(applied.load(Ordering::SeqCst), 1);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn unchanged_content_does_not_reapply() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(OverrideBackend {
            snapshots: AtomicU32::new(0),
        });
        let applied = Arc::new(AtomicU32::new(0));
        let session = session(backend.clone(), dir.path(), applied.clone()).await;

        session.start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        session.request_refresh();
        tokio::time::sleep(Duration::from_millis(200)).await;
        session.shutdown().await;

        // Two cycles ran but the content callback fired once.
        assert!(backend.snapshots.load(Ordering::SeqCst) >= 2);
        assert_eq!(applied.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_resolution_never_overwrites_fresher_one() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(OverrideBackend {
            snapshots: AtomicU32::new(0),
        });
        let applied = Arc::new(AtomicU32::new(0));
        let session = session(backend, dir.path(), applied.clone()).await;

        let fresh = Resolution::NotConfigured;
        session.apply(5, fresh).await;
        // An older cycle finishing late must be discarded.
        session
            .apply(
                3,
                Resolution::Fresh(crate::domain::ResolvedContent {
                    content: ContentRef::new("playlist", "old"),
                    fingerprint: "old-fp".into(),
                    source: crate::domain::ResolutionSource::DeviceOverride,
                    resolved_at: Utc::now(),
                    media: Vec::new(),
                }),
            )
            .await;

        assert_eq!(session.current(), Some(Resolution::NotConfigured));
    }
}
