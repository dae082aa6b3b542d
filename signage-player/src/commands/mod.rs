//! Remote command delivery and execution.
//!
//! Commands arrive over two concurrent paths: a WebSocket push subscription
//! (primary) and a periodic poll (fallback). Both feed one fan-in channel
//! behind a de-duplication gate keyed by command id, so a command delivered
//! twice executes once and reports once. The executed-id window is persisted
//! in the state store, which also covers duplicates re-delivered across a
//! player restart.
//!
//! Destructive commands (reboot, reset) report their result *before*
//! executing, because the device may be unreachable immediately afterwards,
//! and hold an exclusive lock so they never overlap other in-flight
//! commands. Non-destructive commands report after completion and may run
//! concurrently with each other.

mod heartbeat;

pub use heartbeat::{Heartbeat, HeartbeatCallbacks, HeartbeatConfig};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff_engine::Retrier;
use dashmap::DashSet;
use tokio::sync::{RwLock, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::BackendApi;
use crate::cache::{OfflineCache, StateStore};
use crate::domain::{Command, CommandOutcome, TelemetryEvent, TelemetryKind};
use crate::{Error, Result};

/// Executes commands on the actual device; implemented by the owning
/// application.
#[async_trait]
pub trait CommandExecutor: Send + Sync + 'static {
    async fn execute(&self, command: &Command) -> Result<()>;
}

/// Configuration for command delivery.
#[derive(Debug, Clone)]
pub struct CommandChannelConfig {
    /// Polling fallback interval.
    pub poll_interval: Duration,
    /// Delay before re-establishing a dropped push subscription.
    pub resubscribe_delay: Duration,
}

impl Default for CommandChannelConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            resubscribe_delay: Duration::from_secs(5),
        }
    }
}

/// Dual push/poll command channel with a single de-duplicated consumer.
pub struct CommandChannel<B: BackendApi, E: CommandExecutor> {
    device_id: String,
    backend: Arc<B>,
    executor: Arc<E>,
    state: Arc<StateStore>,
    cache: Arc<OfflineCache>,
    retrier: Retrier,
    config: CommandChannelConfig,
    /// Ids currently executing, so a duplicate delivered mid-execution is
    /// still gated.
    in_flight: Arc<DashSet<String>>,
    /// Destructive commands take the write half; everything else the read
    /// half.
    exec_lock: Arc<RwLock<()>>,
}

impl<B: BackendApi, E: CommandExecutor> CommandChannel<B, E> {
    pub fn new(
        device_id: impl Into<String>,
        backend: Arc<B>,
        executor: Arc<E>,
        state: Arc<StateStore>,
        cache: Arc<OfflineCache>,
        retrier: Retrier,
        config: CommandChannelConfig,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            backend,
            executor,
            state,
            cache,
            retrier,
            config,
            in_flight: Arc::new(DashSet::new()),
            exec_lock: Arc::new(RwLock::new(())),
        }
    }

    /// Run both delivery paths and the consumer until cancellation.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        let (fan_in_tx, mut fan_in_rx) = mpsc::channel::<Command>(64);

        // Push path: subscribe, forward, resubscribe on drop.
        let push = {
            let channel = self.clone();
            let tx = fan_in_tx.clone();
            let token = token.clone();
            tokio::spawn(async move { channel.push_loop(tx, token).await })
        };

        // Poll fallback.
        let poll = {
            let channel = self.clone();
            let tx = fan_in_tx;
            let token = token.clone();
            tokio::spawn(async move { channel.poll_loop(tx, token).await })
        };

        // Single consumer behind the dedup gate.
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                command = fan_in_rx.recv() => {
                    let Some(command) = command else { break };
                    self.clone().dispatch(command, token.clone());
                }
            }
        }

        push.abort();
        poll.abort();
        info!(device_id = %self.device_id, "command channel stopped");
    }

    async fn push_loop(&self, tx: mpsc::Sender<Command>, token: CancellationToken) {
        loop {
            if token.is_cancelled() {
                return;
            }
            match self
                .backend
                .subscribe_commands(&self.device_id, token.clone())
                .await
            {
                Ok(mut rx) => {
                    while let Some(command) = rx.recv().await {
                        if tx.send(command).await.is_err() {
                            return;
                        }
                    }
                    debug!("push subscription closed, falling back to polling until resubscribed");
                }
                Err(e) => {
                    debug!(error = %e, "push subscription unavailable");
                }
            }
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(self.config.resubscribe_delay) => {}
            }
        }
    }

    async fn poll_loop(&self, tx: mpsc::Sender<Command>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {}
            }
            match self.backend.poll_commands(&self.device_id).await {
                Ok(commands) => {
                    for command in commands {
                        if tx.send(command).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    debug!(error = %e, "command poll failed");
                }
            }
        }
    }

    /// Gate on the executed window and spawn execution.
    fn dispatch(self: Arc<Self>, command: Command, token: CancellationToken) {
        if self.state.was_executed(&command.id) {
            debug!(command_id = %command.id, "duplicate command, already executed");
            return;
        }
        if !self.in_flight.insert(command.id.clone()) {
            debug!(command_id = %command.id, "duplicate command, execution in flight");
            return;
        }
        tokio::spawn(async move {
            let id = command.id.clone();
            if let Err(e) = self.handle(command, &token).await {
                error!(command_id = %id, error = %e, "command handling failed");
            }
            self.in_flight.remove(&id);
        });
    }

    async fn handle(&self, command: Command, token: &CancellationToken) -> Result<()> {
        info!(
            command_id = %command.id,
            command_type = %command.command_type,
            "executing command"
        );

        if command.command_type.is_destructive() {
            // Exclusive: wait for every other in-flight command to finish
            // and keep new ones out.
            let _guard = self.exec_lock.write().await;
            // The executed mark and the result report both happen before
            // the irreversible action; afterwards the device may be gone.
            self.state.mark_executed(&command.id).await?;
            self.report(CommandOutcome::ok(&command.id), token).await;
            self.record_event(&command).await;
            if let Err(e) = self.executor.execute(&command).await {
                // Too late to amend the report; the action was supposed to
                // take the device down anyway.
                error!(command_id = %command.id, error = %e, "destructive command failed locally");
            }
        } else {
            let _guard = self.exec_lock.read().await;
            self.state.mark_executed(&command.id).await?;
            let outcome = match self.executor.execute(&command).await {
                Ok(()) => CommandOutcome::ok(&command.id),
                Err(e) => {
                    warn!(command_id = %command.id, error = %e, "command execution failed");
                    CommandOutcome::failed(&command.id, e.to_string())
                }
            };
            self.record_event(&command).await;
            self.report(outcome, token).await;
        }
        Ok(())
    }

    /// Report a result through the retry controller. Non-blocking: failures
    /// are logged, never propagated, and never prevent execution.
    async fn report(&self, outcome: CommandOutcome, token: &CancellationToken) {
        let result = self
            .retrier
            .run("report_command_result", token, Error::class, |_| {
                let outcome = outcome.clone();
                let backend = self.backend.clone();
                async move { backend.report_command_result(&outcome).await }
            })
            .await;
        if let Err(e) = result {
            warn!(command_id = %outcome.command_id, error = %e, "failed to report command result");
        }
    }

    async fn record_event(&self, command: &Command) {
        let event = TelemetryEvent::with_detail(
            TelemetryKind::CommandExecuted,
            format!("{} ({})", command.command_type, command.id),
        );
        if let Err(e) = self.cache.push_event(event).await {
            warn!(error = %e, "failed to queue command telemetry");
        }
    }
}
