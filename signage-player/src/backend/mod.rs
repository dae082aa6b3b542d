//! Management-backend client.
//!
//! [`BackendApi`] is the abstract operation contract the engine consumes;
//! [`HttpBackend`] is the production implementation. Tests substitute their
//! own implementation, which is why every collaborator takes the trait.

mod http;

pub use http::HttpBackend;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::domain::{Command, CommandOutcome, ContentSnapshot, TelemetryEvent};

/// Heartbeat response: two independent control flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatReply {
    #[serde(default)]
    pub refresh_needed: bool,
    #[serde(default)]
    pub screenshot_requested: bool,
}

/// Abstract backend operations, one method per wire contract.
#[async_trait]
pub trait BackendApi: Send + Sync + 'static {
    /// Everything the resolver needs for one cycle: device, group,
    /// schedules, campaigns.
    async fn fetch_snapshot(&self, device_id: &str) -> Result<ContentSnapshot>;

    /// Download one media blob.
    async fn fetch_media(&self, url: &str) -> Result<Bytes>;

    /// Heartbeat: report software version, receive control flags.
    async fn report_status(&self, device_id: &str, version: &str) -> Result<HeartbeatReply>;

    /// Polling fallback for command delivery.
    async fn poll_commands(&self, device_id: &str) -> Result<Vec<Command>>;

    /// Push subscription for command delivery. The returned receiver closes
    /// when the connection drops or `token` is cancelled; the command
    /// channel decides whether to resubscribe.
    async fn subscribe_commands(
        &self,
        device_id: &str,
        token: CancellationToken,
    ) -> Result<mpsc::Receiver<Command>>;

    /// Report the result of an executed command.
    async fn report_command_result(&self, outcome: &CommandOutcome) -> Result<()>;

    /// Flush buffered telemetry events.
    async fn report_events(&self, device_id: &str, events: &[TelemetryEvent]) -> Result<()>;
}
