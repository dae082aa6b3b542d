//! Telemetry events buffered while offline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Drop priority for the pending-events queue: when the queue is full,
/// lower-criticality events are dropped first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    /// Liveness noise (heartbeat gaps, cache hits).
    Low = 0,
    /// Playback lifecycle (completions, rotations).
    Normal = 1,
    /// Errors and recovery actions.
    Critical = 2,
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryKind {
    PlaybackCompleted,
    ContentChanged,
    CacheServed,
    VideoStuck,
    PageStuck,
    CommandExecuted,
    Error,
}

impl TelemetryKind {
    pub fn criticality(&self) -> Criticality {
        match self {
            TelemetryKind::Error | TelemetryKind::VideoStuck | TelemetryKind::PageStuck => {
                Criticality::Critical
            }
            TelemetryKind::PlaybackCompleted
            | TelemetryKind::ContentChanged
            | TelemetryKind::CommandExecuted => Criticality::Normal,
            TelemetryKind::CacheServed => Criticality::Low,
        }
    }
}

/// A device-generated event, queued locally until connectivity allows a
/// flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub id: Uuid,
    pub kind: TelemetryKind,
    pub criticality: Criticality,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl TelemetryEvent {
    pub fn new(kind: TelemetryKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            criticality: kind.criticality(),
            occurred_at: Utc::now(),
            detail: None,
        }
    }

    pub fn with_detail(kind: TelemetryKind, detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Self::new(kind)
        }
    }
}
