//! Domain model for the device-side engine.
//!
//! These types mirror what the management backend serves to a device: its
//! own record, the group it belongs to, schedules, campaigns, and the
//! commands it may be asked to execute. They are read-only from the
//! device's perspective; only local state (rotation, cache, telemetry)
//! is ever mutated here.

pub mod campaign;
pub mod command;
pub mod content;
pub mod device;
pub mod schedule;
pub mod telemetry;

pub use campaign::{Campaign, CampaignEntry, RotationMode};
pub use command::{Command, CommandOutcome, CommandType};
pub use content::{
    ContentRef, MediaAsset, Resolution, ResolvedContent, ResolutionSource, fingerprint,
};
pub use device::{ContentSnapshot, Device, Group};
pub use schedule::{Schedule, ScheduleEntry, ScheduleWindow};
pub use telemetry::{Criticality, TelemetryEvent, TelemetryKind};
