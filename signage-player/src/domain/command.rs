//! Remote commands issued by the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the backend may ask a device to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    Reboot,
    Reload,
    ClearCache,
    Reset,
    Screenshot,
}

impl CommandType {
    /// Destructive commands report their result *before* executing, since
    /// the device may be unreachable immediately afterwards. They also never
    /// overlap any other in-flight command.
    pub fn is_destructive(&self) -> bool {
        matches!(self, CommandType::Reboot | CommandType::Reset)
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommandType::Reboot => "reboot",
            CommandType::Reload => "reload",
            CommandType::ClearCache => "clear_cache",
            CommandType::Reset => "reset",
            CommandType::Screenshot => "screenshot",
        };
        f.write_str(s)
    }
}

/// A single backend-issued command. Delivery is at-least-once; the device
/// de-duplicates by `id` so each identifier executes exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    pub issued_at: DateTime<Utc>,
}

/// Result of executing a command locally, reported back to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub command_id: String,
    pub success: bool,
    #[serde(default)]
    pub detail: Option<String>,
}

impl CommandOutcome {
    pub fn ok(command_id: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            success: true,
            detail: None,
        }
    }

    pub fn failed(command_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            success: false,
            detail: Some(detail.into()),
        }
    }
}
