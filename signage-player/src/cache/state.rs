//! Device-resident state store.
//!
//! Persists the rotation state per campaign and the recently-executed
//! command-id window in one JSON file next to the content cache, so both
//! survive a player restart. Writes go through a single async lock and an
//! atomic temp-file rename, matching the cache's single-writer rule.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::rotation::RotationState;
use crate::{Error, Result};

/// How many executed command ids are remembered for de-duplication.
const EXECUTED_WINDOW: usize = 256;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    rotation: HashMap<String, RotationState>,
    /// Executed command ids, oldest first.
    #[serde(default)]
    executed_commands: Vec<String>,
}

/// Store for small per-device state.
pub struct StateStore {
    path: PathBuf,
    state: RwLock<PersistedState>,
    writer: Mutex<()>,
}

impl StateStore {
    /// Open (or create) the state file under `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join("state.json");
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "state file unreadable, starting fresh");
                PersistedState::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
            Err(e) => return Err(Error::Io(e)),
        };
        Ok(Self {
            path,
            state: RwLock::new(state),
            writer: Mutex::new(()),
        })
    }

    /// Rotation state for a campaign, if one was persisted.
    pub fn rotation_state(&self, campaign_id: &str) -> Option<RotationState> {
        self.state.read().rotation.get(campaign_id).cloned()
    }

    /// Persist a new rotation state for a campaign.
    pub async fn set_rotation_state(
        &self,
        campaign_id: &str,
        rotation: RotationState,
    ) -> Result<()> {
        let _guard = self.writer.lock().await;
        let snapshot = {
            let mut state = self.state.write();
            state.rotation.insert(campaign_id.to_string(), rotation);
            state.clone()
        };
        self.flush(&snapshot).await
    }

    /// Whether a command id has already been executed on this device.
    pub fn was_executed(&self, command_id: &str) -> bool {
        self.state
            .read()
            .executed_commands
            .iter()
            .any(|id| id == command_id)
    }

    /// Record a command id as executed, trimming the window.
    pub async fn mark_executed(&self, command_id: &str) -> Result<()> {
        let _guard = self.writer.lock().await;
        let snapshot = {
            let mut state = self.state.write();
            if !state.executed_commands.iter().any(|id| id == command_id) {
                state.executed_commands.push(command_id.to_string());
                let overflow = state.executed_commands.len().saturating_sub(EXECUTED_WINDOW);
                if overflow > 0 {
                    state.executed_commands.drain(..overflow);
                }
            }
            state.clone()
        };
        self.flush(&snapshot).await
    }

    /// Drop all persisted state (used by the reset command).
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.writer.lock().await;
        let snapshot = {
            let mut state = self.state.write();
            *state = PersistedState::default();
            state.clone()
        };
        self.flush(&snapshot).await
    }

    async fn flush(&self, state: &PersistedState) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(state)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
