//! Environment-driven configuration.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::cache::CacheConfig;
use crate::commands::{CommandChannelConfig, HeartbeatConfig};
use crate::session::SessionConfig;
use crate::stuck::StuckDetectorConfig;
use crate::{Error, Result};

/// Everything the binary needs, read once at startup.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub device_id: String,
    pub backend_url: Url,
    pub cache_dir: PathBuf,
    pub cache_max_bytes: u64,
    pub request_timeout: Duration,
    pub resolve_interval: Duration,
    pub heartbeat_interval: Duration,
    pub command_poll_interval: Duration,
    pub log_dir: Option<PathBuf>,
}

impl PlayerConfig {
    /// Read configuration from the environment. `PLAYER_DEVICE_ID` and
    /// `PLAYER_BACKEND_URL` are required; everything else has defaults.
    pub fn from_env() -> Result<Self> {
        let device_id = std::env::var("PLAYER_DEVICE_ID")
            .map_err(|_| Error::config("PLAYER_DEVICE_ID is not set"))?;
        let backend_url = std::env::var("PLAYER_BACKEND_URL")
            .map_err(|_| Error::config("PLAYER_BACKEND_URL is not set"))?;
        let backend_url = Url::parse(&backend_url)
            .map_err(|e| Error::config(format!("invalid PLAYER_BACKEND_URL: {e}")))?;

        Ok(Self {
            device_id,
            backend_url,
            cache_dir: std::env::var("PLAYER_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("player-cache")),
            cache_max_bytes: env_u64("PLAYER_CACHE_MAX_BYTES", 512 * 1024 * 1024)?,
            request_timeout: env_secs("PLAYER_REQUEST_TIMEOUT_SECS", 30)?,
            resolve_interval: env_secs("PLAYER_RESOLVE_INTERVAL_SECS", 60)?,
            heartbeat_interval: env_secs("PLAYER_HEARTBEAT_INTERVAL_SECS", 60)?,
            command_poll_interval: env_secs("PLAYER_COMMAND_POLL_INTERVAL_SECS", 30)?,
            log_dir: std::env::var("PLAYER_LOG_DIR").map(PathBuf::from).ok(),
        })
    }

    pub fn cache(&self) -> CacheConfig {
        CacheConfig::new(&self.cache_dir).with_max_bytes(self.cache_max_bytes)
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            resolve_interval: self.resolve_interval,
            heartbeat: HeartbeatConfig {
                interval: self.heartbeat_interval,
                ..HeartbeatConfig::default()
            },
            commands: CommandChannelConfig {
                poll_interval: self.command_poll_interval,
                ..CommandChannelConfig::default()
            },
            stuck: StuckDetectorConfig::default(),
            ..SessionConfig::default()
        }
    }
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|e| Error::config(format!("invalid {name}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn env_secs(name: &str, default: u64) -> Result<Duration> {
    env_u64(name, default).map(Duration::from_secs)
}
