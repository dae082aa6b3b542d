use std::sync::Arc;

use async_trait::async_trait;
use backoff_engine::{CircuitBreakerConfig, Retrier, RetryPolicy};
use tracing::{info, warn};

use signage_player::backend::HttpBackend;
use signage_player::cache::{OfflineCache, StateStore};
use signage_player::commands::CommandExecutor;
use signage_player::config::PlayerConfig;
use signage_player::domain::{Command, CommandType, Resolution};
use signage_player::session::{PlayerSession, SessionCallbacks};
use signage_player::{Result, logging};

/// Executor for the headless binary: clear-cache is handled locally, the
/// rest is logged for the platform shell to pick up.
struct ShellExecutor {
    cache: Arc<OfflineCache>,
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(&self, command: &Command) -> Result<()> {
        match command.command_type {
            CommandType::ClearCache => self.cache.clear().await,
            _ => {
                info!(command_type = %command.command_type, "command handed to platform shell");
                Ok(())
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = PlayerConfig::from_env()?;
    let _log_guard = logging::init(config.log_dir.as_deref());

    info!(device_id = %config.device_id, backend = %config.backend_url, "signage player starting");

    let backend = Arc::new(HttpBackend::new(
        config.backend_url.clone(),
        config.request_timeout,
    )?);
    let cache = Arc::new(OfflineCache::open(config.cache()).await?);
    let state = Arc::new(StateStore::open(&config.cache_dir).await?);
    let retrier = Retrier::new(RetryPolicy::default(), CircuitBreakerConfig::default());

    let executor = Arc::new(ShellExecutor {
        cache: cache.clone(),
    });
    let callbacks = SessionCallbacks {
        on_content: Box::new(|resolution: Resolution| match resolution.content() {
            Some(content) => {
                info!(fingerprint = %content.fingerprint, source = ?content.source, "now playing");
            }
            None => info!("nothing configured for this device"),
        }),
        on_screenshot: Box::new(|| info!("screenshot requested")),
        on_video_stuck: Box::new(|| warn!("video stuck, requesting player recovery")),
        on_page_stuck: Box::new(|| warn!("page inactive, requesting reload")),
    };

    let session = PlayerSession::new(
        config.device_id.clone(),
        backend,
        executor,
        cache,
        state,
        retrier,
        config.session(),
        callbacks,
    );
    session.start();

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    session.shutdown().await;

    Ok(())
}
