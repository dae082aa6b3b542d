//! Content resolution: the priority chain.
//!
//! Evaluates, top to bottom and first match wins:
//!
//! 1. device manual override
//! 2. active campaign (date range, per-entry window, priority, rotation)
//! 3. group manual override
//! 4. device schedule
//! 5. group schedule
//! 6. device fallback content
//!
//! Backend reads go through the retry controller; when the backend is
//! unreachable the last-good content is served from the offline cache and
//! tagged as such, never passed off as fresh.

mod chain;

pub use chain::{ChainOutcome, evaluate_chain};

use std::sync::Arc;

use backoff_engine::Retrier;
use bytes::Bytes;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::BackendApi;
use crate::cache::{OfflineCache, StateStore};
use crate::domain::{
    ContentSnapshot, Resolution, ResolvedContent, TelemetryEvent, TelemetryKind, fingerprint,
};
use crate::{Error, Result};

/// Orchestrates snapshot fetch, chain evaluation, media download and cache
/// write-back for one device.
pub struct ContentResolver<B: BackendApi> {
    device_id: String,
    backend: Arc<B>,
    cache: Arc<OfflineCache>,
    state: Arc<StateStore>,
    retrier: Retrier,
}

impl<B: BackendApi> ContentResolver<B> {
    pub fn new(
        device_id: impl Into<String>,
        backend: Arc<B>,
        cache: Arc<OfflineCache>,
        state: Arc<StateStore>,
        retrier: Retrier,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            backend,
            cache,
            state,
            retrier,
        }
    }

    /// Run one resolution cycle.
    ///
    /// On terminal network failure the offline cache answers instead; a
    /// deleted content reference resolves to `NotConfigured` rather than
    /// looping forever.
    pub async fn resolve(&self, token: &CancellationToken) -> Result<Resolution> {
        let snapshot = match self.fetch_snapshot(token).await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_unreachable() => return self.serve_cached(e).await,
            Err(Error::BackendStatus { status: 404, .. }) | Err(Error::ContentNotFound(_)) => {
                info!(device_id = %self.device_id, "device or content gone, nothing configured");
                return Ok(Resolution::NotConfigured);
            }
            Err(e) => return Err(e),
        };

        match self.resolve_snapshot(&snapshot, token).await {
            Ok(resolution) => Ok(resolution),
            Err(e) if e.is_unreachable() => self.serve_cached(e).await,
            Err(e) => Err(e),
        }
    }

    async fn fetch_snapshot(&self, token: &CancellationToken) -> Result<ContentSnapshot> {
        let backend = &self.backend;
        let device_id = &self.device_id;
        self.retrier
            .run("fetch_snapshot", token, Error::class, |_| async move {
                backend.fetch_snapshot(device_id).await
            })
            .await
            .map_err(Error::from)
    }

    /// Evaluate the chain against a snapshot and make the result playable
    /// offline.
    pub async fn resolve_snapshot(
        &self,
        snapshot: &ContentSnapshot,
        token: &CancellationToken,
    ) -> Result<Resolution> {
        let now = Utc::now();
        let outcome = {
            let mut rng = rand::rng();
            evaluate_chain(snapshot, now, &|campaign_id| {
                self.state.rotation_state(campaign_id)
            }, &mut rng)
        };

        let Some(outcome) = outcome else {
            debug!(device_id = %self.device_id, "no chain tier matched");
            return Ok(Resolution::NotConfigured);
        };

        if let Some((campaign_id, rotation)) = outcome.rotation {
            self.state.set_rotation_state(&campaign_id, rotation).await?;
        }

        let media = snapshot.media_for(&outcome.content);
        let fp = fingerprint(&outcome.content, &media);
        let resolved = ResolvedContent {
            content: outcome.content,
            fingerprint: fp,
            source: outcome.source,
            resolved_at: now,
            media,
        };

        // Unchanged fingerprint means every blob is already cached; refresh
        // the pointer without re-downloading anything.
        if self.cache.validate(&resolved.fingerprint) {
            debug!(fingerprint = %resolved.fingerprint, "content unchanged, skipping downloads");
            self.cache.store(&resolved, Vec::new()).await?;
            return Ok(Resolution::Fresh(resolved));
        }

        let blobs = self.fetch_missing_media(&resolved, token).await?;
        self.cache.store(&resolved, blobs).await?;
        Ok(Resolution::Fresh(resolved))
    }

    async fn fetch_missing_media(
        &self,
        resolved: &ResolvedContent,
        token: &CancellationToken,
    ) -> Result<Vec<(String, Bytes)>> {
        let mut blobs = Vec::new();
        for asset in &resolved.media {
            if self.cache.has_blob(&asset.fingerprint) {
                continue;
            }
            let backend = &self.backend;
            let url = asset.url.clone();
            let data = self
                .retrier
                .run("fetch_media", token, Error::class, |_| {
                    let url = url.clone();
                    async move { backend.fetch_media(&url).await }
                })
                .await
                .map_err(Error::from)?;
            blobs.push((asset.fingerprint.clone(), data));
        }
        Ok(blobs)
    }

    /// Serve the last-good cached content, tagged with its cache timestamp.
    async fn serve_cached(&self, cause: Error) -> Result<Resolution> {
        match self.cache.last() {
            Some(cached) => {
                warn!(
                    device_id = %self.device_id,
                    cached_at = %cached.resolved_at,
                    error = %cause,
                    "backend unreachable, serving cached content"
                );
                let _ = self
                    .cache
                    .push_event(TelemetryEvent::with_detail(
                        TelemetryKind::CacheServed,
                        cause.to_string(),
                    ))
                    .await;
                Ok(Resolution::CacheServed(cached))
            }
            None => {
                warn!(device_id = %self.device_id, error = %cause, "backend unreachable and cache empty");
                Err(cause)
            }
        }
    }
}
