//! Offline content cache.
//!
//! Persists the most recently resolved content (`last.json`), the media
//! blobs it references (keyed by fingerprint), the pending-events queue and
//! the small state store. The device keeps playing from here when the
//! backend is unreachable.
//!
//! All mutations are serialized through a single async writer lock, and the
//! `last.json` pointer is replaced via temp-file rename, so a reader always
//! observes a consistent prior snapshot rather than a partial write.

mod events;
mod state;

pub use events::EventQueue;
pub use state::StateStore;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::SystemTime;

use bytes::Bytes;
use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{ResolvedContent, TelemetryEvent};
use crate::{Error, Result};

/// Configuration for the offline cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory for cached content, blobs and local state.
    pub dir: PathBuf,
    /// Total byte bound for media blobs.
    pub max_bytes: u64,
    /// Maximum number of buffered telemetry events.
    pub max_pending_events: usize,
}

impl CacheConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_bytes: 512 * 1024 * 1024,
            max_pending_events: 1000,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

#[derive(Debug, Clone)]
struct BlobMeta {
    size: u64,
    last_used: SystemTime,
}

/// Disk-backed cache for the last-good resolution and its media.
pub struct OfflineCache {
    dir: PathBuf,
    max_bytes: u64,
    /// In-memory copy of `last.json`; readers never touch the disk.
    last: RwLock<Option<ResolvedContent>>,
    /// Blob index: fingerprint -> size and last use.
    blobs: SyncMutex<HashMap<String, BlobMeta>>,
    events: SyncMutex<EventQueue>,
    /// Single in-flight writer for every disk mutation.
    writer: Mutex<()>,
}

impl OfflineCache {
    /// Open the cache, scanning any blobs left from a previous run.
    pub async fn open(config: CacheConfig) -> Result<Self> {
        tokio::fs::create_dir_all(config.dir.join("blobs")).await?;

        let last = match tokio::fs::read(config.dir.join("last.json")).await {
            Ok(bytes) => match serde_json::from_slice::<ResolvedContent>(&bytes) {
                Ok(content) => {
                    info!(fingerprint = %content.fingerprint, "loaded cached content");
                    Some(content)
                }
                Err(e) => {
                    warn!(error = %e, "cached content unreadable, discarding");
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(Error::Io(e)),
        };

        let mut blobs = HashMap::new();
        let mut entries = tokio::fs::read_dir(config.dir.join("blobs")).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            blobs.insert(
                name,
                BlobMeta {
                    size: meta.len(),
                    last_used: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                },
            );
        }

        let mut queue = EventQueue::new(config.max_pending_events);
        if let Ok(bytes) = tokio::fs::read(config.dir.join("events.json")).await
            && let Ok(persisted) = serde_json::from_slice::<Vec<TelemetryEvent>>(&bytes)
        {
            for event in persisted {
                queue.push(event);
            }
        }

        Ok(Self {
            dir: config.dir,
            max_bytes: config.max_bytes,
            last: RwLock::new(last),
            blobs: SyncMutex::new(blobs),
            events: SyncMutex::new(queue),
            writer: Mutex::new(()),
        })
    }

    /// The last successfully stored resolution, if any.
    pub fn last(&self) -> Option<ResolvedContent> {
        self.last.read().clone()
    }

    /// Cheap staleness check: compare a freshly fetched fingerprint against
    /// the cached one without touching any payload.
    pub fn validate(&self, fingerprint: &str) -> bool {
        self.last
            .read()
            .as_ref()
            .is_some_and(|c| c.fingerprint == fingerprint)
    }

    pub fn has_blob(&self, fingerprint: &str) -> bool {
        self.blobs.lock().contains_key(fingerprint)
    }

    /// Total bytes currently held by media blobs.
    pub fn blob_bytes(&self) -> u64 {
        self.blobs.lock().values().map(|m| m.size).sum()
    }

    /// Store a resolution and its media blobs, evicting LRU blobs to stay
    /// within the byte bound. Blobs belonging to `resolved` itself are never
    /// evicted.
    pub async fn store(
        &self,
        resolved: &ResolvedContent,
        blobs: Vec<(String, Bytes)>,
    ) -> Result<()> {
        let _guard = self.writer.lock().await;

        let active: HashSet<&str> = resolved
            .media
            .iter()
            .map(|m| m.fingerprint.as_str())
            .collect();

        for (fingerprint, data) in blobs {
            if !valid_blob_name(&fingerprint) {
                warn!(%fingerprint, "refusing blob with unsafe fingerprint");
                continue;
            }
            if self.has_blob(&fingerprint) {
                continue;
            }
            let incoming = data.len() as u64;
            if !self.make_room(incoming, &active).await {
                warn!(
                    %fingerprint,
                    size = incoming,
                    bound = self.max_bytes,
                    "cannot fit blob within cache bound without evicting active media, skipping"
                );
                continue;
            }
            let path = self.dir.join("blobs").join(&fingerprint);
            tokio::fs::write(&path, &data).await?;
            self.blobs.lock().insert(
                fingerprint,
                BlobMeta {
                    size: incoming,
                    last_used: SystemTime::now(),
                },
            );
        }

        // Pointer goes last so a crash mid-store leaves the previous
        // resolution intact.
        let tmp = self.dir.join("last.json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(resolved)?).await?;
        tokio::fs::rename(&tmp, self.dir.join("last.json")).await?;
        *self.last.write() = Some(resolved.clone());
        debug!(fingerprint = %resolved.fingerprint, "stored resolution in offline cache");
        Ok(())
    }

    /// Evict least-recently-used non-active blobs until `incoming` fits.
    ///
    /// Returns `false` when the bound cannot be met because everything left
    /// belongs to the active content.
    async fn make_room(&self, incoming: u64, active: &HashSet<&str>) -> bool {
        if incoming > self.max_bytes {
            return false;
        }
        // Pick victims under the lock, delete the files after releasing it.
        let (fits, victims) = {
            let mut blobs = self.blobs.lock();
            let mut victims = Vec::new();
            let fits = loop {
                let total: u64 = blobs.values().map(|m| m.size).sum();
                if total + incoming <= self.max_bytes {
                    break true;
                }
                let victim = blobs
                    .iter()
                    .filter(|(fp, _)| !active.contains(fp.as_str()))
                    .min_by_key(|(_, meta)| meta.last_used)
                    .map(|(fp, _)| fp.clone());
                let Some(fingerprint) = victim else {
                    break false;
                };
                blobs.remove(&fingerprint);
                victims.push(fingerprint);
            };
            (fits, victims)
        };

        for fingerprint in victims {
            let path = self.dir.join("blobs").join(&fingerprint);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(%fingerprint, "evicted LRU blob"),
                Err(e) => warn!(%fingerprint, error = %e, "failed to remove evicted blob"),
            }
        }
        fits
    }

    /// Read a cached blob, refreshing its LRU position.
    pub async fn blob(&self, fingerprint: &str) -> Result<Bytes> {
        if !valid_blob_name(fingerprint) {
            return Err(Error::CacheEmpty);
        }
        let data = tokio::fs::read(self.dir.join("blobs").join(fingerprint))
            .await
            .map_err(|_| Error::CacheEmpty)?;
        if let Some(meta) = self.blobs.lock().get_mut(fingerprint) {
            meta.last_used = SystemTime::now();
        }
        Ok(Bytes::from(data))
    }

    /// Wipe cached content and media. The pending-events queue survives;
    /// telemetry is not sacrificed to a cache clear.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.writer.lock().await;
        let fingerprints: Vec<String> = self.blobs.lock().keys().cloned().collect();
        for fingerprint in fingerprints {
            let _ = tokio::fs::remove_file(self.dir.join("blobs").join(&fingerprint)).await;
        }
        self.blobs.lock().clear();
        let _ = tokio::fs::remove_file(self.dir.join("last.json")).await;
        *self.last.write() = None;
        info!("offline cache cleared");
        Ok(())
    }

    /// Queue a telemetry event for the next flush.
    pub async fn push_event(&self, event: TelemetryEvent) -> Result<()> {
        let _guard = self.writer.lock().await;
        self.events.lock().push(event);
        self.persist_events().await
    }

    /// Take all pending events for a flush attempt.
    pub async fn take_events(&self) -> Result<Vec<TelemetryEvent>> {
        let _guard = self.writer.lock().await;
        let events = self.events.lock().drain();
        self.persist_events().await?;
        Ok(events)
    }

    /// Return events whose flush failed.
    pub async fn requeue_events(&self, events: Vec<TelemetryEvent>) -> Result<()> {
        let _guard = self.writer.lock().await;
        self.events.lock().requeue(events);
        self.persist_events().await
    }

    pub fn pending_events(&self) -> usize {
        self.events.lock().len()
    }

    async fn persist_events(&self) -> Result<()> {
        let snapshot: Vec<TelemetryEvent> = self.events.lock().snapshot();
        let tmp = self.dir.join("events.json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(&snapshot)?).await?;
        tokio::fs::rename(&tmp, self.dir.join("events.json")).await?;
        Ok(())
    }
}

/// Blob files are named by fingerprint; restrict to filesystem-safe names.
fn valid_blob_name(fingerprint: &str) -> bool {
    !fingerprint.is_empty()
        && fingerprint.len() <= 128
        && fingerprint
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContentRef, MediaAsset, ResolutionSource, fingerprint};
    use chrono::Utc;

    fn resolved(id: &str, media: Vec<MediaAsset>) -> ResolvedContent {
        let content = ContentRef::new("scene", id);
        let fp = fingerprint(&content, &media);
        ResolvedContent {
            content,
            fingerprint: fp,
            source: ResolutionSource::Fallback,
            resolved_at: Utc::now(),
            media,
        }
    }

    fn asset(fp: &str) -> MediaAsset {
        MediaAsset {
            url: format!("http://cdn/{fp}"),
            fingerprint: fp.to_string(),
            size: None,
        }
    }

    async fn cache(dir: &std::path::Path, max_bytes: u64) -> OfflineCache {
        OfflineCache::open(CacheConfig {
            dir: dir.to_path_buf(),
            max_bytes,
            max_pending_events: 10,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn last_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let content = resolved("s-1", vec![asset("aaa")]);
        {
            let c = cache(dir.path(), 1024).await;
            c.store(&content, vec![("aaa".into(), Bytes::from_static(b"blob"))])
                .await
                .unwrap();
        }
        let c = cache(dir.path(), 1024).await;
        assert_eq!(c.last().unwrap().fingerprint, content.fingerprint);
        assert!(c.validate(&content.fingerprint));
        assert!(!c.validate("different"));
        assert_eq!(c.blob("aaa").await.unwrap(), Bytes::from_static(b"blob"));
    }

    #[tokio::test]
    async fn byte_bound_is_never_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let c = cache(dir.path(), 100).await;
        for i in 0..10 {
            let fp = format!("blob-{i}");
            let content = resolved(&format!("s-{i}"), vec![asset(&fp)]);
            c.store(&content, vec![(fp, Bytes::from(vec![0u8; 40]))])
                .await
                .unwrap();
            assert!(c.blob_bytes() <= 100, "bound exceeded at step {i}");
        }
    }

    #[tokio::test]
    async fn active_blobs_survive_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let c = cache(dir.path(), 100).await;

        let old = resolved("old", vec![asset("old-blob")]);
        c.store(&old, vec![("old-blob".into(), Bytes::from(vec![0u8; 60]))])
            .await
            .unwrap();

        // New content needs two blobs; the bound forces out the old one but
        // never the new content's own first blob.
        let media = vec![asset("new-a"), asset("new-b")];
        let new = resolved("new", media);
        c.store(
            &new,
            vec![
                ("new-a".into(), Bytes::from(vec![0u8; 50])),
                ("new-b".into(), Bytes::from(vec![0u8; 50])),
            ],
        )
        .await
        .unwrap();

        assert!(!c.has_blob("old-blob"));
        assert!(c.has_blob("new-a"));
        assert!(c.has_blob("new-b"));
        assert!(c.blob_bytes() <= 100);
    }

    #[tokio::test]
    async fn oversized_blob_is_skipped_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let c = cache(dir.path(), 10).await;
        let content = resolved("big", vec![asset("huge")]);
        c.store(&content, vec![("huge".into(), Bytes::from(vec![0u8; 64]))])
            .await
            .unwrap();
        assert!(!c.has_blob("huge"));
        // The resolution pointer itself is still stored.
        assert!(c.last().is_some());
    }

    #[tokio::test]
    async fn unsafe_fingerprints_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let c = cache(dir.path(), 1024).await;
        let content = resolved("evil", vec![]);
        c.store(
            &content,
            vec![("../escape".into(), Bytes::from_static(b"x"))],
        )
        .await
        .unwrap();
        assert!(!c.has_blob("../escape"));
        assert!(c.blob("../escape").await.is_err());
    }

    #[tokio::test]
    async fn events_persist_across_reopen() {
        use crate::domain::{TelemetryEvent, TelemetryKind};
        let dir = tempfile::tempdir().unwrap();
        {
            let c = cache(dir.path(), 1024).await;
            c.push_event(TelemetryEvent::new(TelemetryKind::Error))
                .await
                .unwrap();
        }
        let c = cache(dir.path(), 1024).await;
        assert_eq!(c.pending_events(), 1);
        let events = c.take_events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(c.pending_events(), 0);
        c.requeue_events(events).await.unwrap();
        assert_eq!(c.pending_events(), 1);
    }

    #[tokio::test]
    async fn clear_keeps_pending_events() {
        use crate::domain::{TelemetryEvent, TelemetryKind};
        let dir = tempfile::tempdir().unwrap();
        let c = cache(dir.path(), 1024).await;
        let content = resolved("s-1", vec![asset("aaa")]);
        c.store(&content, vec![("aaa".into(), Bytes::from_static(b"b"))])
            .await
            .unwrap();
        c.push_event(TelemetryEvent::new(TelemetryKind::Error))
            .await
            .unwrap();
        c.clear().await.unwrap();
        assert!(c.last().is_none());
        assert!(!c.has_blob("aaa"));
        assert_eq!(c.pending_events(), 1);
    }
}
