//! Resolved content descriptors and fingerprinting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Reference to a renderable piece of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRef {
    /// Kind of content ("scene", "playlist", "url", ...). Opaque to the
    /// engine; the renderer interprets it.
    pub content_type: String,
    /// Backend identifier of the target content.
    pub target_id: String,
}

impl ContentRef {
    pub fn new(content_type: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            target_id: target_id.into(),
        }
    }
}

/// A media asset a piece of content depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAsset {
    /// Download URL.
    pub url: String,
    /// Server-side fingerprint of the blob, also the cache key.
    pub fingerprint: String,
    /// Size in bytes, when the backend reports it.
    pub size: Option<u64>,
}

/// Which tier of the priority chain produced a resolution.
///
/// Kept for diagnostics only; nothing re-decides based on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionSource {
    DeviceOverride,
    Campaign { campaign_id: String },
    GroupOverride,
    DeviceSchedule { entry_id: String },
    GroupSchedule { entry_id: String },
    Fallback,
}

/// The single content descriptor a device should currently render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedContent {
    pub content: ContentRef,
    /// Change-detection hash over the content and its media set.
    pub fingerprint: String,
    pub source: ResolutionSource,
    /// When this resolution was produced.
    pub resolved_at: DateTime<Utc>,
    /// Media the renderer needs available offline.
    pub media: Vec<MediaAsset>,
}

/// Outcome of a resolution cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Freshly resolved from backend data.
    Fresh(ResolvedContent),
    /// Backend unreachable; last-good content served from the offline
    /// cache. `resolved_at` inside the content carries the cache timestamp
    /// so the UI can show "serving cached content since ...".
    CacheServed(ResolvedContent),
    /// No tier of the priority chain matched. A legitimate terminal state.
    NotConfigured,
}

impl Resolution {
    pub fn content(&self) -> Option<&ResolvedContent> {
        match self {
            Resolution::Fresh(c) | Resolution::CacheServed(c) => Some(c),
            Resolution::NotConfigured => None,
        }
    }

    pub fn is_cache_served(&self) -> bool {
        matches!(self, Resolution::CacheServed(_))
    }
}

/// Content fingerprint: sha-256 over the content reference and the ordered
/// media fingerprints. Must stay in sync with the scheme the backend uses,
/// since `validate` compares the two directly.
pub fn fingerprint(content: &ContentRef, media: &[MediaAsset]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.content_type.as_bytes());
    hasher.update([0u8]);
    hasher.update(content.target_id.as_bytes());
    for asset in media {
        hasher.update([0u8]);
        hasher.update(asset.fingerprint.as_bytes());
    }
    hex::encode(hasher.finalize())
}
