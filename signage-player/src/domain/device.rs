//! Device and group records, and the snapshot served to the resolver.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::campaign::Campaign;
use super::content::{ContentRef, MediaAsset};
use super::schedule::Schedule;

/// A device group, carrying its own optional override and schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub override_content: Option<ContentRef>,
    #[serde(default)]
    pub schedule: Option<Schedule>,
}

/// A physical display and its client instance, as the backend sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    /// IANA timezone name, e.g. "Europe/Berlin".
    pub timezone: String,
    #[serde(default)]
    pub group: Option<Group>,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    /// Manual content override; always wins when present.
    #[serde(default)]
    pub override_content: Option<ContentRef>,
    /// Static content shown when nothing else matches.
    #[serde(default)]
    pub fallback_content: Option<ContentRef>,
    #[serde(default)]
    pub software_version: Option<String>,
}

/// Everything the resolver needs for one resolution cycle, fetched from the
/// backend in a single request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSnapshot {
    pub device: Device,
    /// Campaigns potentially relevant to this device; the resolver applies
    /// targeting, date and window filters itself.
    pub campaigns: Vec<Campaign>,
    /// Media assets per content target id, so the cache knows what to keep
    /// playable offline.
    #[serde(default)]
    pub media_index: HashMap<String, Vec<MediaAsset>>,
    pub fetched_at: DateTime<Utc>,
}

impl ContentSnapshot {
    /// Media assets referenced by a piece of content.
    pub fn media_for(&self, content: &ContentRef) -> Vec<MediaAsset> {
        self.media_index
            .get(&content.target_id)
            .cloned()
            .unwrap_or_default()
    }
}
