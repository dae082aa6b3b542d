//! Campaigns: date-bounded, prioritized content pushes.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::content::ContentRef;
use super::schedule::ScheduleWindow;

/// How a campaign with multiple entries picks the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationMode {
    Sequential,
    WeightedRandom,
}

/// One rotating entry inside a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignEntry {
    pub id: String,
    pub content: ContentRef,
    /// Optional time-of-day/day-of-week restriction; `None` means always
    /// eligible while the campaign's date range is active.
    #[serde(default)]
    pub window: Option<ScheduleWindow>,
    /// Weight for weighted-random rotation; values below 1 are treated as 1.
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Explicit position for sequential rotation.
    #[serde(default)]
    pub rotation_order: u32,
}

fn default_weight() -> u32 {
    1
}

impl CampaignEntry {
    /// Effective rotation weight (minimum 1).
    pub fn effective_weight(&self) -> u32 {
        self.weight.max(1)
    }
}

/// A date-bounded content push targeting devices and/or groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    /// Inclusive date bounds.
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Higher wins among simultaneously matching campaigns.
    pub priority: i32,
    pub active: bool,
    /// Explicitly targeted device ids; empty means no device targeting.
    #[serde(default)]
    pub device_targets: Vec<String>,
    /// Explicitly targeted group ids; empty means no group targeting.
    #[serde(default)]
    pub group_targets: Vec<String>,
    pub rotation: RotationMode,
    pub entries: Vec<CampaignEntry>,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    /// Whether the campaign targets the given device directly or through
    /// its group. A campaign with no targets at all applies fleet-wide.
    pub fn targets(&self, device_id: &str, group_id: Option<&str>) -> bool {
        if self.device_targets.is_empty() && self.group_targets.is_empty() {
            return true;
        }
        if self.device_targets.iter().any(|d| d == device_id) {
            return true;
        }
        group_id.is_some_and(|g| self.group_targets.iter().any(|t| t == g))
    }

    /// Whether `date` falls within the inclusive campaign date range.
    pub fn covers_date(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }
}
