//! Rotation among equal-priority campaign entries.
//!
//! Sequential mode is fully deterministic: entries are ordered by
//! `rotation_order` (ties by id) and each pick advances one position past
//! the last shown entry, wrapping. Weighted-random mode draws from the
//! cumulative weight distribution and keeps no state beyond logging what
//! was shown. Both transitions are pure functions of (candidates, prior
//! state), so a device replaying the same calls sees the same sequence.

use chrono::{DateTime, Utc};
use rand::{Rng, RngExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{CampaignEntry, RotationMode};

/// Persisted rotation state, one record per (device, campaign) pair.
///
/// Owned exclusively by the rotation engine; created on the first pick and
/// updated on every subsequent one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationState {
    /// Id of the entry shown last.
    pub last_entry_id: String,
    pub last_shown_at: DateTime<Utc>,
}

/// Stateless rotation engine.
pub struct RotationEngine;

impl RotationEngine {
    /// Pick the next entry among `candidates`.
    ///
    /// Returns the chosen entry together with the new rotation state, or
    /// `None` when there is nothing to choose from.
    pub fn next<'a, R: Rng>(
        mode: RotationMode,
        candidates: &'a [CampaignEntry],
        state: Option<&RotationState>,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Option<(&'a CampaignEntry, RotationState)> {
        if candidates.is_empty() {
            return None;
        }

        let chosen = match mode {
            RotationMode::Sequential => Self::next_sequential(candidates, state),
            RotationMode::WeightedRandom => Self::next_weighted(candidates, rng),
        };

        debug!(entry_id = %chosen.id, ?mode, "rotation picked entry");
        let new_state = RotationState {
            last_entry_id: chosen.id.clone(),
            last_shown_at: now,
        };
        Some((chosen, new_state))
    }

    /// Deterministic order: `rotation_order`, ties broken by id.
    fn ordered(candidates: &[CampaignEntry]) -> Vec<&CampaignEntry> {
        let mut ordered: Vec<&CampaignEntry> = candidates.iter().collect();
        ordered.sort_by(|a, b| {
            a.rotation_order
                .cmp(&b.rotation_order)
                .then_with(|| a.id.cmp(&b.id))
        });
        ordered
    }

    fn next_sequential<'a>(
        candidates: &'a [CampaignEntry],
        state: Option<&RotationState>,
    ) -> &'a CampaignEntry {
        let ordered = Self::ordered(candidates);
        let next_index = state
            .and_then(|s| ordered.iter().position(|e| e.id == s.last_entry_id))
            .map(|i| (i + 1) % ordered.len())
            // Unknown or missing last entry (first pick, or the entry was
            // removed since): start from the beginning.
            .unwrap_or(0);
        ordered[next_index]
    }

    fn next_weighted<'a, R: Rng>(candidates: &'a [CampaignEntry], rng: &mut R) -> &'a CampaignEntry {
        let total: u64 = candidates.iter().map(|e| e.effective_weight() as u64).sum();
        let mut draw = rng.random_range(0..total);
        for entry in candidates {
            let weight = entry.effective_weight() as u64;
            if draw < weight {
                return entry;
            }
            draw -= weight;
        }
        // Unreachable: draw < total and the loop consumes exactly total.
        &candidates[candidates.len() - 1]
    }
}
