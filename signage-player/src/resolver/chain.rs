//! Pure priority-chain evaluation.

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, warn};

use crate::domain::{
    Campaign, CampaignEntry, ContentRef, ContentSnapshot, ResolutionSource, Schedule,
    ScheduleEntry,
};
use crate::rotation::{RotationEngine, RotationState};
use crate::schedule::{WindowEvaluator, parse_tz};

/// Result of a chain evaluation: what to show, which tier decided, and the
/// rotation state to persist when a campaign rotated.
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    pub content: ContentRef,
    pub source: ResolutionSource,
    pub rotation: Option<(String, RotationState)>,
}

impl ChainOutcome {
    fn plain(content: ContentRef, source: ResolutionSource) -> Self {
        Self {
            content,
            source,
            rotation: None,
        }
    }
}

/// Evaluate the priority chain for one device snapshot.
///
/// `rotation_lookup` supplies the persisted rotation state per campaign id;
/// exactly one tier determines the outcome, `None` means nothing is
/// configured.
pub fn evaluate_chain<R: Rng>(
    snapshot: &ContentSnapshot,
    now: DateTime<Utc>,
    rotation_lookup: &dyn Fn(&str) -> Option<RotationState>,
    rng: &mut R,
) -> Option<ChainOutcome> {
    let device = &snapshot.device;
    let tz = parse_tz(&device.timezone).unwrap_or_else(|_| {
        warn!(device_id = %device.id, tz = %device.timezone, "invalid device timezone, using UTC");
        chrono_tz::UTC
    });

    // 1. Device manual override always wins.
    if let Some(content) = &device.override_content {
        return Some(ChainOutcome::plain(
            content.clone(),
            ResolutionSource::DeviceOverride,
        ));
    }

    // 2. Campaigns.
    if let Some(outcome) = pick_campaign(snapshot, now, tz, rotation_lookup, rng) {
        return Some(outcome);
    }

    // 3. Group manual override.
    if let Some(group) = &device.group
        && let Some(content) = &group.override_content
    {
        return Some(ChainOutcome::plain(
            content.clone(),
            ResolutionSource::GroupOverride,
        ));
    }

    // 4. Device schedule.
    if let Some(schedule) = &device.schedule
        && let Some(entry) = pick_schedule_entry(schedule, now, tz)
    {
        return Some(ChainOutcome::plain(
            entry.content.clone(),
            ResolutionSource::DeviceSchedule {
                entry_id: entry.id.clone(),
            },
        ));
    }

    // 5. Group schedule.
    if let Some(group) = &device.group
        && let Some(schedule) = &group.schedule
        && let Some(entry) = pick_schedule_entry(schedule, now, tz)
    {
        return Some(ChainOutcome::plain(
            entry.content.clone(),
            ResolutionSource::GroupSchedule {
                entry_id: entry.id.clone(),
            },
        ));
    }

    // 6. Static fallback.
    device.fallback_content.as_ref().map(|content| {
        ChainOutcome::plain(content.clone(), ResolutionSource::Fallback)
    })
}

/// Campaign tier: targeting, date range and per-entry windows, then
/// priority with most-recently-created breaking ties, then rotation among
/// the winner's eligible entries.
fn pick_campaign<R: Rng>(
    snapshot: &ContentSnapshot,
    now: DateTime<Utc>,
    tz: chrono_tz::Tz,
    rotation_lookup: &dyn Fn(&str) -> Option<RotationState>,
    rng: &mut R,
) -> Option<ChainOutcome> {
    let device = &snapshot.device;
    let group_id = device.group.as_ref().map(|g| g.id.as_str());
    let local_date = now.with_timezone(&tz).date_naive();

    let mut matching: Vec<(&Campaign, Vec<&CampaignEntry>)> = snapshot
        .campaigns
        .iter()
        .filter(|c| c.active && c.targets(&device.id, group_id) && c.covers_date(local_date))
        .filter_map(|c| {
            let eligible: Vec<&CampaignEntry> = c
                .entries
                .iter()
                .filter(|e| {
                    e.window
                        .as_ref()
                        .is_none_or(|w| WindowEvaluator::is_active(w, now, tz))
                })
                .collect();
            (!eligible.is_empty()).then_some((c, eligible))
        })
        .collect();

    matching.sort_by(|(a, _), (b, _)| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    let (winner, eligible) = matching.into_iter().next()?;

    let owned: Vec<CampaignEntry> = eligible.into_iter().cloned().collect();
    let state = rotation_lookup(&winner.id);
    let (chosen, new_state) =
        RotationEngine::next(winner.rotation, &owned, state.as_ref(), now, rng)?;

    debug!(campaign_id = %winner.id, entry_id = %chosen.id, "campaign tier matched");
    Some(ChainOutcome {
        content: chosen.content.clone(),
        source: ResolutionSource::Campaign {
            campaign_id: winner.id.clone(),
        },
        rotation: Some((winner.id.clone(), new_state)),
    })
}

/// Schedule tier: among active entries, highest priority wins; ties broken
/// by most specific (narrowest) date range, then by most recent creation.
fn pick_schedule_entry(
    schedule: &Schedule,
    now: DateTime<Utc>,
    tz: chrono_tz::Tz,
) -> Option<&ScheduleEntry> {
    schedule
        .entries
        .iter()
        .filter(|e| WindowEvaluator::is_active(&e.window, now, tz))
        .max_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| {
                    // Narrower date range is more specific, so reverse.
                    b.window
                        .date_range_days()
                        .cmp(&a.window.date_range_days())
                })
                .then_with(|| a.created_at.cmp(&b.created_at))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Device, Group, RotationMode, ScheduleWindow};
    use chrono::{NaiveDate, NaiveTime, TimeZone, Weekday};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashMap;

    fn all_days() -> Vec<Weekday> {
        vec![
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]
    }

    fn window(start: (u32, u32), end: (u32, u32)) -> ScheduleWindow {
        ScheduleWindow {
            days: all_days(),
            start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            start_date: None,
            end_date: None,
        }
    }

    fn schedule_entry(id: &str, priority: i32, w: ScheduleWindow) -> ScheduleEntry {
        ScheduleEntry {
            id: id.to_string(),
            content: ContentRef::new("scene", id),
            window: w,
            priority,
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn device() -> Device {
        Device {
            id: "d-1".into(),
            name: "lobby".into(),
            timezone: "UTC".into(),
            group: None,
            schedule: None,
            override_content: None,
            fallback_content: None,
            software_version: Some("1.0.0".into()),
        }
    }

    fn snapshot(device: Device, campaigns: Vec<Campaign>) -> ContentSnapshot {
        ContentSnapshot {
            device,
            campaigns,
            media_index: HashMap::new(),
            fetched_at: Utc::now(),
        }
    }

    fn campaign_entry(id: &str) -> CampaignEntry {
        CampaignEntry {
            id: id.to_string(),
            content: ContentRef::new("scene", id),
            window: None,
            weight: 1,
            rotation_order: 0,
        }
    }

    fn campaign(id: &str, priority: i32, entries: Vec<CampaignEntry>) -> Campaign {
        Campaign {
            id: id.to_string(),
            name: id.to_string(),
            start_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
            priority,
            active: true,
            device_targets: vec![],
            group_targets: vec![],
            rotation: RotationMode::Sequential,
            entries,
            created_at: Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap(),
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 18, 12, 0, 0).unwrap()
    }

    fn eval(snapshot: &ContentSnapshot, now: DateTime<Utc>) -> Option<ChainOutcome> {
        let mut rng = StdRng::seed_from_u64(1);
        evaluate_chain(snapshot, now, &|_| None, &mut rng)
    }

    #[test]
    fn nothing_configured_yields_none() {
        assert!(eval(&snapshot(device(), vec![]), noon()).is_none());
    }

    #[test]
    fn device_override_beats_everything() {
        let mut d = device();
        d.override_content = Some(ContentRef::new("scene", "override"));
        d.fallback_content = Some(ContentRef::new("scene", "fallback"));
        let s = snapshot(d, vec![campaign("c-1", 99, vec![campaign_entry("e-1")])]);
        let outcome = eval(&s, noon()).unwrap();
        assert_eq!(outcome.content.target_id, "override");
        assert_eq!(outcome.source, ResolutionSource::DeviceOverride);
    }

    #[test]
    fn campaign_beats_group_override_and_schedules() {
        let mut d = device();
        d.group = Some(Group {
            id: "g-1".into(),
            name: "floor".into(),
            override_content: Some(ContentRef::new("scene", "group-override")),
            schedule: None,
        });
        let s = snapshot(d, vec![campaign("c-1", 0, vec![campaign_entry("e-1")])]);
        let outcome = eval(&s, noon()).unwrap();
        assert!(matches!(outcome.source, ResolutionSource::Campaign { .. }));
    }

    #[test]
    fn higher_priority_campaign_wins() {
        let s = snapshot(
            device(),
            vec![
                campaign("low", 1, vec![campaign_entry("e-low")]),
                campaign("high", 5, vec![campaign_entry("e-high")]),
            ],
        );
        let outcome = eval(&s, noon()).unwrap();
        assert_eq!(outcome.content.target_id, "e-high");
    }

    #[test]
    fn equal_priority_campaigns_tie_break_by_creation() {
        let mut older = campaign("older", 5, vec![campaign_entry("e-old")]);
        older.created_at = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let mut newer = campaign("newer", 5, vec![campaign_entry("e-new")]);
        newer.created_at = Utc.with_ymd_and_hms(2025, 5, 2, 0, 0, 0).unwrap();
        let s = snapshot(device(), vec![older, newer]);
        let outcome = eval(&s, noon()).unwrap();
        assert_eq!(outcome.content.target_id, "e-new");
    }

    #[test]
    fn campaign_outside_date_range_is_skipped() {
        let mut c = campaign("past", 5, vec![campaign_entry("e-1")]);
        c.end_date = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        let mut d = device();
        d.fallback_content = Some(ContentRef::new("scene", "fallback"));
        let s = snapshot(d, vec![c]);
        let outcome = eval(&s, noon()).unwrap();
        assert_eq!(outcome.source, ResolutionSource::Fallback);
    }

    #[test]
    fn campaign_entry_window_filters_entries() {
        let mut gated = campaign_entry("gated");
        gated.window = Some(window((0, 0), (6, 0))); // night only
        let open = campaign_entry("open");
        let s = snapshot(device(), vec![campaign("c-1", 1, vec![gated, open])]);
        let outcome = eval(&s, noon()).unwrap();
        assert_eq!(outcome.content.target_id, "open");
    }

    #[test]
    fn inactive_campaign_is_ignored() {
        let mut c = campaign("off", 5, vec![campaign_entry("e-1")]);
        c.active = false;
        assert!(eval(&snapshot(device(), vec![c]), noon()).is_none());
    }

    #[test]
    fn campaign_rotation_state_is_emitted() {
        let s = snapshot(
            device(),
            vec![campaign(
                "c-1",
                1,
                vec![campaign_entry("e-a"), campaign_entry("e-b")],
            )],
        );
        let outcome = eval(&s, noon()).unwrap();
        let (campaign_id, state) = outcome.rotation.unwrap();
        assert_eq!(campaign_id, "c-1");
        assert_eq!(state.last_entry_id, outcome.content.target_id);
    }

    #[test]
    fn schedule_priority_decides_among_active_entries() {
        let mut d = device();
        d.schedule = Some(Schedule {
            id: "s-1".into(),
            name: "weekday".into(),
            entries: vec![
                schedule_entry("low", 5, window((9, 0), (17, 0))),
                schedule_entry("high", 10, window((9, 0), (17, 0))),
                schedule_entry("inactive", 99, window((18, 0), (20, 0))),
            ],
        });
        let outcome = eval(&snapshot(d, vec![]), noon()).unwrap();
        assert_eq!(outcome.content.target_id, "high");
        assert_eq!(
            outcome.source,
            ResolutionSource::DeviceSchedule {
                entry_id: "high".into()
            }
        );
    }

    #[test]
    fn schedule_tie_breaks_by_narrower_date_range() {
        let mut narrow_window = window((9, 0), (17, 0));
        narrow_window.start_date = NaiveDate::from_ymd_opt(2025, 6, 18);
        narrow_window.end_date = NaiveDate::from_ymd_opt(2025, 6, 18);
        let mut d = device();
        d.schedule = Some(Schedule {
            id: "s-1".into(),
            name: "tie".into(),
            entries: vec![
                schedule_entry("broad", 10, window((9, 0), (17, 0))),
                schedule_entry("narrow", 10, narrow_window),
            ],
        });
        let outcome = eval(&snapshot(d, vec![]), noon()).unwrap();
        assert_eq!(outcome.content.target_id, "narrow");
    }

    #[test]
    fn group_schedule_is_consulted_after_device_schedule() {
        let mut d = device();
        d.group = Some(Group {
            id: "g-1".into(),
            name: "floor".into(),
            override_content: None,
            schedule: Some(Schedule {
                id: "s-g".into(),
                name: "group".into(),
                entries: vec![schedule_entry("g-entry", 1, window((9, 0), (17, 0)))],
            }),
        });
        let outcome = eval(&snapshot(d, vec![]), noon()).unwrap();
        assert_eq!(
            outcome.source,
            ResolutionSource::GroupSchedule {
                entry_id: "g-entry".into()
            }
        );
    }

    #[test]
    fn invalid_timezone_falls_back_to_utc() {
        let mut d = device();
        d.timezone = "Not/AZone".into();
        d.schedule = Some(Schedule {
            id: "s-1".into(),
            name: "any".into(),
            entries: vec![schedule_entry("e-1", 1, window((9, 0), (17, 0)))],
        });
        // Noon UTC falls inside 09:00-17:00 when UTC is assumed.
        assert!(eval(&snapshot(d, vec![]), noon()).is_some());
    }
}
