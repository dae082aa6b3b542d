//! Stuck detection.
//!
//! A pure monitoring state machine: it watches playback position and a
//! general activity timestamp, and fires injected callbacks when either
//! stops moving. It never performs recovery itself; the owner decides what
//! skipping or reloading means and resets the baseline afterwards.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Recovery callbacks, injected by the owning application.
pub struct StuckCallbacks {
    pub on_video_stuck: Box<dyn Fn() + Send + Sync>,
    pub on_page_stuck: Box<dyn Fn() + Send + Sync>,
}

/// Thresholds and cadence for the detector.
#[derive(Debug, Clone)]
pub struct StuckDetectorConfig {
    /// How often [`StuckDetector::check`] is expected to run.
    pub check_interval: Duration,
    /// Stalled playback duration that triggers `on_video_stuck`.
    pub video_stall_threshold: Duration,
    /// Inactivity duration that triggers `on_page_stuck`.
    pub page_inactivity_threshold: Duration,
}

impl Default for StuckDetectorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            video_stall_threshold: Duration::from_secs(30),
            page_inactivity_threshold: Duration::from_secs(300),
        }
    }
}

/// Detector state: only timestamps and thresholds, no playback access.
///
/// Every mutator takes the current instant instead of reading the clock
/// itself, so one synthetic timeline drives it deterministically.
pub struct StuckDetector {
    config: StuckDetectorConfig,
    callbacks: StuckCallbacks,
    /// Last observed playback position in seconds, with observation time.
    last_position: Option<(f64, Instant)>,
    /// Accumulated time with no position advance.
    stalled_for: Duration,
    playing: bool,
    last_activity: Instant,
}

impl StuckDetector {
    pub fn new(config: StuckDetectorConfig, callbacks: StuckCallbacks, now: Instant) -> Self {
        Self {
            config,
            callbacks,
            last_position: None,
            stalled_for: Duration::ZERO,
            playing: false,
            last_activity: now,
        }
    }

    /// Feed the current playback position; `playing` is false while paused
    /// or when no video is on screen.
    pub fn report_position(&mut self, position_secs: f64, playing: bool, now: Instant) {
        self.playing = playing;
        match self.last_position {
            Some((prev, _)) if (position_secs - prev).abs() < f64::EPSILON => {
                // Position unchanged; the stall accumulator grows in check().
            }
            _ => {
                self.last_position = Some((position_secs, now));
                self.stalled_for = Duration::ZERO;
            }
        }
    }

    /// Record general device activity (user input, content refresh, render
    /// tick).
    pub fn touch_activity(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Reset the baseline, e.g. after resolved content changed or the owner
    /// performed a recovery action.
    pub fn reset(&mut self, now: Instant) {
        self.last_position = None;
        self.stalled_for = Duration::ZERO;
        self.playing = false;
        self.last_activity = now;
        debug!("stuck detector baseline reset");
    }

    /// Run one check cycle. Call on the configured interval.
    pub fn check(&mut self, now: Instant) {
        if self.playing
            && let Some((_, observed_at)) = self.last_position
        {
            let stalled = now.saturating_duration_since(observed_at);
            if stalled >= self.config.video_stall_threshold {
                warn!(
                    stalled_secs = stalled.as_secs(),
                    "video playback stalled, invoking recovery callback"
                );
                (self.callbacks.on_video_stuck)();
                // Reset the accumulator so the callback fires once per
                // stall, not on every subsequent check.
                self.last_position = Some((self.last_position.unwrap().0, now));
                self.stalled_for = Duration::ZERO;
            } else {
                self.stalled_for = stalled;
            }
        }

        let inactive = now.saturating_duration_since(self.last_activity);
        if inactive >= self.config.page_inactivity_threshold {
            warn!(
                inactive_secs = inactive.as_secs(),
                "no device activity, invoking recovery callback"
            );
            (self.callbacks.on_page_stuck)();
            self.last_activity = now;
        }
    }

    /// Current accumulated stall time, for diagnostics.
    pub fn stalled_for(&self) -> Duration {
        self.stalled_for
    }
}
