//! Bounded pending-events queue.
//!
//! Telemetry captured while offline waits here until a heartbeat flushes
//! it. The queue is capped by count; once full, the oldest lowest-criticality
//! event makes room first, so an error event survives a flood of heartbeat
//! noise.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::TelemetryEvent;

/// FIFO queue with criticality-aware overflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventQueue {
    max_events: usize,
    events: Vec<TelemetryEvent>,
}

impl EventQueue {
    pub fn new(max_events: usize) -> Self {
        Self {
            max_events,
            events: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Append an event, evicting to stay within the bound.
    ///
    /// Returns `false` when the event was dropped instead (queue full of
    /// strictly more critical events).
    pub fn push(&mut self, event: TelemetryEvent) -> bool {
        if self.max_events == 0 {
            return false;
        }
        if self.events.len() >= self.max_events {
            // Oldest event of the lowest criticality present is the victim.
            let victim = self
                .events
                .iter()
                .enumerate()
                .min_by_key(|(idx, e)| (e.criticality, *idx))
                .map(|(idx, e)| (idx, e.criticality));
            match victim {
                Some((idx, crit)) if crit <= event.criticality => {
                    let dropped = self.events.remove(idx);
                    debug!(
                        dropped = ?dropped.kind,
                        incoming = ?event.kind,
                        "pending-events queue full, dropped oldest low-criticality event"
                    );
                }
                _ => {
                    debug!(
                        incoming = ?event.kind,
                        "pending-events queue full of higher-criticality events, dropping incoming"
                    );
                    return false;
                }
            }
        }
        self.events.push(event);
        true
    }

    /// Take every queued event, oldest first.
    pub fn drain(&mut self) -> Vec<TelemetryEvent> {
        std::mem::take(&mut self.events)
    }

    /// Copy of the queue contents, oldest first.
    pub fn snapshot(&self) -> Vec<TelemetryEvent> {
        self.events.clone()
    }

    /// Put back events whose flush failed, preserving their original order
    /// ahead of anything queued meanwhile.
    pub fn requeue(&mut self, mut events: Vec<TelemetryEvent>) {
        events.append(&mut self.events);
        self.events = events;
        // Re-apply the bound after the merge.
        while self.events.len() > self.max_events {
            let victim = self
                .events
                .iter()
                .enumerate()
                .min_by_key(|(idx, e)| (e.criticality, *idx))
                .map(|(idx, _)| idx);
            match victim {
                Some(idx) => {
                    self.events.remove(idx);
                }
                None => break,
            }
        }
    }
}
