//! Device-side content engine for networked signage players.
//!
//! Resolves what a device should display right now (overrides, campaigns,
//! schedules, fallback), keeps it playable offline, and maintains the
//! management-backend session: heartbeats, remote commands and buffered
//! telemetry.

pub mod backend;
pub mod cache;
pub mod commands;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod resolver;
pub mod rotation;
pub mod schedule;
pub mod session;
pub mod stuck;

pub use error::{Error, Result};
