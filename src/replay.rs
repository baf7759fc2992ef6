//! Offline replay of captured sensor output through a fresh fusion engine.
//!
//! Useful for checking why a capture did or did not alert: the same parsers
//! and the same engine the daemon uses, without radios or sudo.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::config::{Config, ConfigHandle};
use crate::core::types::{Reading, SensorSource};
use crate::fusion::{AlertEvent, EventQueue, FusionEngine, ProcessOutcome};
use crate::sensor::{BtmonParser, parse_iw_scan};

/// Spacing between replayed readings on the engine's clock.
pub const READING_SPACING: Duration = Duration::from_millis(100);

/// Result of a replay.
#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    pub source: SensorSource,
    pub readings: usize,
    pub alerts: Vec<AlertEvent>,
    pub whitelisted: usize,
    pub tracked_devices: usize,
}

/// Parse captured `btmon` or `iw scan` text into readings.
#[must_use]
pub fn readings_from_capture(source: SensorSource, capture: &str) -> Vec<Reading> {
    let pairs: Vec<(String, i32)> = match source {
        SensorSource::Bluetooth => {
            let mut parser = BtmonParser::new();
            capture
                .lines()
                .filter_map(|line| parser.feed_line(line))
                .collect()
        }
        SensorSource::Wifi => parse_iw_scan(capture),
    };
    pairs
        .into_iter()
        .map(|(mac, rssi)| Reading::new(&mac, rssi, source))
        .collect()
}

/// Feed `readings` through a new engine built from `config`.
///
/// Readings are stamped [`READING_SPACING`] apart so cooldowns behave as they
/// would for a live feed of the same cadence.
#[must_use]
pub fn replay(config: Config, source: SensorSource, readings: &[Reading]) -> ReplaySummary {
    let queue = Arc::new(EventQueue::new(config.event_queue_capacity));
    let engine = FusionEngine::new(ConfigHandle::new(config), queue);
    let start = Instant::now();
    let mut alerts = Vec::new();
    let mut whitelisted = 0;

    let mut at = start;
    for reading in readings {
        match engine.process_at(reading, at) {
            ProcessOutcome::Alerted(event) => alerts.push(event),
            ProcessOutcome::Whitelisted => whitelisted += 1,
            _ => {}
        }
        at += READING_SPACING;
    }

    ReplaySummary {
        source,
        readings: readings.len(),
        alerts,
        whitelisted,
        tracked_devices: engine.tracked_devices(),
    }
}
