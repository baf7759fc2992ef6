//! Fusion engine: per-device signal tracking and approach detection.
//!
//! Every reading refreshes its sensor's heartbeat first, then flows through
//! whitelist filtering, baseline creation, and the dual approach rule
//! (`delta >= approach_delta` and `rssi > rssi_threshold_alert`).
//!
//! Readings arrive concurrently from the Bluetooth and Wi-Fi threads. The
//! device table and the heartbeats each sit behind their own mutex, so the
//! supervisor can read heartbeats without waiting on tracking work.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::alert::AlertEvent;
use super::queue::EventQueue;
use crate::core::config::ConfigHandle;
use crate::core::types::{Reading, SensorSource, normalize_mac};
use crate::sensor::ReadingSink;

/// Number of recent samples kept per device.
pub const HISTORY_LEN: usize = 5;

// ──────────────────── tracking state ────────────────────

/// Tracking state for one non-whitelisted device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub mac_address: String,
    pub last_signal_strength: i32,
    pub last_seen_at: Instant,
    /// Most recent samples, oldest first. Never longer than [`HISTORY_LEN`].
    pub signal_history: VecDeque<i32>,
    pub last_alert_at: Option<Instant>,
}

impl DeviceRecord {
    fn first_sighting(mac_address: String, signal_strength: i32, now: Instant) -> Self {
        let mut signal_history = VecDeque::with_capacity(HISTORY_LEN + 1);
        signal_history.push_back(signal_strength);
        Self {
            mac_address,
            last_signal_strength: signal_strength,
            last_seen_at: now,
            signal_history,
            last_alert_at: None,
        }
    }

    /// Record a new sample and return the change from the previous one.
    fn observe(&mut self, signal_strength: i32, now: Instant) -> i32 {
        let delta = signal_strength.saturating_sub(self.last_signal_strength);
        self.last_signal_strength = signal_strength;
        self.last_seen_at = now;
        self.signal_history.push_back(signal_strength);
        while self.signal_history.len() > HISTORY_LEN {
            self.signal_history.pop_front();
        }
        delta
    }

    fn in_cooldown(&self, cooldown: Option<Duration>, now: Instant) -> bool {
        match (cooldown, self.last_alert_at) {
            (Some(window), Some(last)) => now.saturating_duration_since(last) < window,
            _ => false,
        }
    }
}

/// Time of the last delivered reading, per sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeats {
    pub bluetooth: Instant,
    pub wifi: Instant,
}

impl Heartbeats {
    fn starting_at(now: Instant) -> Self {
        Self {
            bluetooth: now,
            wifi: now,
        }
    }

    #[must_use]
    pub const fn get(&self, source: SensorSource) -> Instant {
        match source {
            SensorSource::Bluetooth => self.bluetooth,
            SensorSource::Wifi => self.wifi,
        }
    }

    fn set(&mut self, source: SensorSource, at: Instant) {
        match source {
            SensorSource::Bluetooth => self.bluetooth = at,
            SensorSource::Wifi => self.wifi = at,
        }
    }
}

/// What a single reading did to the engine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Trusted device; discarded.
    Whitelisted,
    /// First sighting; baseline recorded, never alerts.
    Baseline,
    /// Tracked update that did not meet the alert rule.
    Tracked { delta: i32 },
    /// Met the alert rule inside the device's alert cooldown.
    Suppressed { delta: i32 },
    /// Alert raised and queued.
    Alerted(AlertEvent),
}

// ──────────────────── engine ────────────────────

/// Converts the reading stream into approach alerts.
#[derive(Debug)]
pub struct FusionEngine {
    config: ConfigHandle,
    queue: Arc<EventQueue>,
    devices: Mutex<HashMap<String, DeviceRecord>>,
    heartbeats: Mutex<Heartbeats>,
}

impl FusionEngine {
    /// Create an engine that publishes alerts to `queue`. Both heartbeats start at now.
    #[must_use]
    pub fn new(config: ConfigHandle, queue: Arc<EventQueue>) -> Self {
        Self {
            config,
            queue,
            devices: Mutex::new(HashMap::new()),
            heartbeats: Mutex::new(Heartbeats::starting_at(Instant::now())),
        }
    }

    /// Process a reading stamped with the current time.
    pub fn process(&self, reading: &Reading) -> ProcessOutcome {
        self.process_at(reading, Instant::now())
    }

    /// Process a reading observed at `now`.
    pub fn process_at(&self, reading: &Reading, now: Instant) -> ProcessOutcome {
        self.heartbeats.lock().set(reading.source, now);

        let mac = normalize_mac(&reading.mac_address);
        let rssi = reading.signal_strength;
        let config = self.config.snapshot();

        if config.is_whitelisted(&mac) {
            return ProcessOutcome::Whitelisted;
        }

        let mut devices = self.devices.lock();
        let Some(record) = devices.get_mut(&mac) else {
            if devices.len() >= config.max_tracked_devices {
                evict_stalest(&mut devices);
            }
            debug!(mac = %mac, rssi, source = %reading.source, "new device baseline");
            devices.insert(mac.clone(), DeviceRecord::first_sighting(mac, rssi, now));
            return ProcessOutcome::Baseline;
        };

        let delta = record.observe(rssi, now);
        if delta < config.approach_delta || rssi <= config.rssi_threshold_alert {
            return ProcessOutcome::Tracked { delta };
        }
        if record.in_cooldown(config.alert_cooldown(), now) {
            debug!(mac = %mac, delta, rssi, "approach inside alert cooldown, suppressed");
            return ProcessOutcome::Suppressed { delta };
        }
        record.last_alert_at = Some(now);
        drop(devices);

        let event = AlertEvent::approach(&mac, delta, rssi);
        warn!(
            mac = %mac,
            delta,
            rssi,
            source = %reading.source,
            "SENTRY ALERT: {}",
            event.message
        );
        self.queue.push(event.clone());
        ProcessOutcome::Alerted(event)
    }

    /// Snapshot of one device's tracking record.
    #[must_use]
    pub fn device(&self, mac: &str) -> Option<DeviceRecord> {
        self.devices.lock().get(&normalize_mac(mac)).cloned()
    }

    #[must_use]
    pub fn tracked_devices(&self) -> usize {
        self.devices.lock().len()
    }

    #[must_use]
    pub fn heartbeats(&self) -> Heartbeats {
        *self.heartbeats.lock()
    }

    #[must_use]
    pub fn heartbeat(&self, source: SensorSource) -> Instant {
        self.heartbeats.lock().get(source)
    }

    /// Time since `source` last delivered a reading, measured at `now`.
    #[must_use]
    pub fn heartbeat_age(&self, source: SensorSource, now: Instant) -> Duration {
        now.saturating_duration_since(self.heartbeat(source))
    }

    /// Mark `source` alive at `at`. Used by the supervisor on (re)start.
    pub fn reset_heartbeat(&self, source: SensorSource, at: Instant) {
        self.heartbeats.lock().set(source, at);
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    #[must_use]
    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }
}

impl ReadingSink for FusionEngine {
    fn submit(&self, reading: Reading) {
        self.process(&reading);
    }
}

fn evict_stalest(devices: &mut HashMap<String, DeviceRecord>) {
    let stalest = devices
        .values()
        .min_by_key(|record| record.last_seen_at)
        .map(|record| record.mac_address.clone());
    if let Some(mac) = stalest {
        devices.remove(&mac);
        debug!(mac = %mac, "tracking table full, evicted stalest device");
    }
}
