//! Shared value types: sensor sources, readings, hardware-address normalization.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which radio a reading came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorSource {
    /// Passive `btmon` stream.
    Bluetooth,
    /// Active `iw scan` cycles.
    Wifi,
}

impl SensorSource {
    /// Both sources, in supervision order.
    pub const ALL: [Self; 2] = [Self::Bluetooth, Self::Wifi];

    /// Stable lowercase name used in logs and CLI flags.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bluetooth => "bluetooth",
            Self::Wifi => "wifi",
        }
    }
}

impl fmt::Display for SensorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (address, signal strength) observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    /// Canonical uppercase hardware address.
    pub mac_address: String,
    /// Received signal strength in dBm.
    pub signal_strength: i32,
    pub source: SensorSource,
}

impl Reading {
    /// Build a reading, canonicalizing the address.
    #[must_use]
    pub fn new(mac_address: &str, signal_strength: i32, source: SensorSource) -> Self {
        Self {
            mac_address: normalize_mac(mac_address),
            signal_strength,
            source,
        }
    }
}

/// Canonical form of a hardware address: trimmed, uppercase.
#[must_use]
pub fn normalize_mac(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Whether `raw` looks like a colon-separated 6-octet hardware address.
#[must_use]
pub fn is_mac_like(raw: &str) -> bool {
    let raw = raw.trim();
    raw.len() == 17
        && raw.split(':').count() == 6
        && raw
            .split(':')
            .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()))
}
