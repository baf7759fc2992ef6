//! Alert events handed from the fusion engine to the presentation layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Address used for synthetic alerts injected to exercise the presentation path.
pub const SIMULATED_MAC: &str = "FF:FF:FF:FF:FF:FF";
/// Signal strength reported on synthetic alerts.
pub const SIMULATED_RSSI: i32 = -50;

/// Event category. Only approach alerts exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Alert,
}

/// Immutable alert payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub mac_address: String,
    pub signal_strength: i32,
    /// True for synthetic alerts that bypassed sensors and fusion.
    #[serde(default)]
    pub simulated: bool,
}

impl AlertEvent {
    /// Approach alert for a device whose signal rose by `delta` dB.
    #[must_use]
    pub fn approach(mac_address: &str, delta: i32, signal_strength: i32) -> Self {
        Self {
            kind: AlertKind::Alert,
            message: format!(
                "APPROACH DETECTED: Unknown Device ({mac_address}) | Delta: +{delta}dB | Signal: {signal_strength}dBm"
            ),
            timestamp: Utc::now(),
            mac_address: mac_address.to_string(),
            signal_strength,
            simulated: false,
        }
    }

    /// Synthetic alert for end-to-end testing of the presentation path.
    #[must_use]
    pub fn simulated() -> Self {
        Self {
            kind: AlertKind::Alert,
            message: "SIMULATED THREAT DETECTED (User Test)".to_string(),
            timestamp: Utc::now(),
            mac_address: SIMULATED_MAC.to_string(),
            signal_strength: SIMULATED_RSSI,
            simulated: true,
        }
    }
}
