//! Configuration snapshot, defaults, file loading, and hot-reload handle.
//!
//! The daemon reads one immutable [`Config`] per decision. Reloads build a new
//! snapshot and swap it into the [`ConfigHandle`] in a single step, so
//! concurrent readers see either the old or the new configuration, never a mix.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::core::errors::{Result, SentryError};
use crate::core::types::{is_mac_like, normalize_mac};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/proximity-sentry/config.json";

/// Full daemon configuration. Every field is optional in the file; missing
/// fields take the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Trusted hardware address (uppercase) -> display name.
    pub whitelist: HashMap<String, String>,
    /// Minimum dB increase between consecutive readings that counts as approach.
    pub approach_delta: i32,
    /// Seconds. Reserved for windowed-delta logic; not read by fusion.
    pub approach_window: f64,
    /// Seconds without a Bluetooth reading before the radio is reset.
    pub watchdog_timeout: f64,
    pub wifi_interface: String,
    /// Alerts require a reading strictly stronger than this floor (dBm).
    pub rssi_threshold_alert: i32,
    /// Adapter passed to `hciconfig <adapter> reset`.
    pub bluetooth_adapter: String,
    /// Prefix privileged commands with `sudo`.
    pub use_sudo: bool,
    /// Seconds between alerts for the same device. `0` re-alerts on every
    /// qualifying reading.
    pub alert_cooldown: f64,
    pub max_tracked_devices: usize,
    pub event_queue_capacity: usize,
    /// External presentation command; the alert message is appended as the
    /// last argument.
    pub alert_command: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            whitelist: HashMap::new(),
            approach_delta: 5,
            approach_window: 10.0,
            watchdog_timeout: 10.0,
            wifi_interface: "wlan0".to_string(),
            rssi_threshold_alert: -85,
            bluetooth_adapter: "hci0".to_string(),
            use_sudo: true,
            alert_cooldown: 0.0,
            max_tracked_devices: 4096,
            event_queue_capacity: 1024,
            alert_command: None,
        }
    }
}

impl Config {
    /// Load, normalize, and validate a config file.
    ///
    /// `.toml` files are parsed as TOML, everything else as JSON.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SentryError::MissingConfig {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path).map_err(|source| SentryError::io(path, source))?;
        let config = Self::parse(&raw, ConfigFormat::from_path(path))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, falling back to defaults on any failure. Never panics.
    #[must_use]
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => {
                info!(path = %path.display(), "configuration loaded");
                config
            }
            Err(SentryError::MissingConfig { .. }) => {
                warn!(path = %path.display(), "config not found, using defaults");
                Self::default()
            }
            Err(err) => {
                error!(path = %path.display(), code = err.code(), error = %err, "config load failed, using defaults");
                Self::default()
            }
        }
    }

    /// Parse config text and canonicalize whitelist addresses. Entries that
    /// are not hardware addresses are dropped, keeping the rest trusted.
    pub fn parse(raw: &str, format: ConfigFormat) -> Result<Self> {
        let mut config: Self = match format {
            ConfigFormat::Toml => toml::from_str(raw)?,
            ConfigFormat::Json => {
                serde_json::from_str(raw).map_err(|err| SentryError::ConfigParse {
                    context: "json",
                    details: err.to_string(),
                })?
            }
        };
        config.whitelist = config
            .whitelist
            .into_iter()
            .filter_map(|(mac, name)| {
                if is_mac_like(&mac) {
                    Some((normalize_mac(&mac), name))
                } else {
                    warn!(entry = %mac, name = %name, "whitelist entry is not a hardware address, ignored");
                    None
                }
            })
            .collect();
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |details: String| -> Result<()> { Err(SentryError::InvalidConfig { details }) };

        if self.approach_delta < 1 {
            return invalid(format!(
                "approach_delta must be >= 1, got {}",
                self.approach_delta
            ));
        }
        if !(self.watchdog_timeout.is_finite() && self.watchdog_timeout > 0.0) {
            return invalid(format!(
                "watchdog_timeout must be > 0 seconds, got {}",
                self.watchdog_timeout
            ));
        }
        if !(self.approach_window.is_finite() && self.approach_window >= 0.0) {
            return invalid(format!(
                "approach_window must be >= 0 seconds, got {}",
                self.approach_window
            ));
        }
        if !(self.alert_cooldown.is_finite() && self.alert_cooldown >= 0.0) {
            return invalid(format!(
                "alert_cooldown must be >= 0 seconds, got {}",
                self.alert_cooldown
            ));
        }
        if self.wifi_interface.trim().is_empty() {
            return invalid("wifi_interface must not be empty".to_string());
        }
        if self.bluetooth_adapter.trim().is_empty() {
            return invalid("bluetooth_adapter must not be empty".to_string());
        }
        if self.max_tracked_devices == 0 {
            return invalid("max_tracked_devices must be >= 1".to_string());
        }
        if self.event_queue_capacity == 0 {
            return invalid("event_queue_capacity must be >= 1".to_string());
        }
        if self.alert_command.as_ref().is_some_and(Vec::is_empty) {
            return invalid("alert_command must name a program when set".to_string());
        }
        if let Some(bad) = self.whitelist.keys().find(|mac| !is_mac_like(mac)) {
            return invalid(format!("whitelist entry {bad:?} is not a hardware address"));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_whitelisted(&self, mac: &str) -> bool {
        self.whitelist.contains_key(mac)
    }

    #[must_use]
    pub fn watchdog_timeout(&self) -> Duration {
        secs_or(self.watchdog_timeout, Duration::from_secs(10))
    }

    /// Wi-Fi scans are slower, so the Wi-Fi grace period is three timeouts.
    #[must_use]
    pub fn wifi_watchdog_timeout(&self) -> Duration {
        self.watchdog_timeout() * 3
    }

    /// `None` when alerting has no cooldown.
    #[must_use]
    pub fn alert_cooldown(&self) -> Option<Duration> {
        let cooldown = secs_or(self.alert_cooldown, Duration::ZERO);
        (!cooldown.is_zero()).then_some(cooldown)
    }

    /// Render as pretty JSON (the canonical on-disk format).
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn secs_or(secs: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(fallback)
}

/// On-disk config syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Json,
        }
    }
}

// ──────────────────── hot-reload handle ────────────────────

/// Shared, atomically replaceable configuration snapshot.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<Config>>>,
    source: Option<PathBuf>,
}

impl ConfigHandle {
    /// Handle over a fixed in-memory config (no reload source).
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
            source: None,
        }
    }

    /// Load from `path` (falling back to defaults) and remember the path for reloads.
    #[must_use]
    pub fn from_file(path: &Path) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(Config::load_or_default(path)))),
            source: Some(path.to_path_buf()),
        }
    }

    /// Current snapshot. Cheap: clones an `Arc`.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Config> {
        Arc::clone(&self.current.read())
    }

    /// Swap in a new snapshot.
    pub fn replace(&self, config: Config) {
        *self.current.write() = Arc::new(config);
    }

    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Re-read the source file. On failure the current snapshot is kept.
    pub fn reload(&self) -> Result<()> {
        let Some(path) = self.source.as_deref() else {
            return Err(SentryError::Runtime {
                details: "config handle has no source file to reload".to_string(),
            });
        };
        let config = Config::load(path)?;
        self.replace(config);
        info!(path = %path.display(), "configuration reloaded");
        Ok(())
    }
}
