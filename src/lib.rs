//! Proximity Sentry: fuses Bluetooth and Wi-Fi signal strength into approach
//! alerts for unknown devices, with a watchdog that keeps both radio sensors
//! alive.
//!
//! Data flows one way: sensors produce [`core::types::Reading`]s, the
//! [`fusion::FusionEngine`] turns them into [`fusion::AlertEvent`]s on a bounded
//! [`fusion::EventQueue`], and the daemon loop hands each event to an
//! [`daemon::AlertPresenter`]. The [`daemon::WatchdogSupervisor`] watches the
//! engine's per-source heartbeats and restarts stalled sensors.

pub mod core;
pub mod daemon;
pub mod fusion;
pub mod logger;
pub mod replay;
pub mod sensor;

#[cfg(feature = "cli")]
pub mod cli_app;
