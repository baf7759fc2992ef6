//! Daemon subsystem: sensor watchdog, alert presentation, signal handling,
//! and the main consumer loop.

#[cfg(feature = "daemon")]
pub mod loop_main;
pub mod presenter;
#[cfg(feature = "daemon")]
pub mod signals;
pub mod watchdog;

pub use presenter::{AlertPresenter, CommandPresenter, ConfiguredPresenter, LogPresenter};
pub use watchdog::{
    HciRadioReset, RadioReset, ResetReport, SensorState, SensorStatus, SupervisorHandle,
    WatchdogSupervisor,
};
