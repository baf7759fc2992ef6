//! Signal fusion: per-device tracking, approach detection, alert hand-off.

pub mod alert;
pub mod engine;
pub mod queue;

pub use alert::{AlertEvent, AlertKind};
pub use engine::{DeviceRecord, FusionEngine, HISTORY_LEN, Heartbeats, ProcessOutcome};
pub use queue::EventQueue;
