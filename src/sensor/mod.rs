//! Radio sensors: the capability contract shared by the Bluetooth and Wi-Fi
//! feeds, plus the stop-token plumbing their worker threads use.

pub mod bluetooth;
pub mod command;
pub mod process;
pub mod wifi;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::core::errors::Result;
use crate::core::types::{Reading, SensorSource};

pub use bluetooth::{BluetoothSensor, BtmonParser};
pub use command::CommandSpec;
pub use process::SupervisedChild;
pub use wifi::{ScanTiming, WifiSensor, parse_iw_scan};

/// Destination for readings. Delivery is synchronous: `submit` returns once
/// the reading has been fully processed.
pub trait ReadingSink: Send + Sync {
    fn submit(&self, reading: Reading);
}

/// Lifecycle contract for one sensor instance.
///
/// An instance is started at most once. The supervisor replaces stalled
/// sensors with fresh instances built by a [`SensorFactory`].
pub trait Sensor: Send {
    fn source(&self) -> SensorSource;

    /// Launch the worker thread (and any subordinate process).
    fn start(&mut self) -> Result<()>;

    /// Request shutdown and forcibly release subordinate processes.
    /// Safe to call repeatedly and after the worker already exited.
    fn stop(&mut self);

    /// Whether the worker thread is still running.
    fn is_running(&self) -> bool;
}

/// Builds a fresh sensor instance for each (re)start.
pub type SensorFactory = Box<dyn FnMut() -> Box<dyn Sensor> + Send>;

// ──────────────────── stop tokens ────────────────────

/// Controller side of a cooperative stop request.
#[derive(Debug)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
    wake: Option<Sender<()>>,
}

/// Worker side: a running flag plus a channel that wakes timed pauses early.
#[derive(Debug, Clone)]
pub struct StopToken {
    running: Arc<AtomicBool>,
    wake: Receiver<()>,
}

/// Create a linked handle/token pair in the running state.
#[must_use]
pub fn stop_pair() -> (StopHandle, StopToken) {
    let running = Arc::new(AtomicBool::new(true));
    let (tx, rx) = crossbeam_channel::bounded(0);
    (
        StopHandle {
            running: Arc::clone(&running),
            wake: Some(tx),
        },
        StopToken { running, wake: rx },
    )
}

impl StopHandle {
    /// Clear the running flag and wake any paused worker. Idempotent.
    pub fn request_stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.take();
    }

    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        !self.running.load(Ordering::SeqCst)
    }
}

impl Drop for StopHandle {
    fn drop(&mut self) {
        self.request_stop();
    }
}

impl StopToken {
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`. Returns `false` if a stop was requested first.
    #[must_use]
    pub fn pause(&self, duration: Duration) -> bool {
        match self.wake.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => self.is_running(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn pause_runs_full_duration_without_stop() {
        let (_handle, token) = stop_pair();
        let started = Instant::now();
        assert!(token.pause(Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn stop_wakes_a_paused_worker() {
        let (mut handle, token) = stop_pair();
        let worker = std::thread::spawn(move || {
            let started = Instant::now();
            let still_running = token.pause(Duration::from_secs(30));
            (still_running, started.elapsed())
        });
        std::thread::sleep(Duration::from_millis(20));
        handle.request_stop();
        handle.request_stop();

        let (still_running, waited) = worker.join().expect("worker joins");
        assert!(!still_running);
        assert!(waited < Duration::from_secs(5));
        assert!(handle.is_stop_requested());
    }
}
