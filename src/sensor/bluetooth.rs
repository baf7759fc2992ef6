//! Passive Bluetooth sensor streaming `btmon` output.
//!
//! `btmon` prints an address line for each advertising report and, a few
//! lines later, its RSSI. The parser pairs each RSSI with the most recent
//! unconsumed address and then forgets that address, so an RSSI line from an
//! unrelated block can never be attributed to a stale address.

use std::io::{BufRead as _, BufReader};
use std::process::ChildStdout;
use std::sync::{Arc, LazyLock};
use std::thread::JoinHandle;

use regex::Regex;
use tracing::{debug, error, info, warn};

use super::command::CommandSpec;
use super::process::{SupervisedChild, TERMINATE_GRACE};
use super::{ReadingSink, Sensor, StopHandle, StopToken, stop_pair};
use crate::core::config::Config;
use crate::core::errors::{Result, SentryError};
use crate::core::types::{Reading, SensorSource};

static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Address:\s+([0-9A-Fa-f]{2}(?::[0-9A-Fa-f]{2}){5})").expect("address pattern")
});
static RSSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"RSSI:\s+(-?\d+)\s+dBm").expect("rssi pattern"));

// ──────────────────── parser ────────────────────

/// Line-at-a-time `btmon` parser.
#[derive(Debug, Default, Clone)]
pub struct BtmonParser {
    pending: Option<String>,
}

impl BtmonParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one output line. Returns `(address, rssi)` when the line completes a pair.
    pub fn feed_line(&mut self, line: &str) -> Option<(String, i32)> {
        if let Some(caps) = ADDRESS_RE.captures(line) {
            self.pending = Some(caps[1].to_ascii_uppercase());
            return None;
        }
        let caps = RSSI_RE.captures(line)?;
        if self.pending.is_none() {
            return None;
        }
        let rssi = caps[1].parse::<i32>().ok()?;
        self.pending.take().map(|mac| (mac, rssi))
    }

    /// Address waiting for its RSSI line, if any.
    #[must_use]
    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }
}

// ──────────────────── sensor ────────────────────

/// Streams readings from a long-running monitor process.
pub struct BluetoothSensor {
    command: CommandSpec,
    sink: Arc<dyn ReadingSink>,
    child: Option<SupervisedChild>,
    stop: Option<StopHandle>,
    worker: Option<JoinHandle<()>>,
}

impl BluetoothSensor {
    #[must_use]
    pub fn new(command: CommandSpec, sink: Arc<dyn ReadingSink>) -> Self {
        Self {
            command,
            sink,
            child: None,
            stop: None,
            worker: None,
        }
    }

    /// Sensor running `btmon -t -T` per the configuration.
    #[must_use]
    pub fn from_config(config: &Config, sink: Arc<dyn ReadingSink>) -> Self {
        Self::new(Self::monitor_command(config.use_sudo), sink)
    }

    #[must_use]
    pub fn monitor_command(use_sudo: bool) -> CommandSpec {
        CommandSpec::privileged(use_sudo, "btmon", ["-t", "-T"])
    }

    #[must_use]
    pub fn command(&self) -> &CommandSpec {
        &self.command
    }
}

impl Sensor for BluetoothSensor {
    fn source(&self) -> SensorSource {
        SensorSource::Bluetooth
    }

    fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(SentryError::Runtime {
                details: "bluetooth sensor instance already started".to_string(),
            });
        }
        let (child, stdout) = SupervisedChild::spawn_piped("bluetooth", &self.command)?;
        let (handle, token) = stop_pair();
        let sink = Arc::clone(&self.sink);
        let worker_child = child.clone();

        let worker = std::thread::Builder::new()
            .name("sentry-bluetooth".to_string())
            .spawn(move || read_loop(stdout, sink.as_ref(), &token, &worker_child))
            .map_err(|err| {
                child.terminate(TERMINATE_GRACE);
                SentryError::Runtime {
                    details: format!("failed to spawn bluetooth worker thread: {err}"),
                }
            })?;

        info!(command = %self.command, pid = ?child.pid(), "bluetooth sensor started");
        self.child = Some(child);
        self.stop = Some(handle);
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stop) = self.stop.as_mut() {
            stop.request_stop();
        }
        // Killing the monitor closes its stdout, which unblocks the reader.
        if let Some(child) = &self.child {
            child.terminate(TERMINATE_GRACE);
        }
    }

    fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|worker| !worker.is_finished())
    }
}

impl Drop for BluetoothSensor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_loop(
    stdout: ChildStdout,
    sink: &dyn ReadingSink,
    token: &StopToken,
    child: &SupervisedChild,
) {
    let mut parser = BtmonParser::new();
    for line in BufReader::new(stdout).lines() {
        if !token.is_running() {
            break;
        }
        match line {
            Ok(line) => {
                if let Some((mac, rssi)) = parser.feed_line(&line) {
                    sink.submit(Reading::new(&mac, rssi, SensorSource::Bluetooth));
                }
            }
            Err(source) => {
                let err = SentryError::SensorIo {
                    sensor: "bluetooth",
                    source,
                };
                error!(code = err.code(), error = %err, "SENTRY: BT worker died");
                break;
            }
        }
    }

    if token.is_running() {
        warn!("bluetooth monitor output ended; waiting for watchdog restart");
    } else {
        debug!("bluetooth reader stopped");
    }
    child.terminate(TERMINATE_GRACE);
}
