//! Sensor watchdog: heartbeat polling, restarts, and Bluetooth radio reset.
//!
//! Each sensor moves `Running -> Restarting -> Running` whenever its heartbeat
//! goes stale. Bluetooth is considered stale after `watchdog_timeout` and gets
//! a hardware reset before the restart; Wi-Fi gets three timeouts of grace and
//! a plain restart.
//!
//! Restarts and heartbeat checks are not atomic with respect to each other.
//! The worst case is one redundant restart.

#![allow(missing_docs)]

use std::process::Stdio;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use process_control::{ChildExt as _, Control as _};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::core::config::ConfigHandle;
use crate::core::errors::{Result, SentryError};
use crate::core::types::SensorSource;
use crate::fusion::FusionEngine;
use crate::sensor::{
    CommandSpec, Sensor, SensorFactory, StopHandle, StopToken, stop_pair,
};

/// Period between heartbeat checks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Upper bound on a single reset command.
pub const RESET_STEP_TIMEOUT: Duration = Duration::from_secs(10);

// ──────────────────── radio reset ────────────────────

/// One step of a reset sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResetStep {
    pub description: String,
    pub done: bool,
    pub error: Option<String>,
}

/// Outcome of a best-effort reset sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    pub steps: Vec<ResetStep>,
}

impl ResetReport {
    pub fn step_ok(&mut self, description: impl Into<String>) {
        self.steps.push(ResetStep {
            description: description.into(),
            done: true,
            error: None,
        });
    }

    pub fn step_fail(&mut self, description: impl Into<String>, error: impl Into<String>) {
        self.steps.push(ResetStep {
            description: description.into(),
            done: false,
            error: Some(error.into()),
        });
    }

    /// True when every step succeeded.
    #[must_use]
    pub fn success(&self) -> bool {
        self.steps.iter().all(|step| step.done)
    }
}

/// Hardware-level recovery for a wedged radio. Must run every step even when
/// earlier ones fail.
pub trait RadioReset: Send {
    fn reset(&self) -> ResetReport;
}

/// `rfkill` power cycle followed by `hciconfig <adapter> reset`.
///
/// Commands are built from the live config on every reset, so a reload that
/// changes `use_sudo` or `bluetooth_adapter` applies to the next reset.
#[derive(Debug, Clone)]
pub struct HciRadioReset {
    config: ConfigHandle,
    overrides: Option<[CommandSpec; 3]>,
    settle_after_block: Duration,
    settle_after_unblock: Duration,
}

impl HciRadioReset {
    #[must_use]
    pub fn new(config: ConfigHandle) -> Self {
        Self {
            config,
            overrides: None,
            settle_after_block: Duration::from_secs(1),
            settle_after_unblock: Duration::from_secs(2),
        }
    }

    /// Replace the three commands (used to exercise the sequence in tests).
    #[must_use]
    pub fn with_commands(
        mut self,
        block: CommandSpec,
        unblock: CommandSpec,
        adapter_reset: CommandSpec,
    ) -> Self {
        self.overrides = Some([block, unblock, adapter_reset]);
        self
    }

    #[must_use]
    pub fn with_settle_times(mut self, after_block: Duration, after_unblock: Duration) -> Self {
        self.settle_after_block = after_block;
        self.settle_after_unblock = after_unblock;
        self
    }

    /// Block, unblock and adapter reset commands for the current config.
    #[must_use]
    pub fn commands(&self) -> [CommandSpec; 3] {
        if let Some(overrides) = &self.overrides {
            return overrides.clone();
        }
        let config = self.config.snapshot();
        let sudo = config.use_sudo;
        [
            CommandSpec::privileged(sudo, "rfkill", ["block", "bluetooth"]),
            CommandSpec::privileged(sudo, "rfkill", ["unblock", "bluetooth"]),
            CommandSpec::privileged(
                sudo,
                "hciconfig",
                [config.bluetooth_adapter.as_str(), "reset"],
            ),
        ]
    }
}

impl RadioReset for HciRadioReset {
    fn reset(&self) -> ResetReport {
        let [block, unblock, adapter_reset] = self.commands();
        let mut report = ResetReport::default();
        run_step(&mut report, "Disable radio", &block);
        std::thread::sleep(self.settle_after_block);
        run_step(&mut report, "Enable radio", &unblock);
        // Kernel re-initialization of the adapter.
        std::thread::sleep(self.settle_after_unblock);
        run_step(&mut report, "Reset adapter", &adapter_reset);
        report
    }
}

fn run_step(report: &mut ResetReport, description: &str, command: &CommandSpec) {
    match run_reset_command(command) {
        Ok(()) => {
            debug!(step = description, command = %command, "radio reset step ok");
            report.step_ok(description);
        }
        Err(err) => {
            error!(step = description, command = %command, error = %err, "SENTRY: adapter reset step failed");
            report.step_fail(description, err.to_string());
        }
    }
}

fn run_reset_command(command: &CommandSpec) -> Result<()> {
    let child = command
        .to_command()
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| SentryError::Runtime {
            details: format!("failed to run `{command}`: {err}"),
        })?;
    let output = child
        .controlled_with_output()
        .time_limit(RESET_STEP_TIMEOUT)
        .terminate_for_timeout()
        .wait()
        .map_err(|err| SentryError::Runtime {
            details: format!("failed waiting for `{command}`: {err}"),
        })?;
    match output {
        None => Err(SentryError::Runtime {
            details: format!("`{command}` timed out after {RESET_STEP_TIMEOUT:?}"),
        }),
        Some(output) if output.status.success() => Ok(()),
        Some(output) => Err(SentryError::Runtime {
            details: format!(
                "`{command}` exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }),
    }
}

// ──────────────────── supervision ────────────────────

/// Supervision state of one sensor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorState {
    Stopped,
    Running,
    Restarting,
}

/// Point-in-time view of one supervised sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorStatus {
    pub source: SensorSource,
    pub state: SensorState,
    pub restarts: u64,
    pub worker_alive: bool,
}

/// Which sensors a poll restarted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub bluetooth_restarted: bool,
    pub wifi_restarted: bool,
}

struct SensorSlot {
    source: SensorSource,
    factory: SensorFactory,
    current: Option<Box<dyn Sensor>>,
    state: SensorState,
    restarts: u64,
}

impl SensorSlot {
    fn new(source: SensorSource, factory: SensorFactory) -> Self {
        Self {
            source,
            factory,
            current: None,
            state: SensorState::Stopped,
            restarts: 0,
        }
    }

    /// Stop the current instance, refresh the heartbeat, start a new instance.
    fn launch(&mut self, engine: &FusionEngine, now: Instant) {
        self.halt();
        // A fresh stamp keeps the next poll from re-triggering before the new
        // instance delivers its first reading.
        engine.reset_heartbeat(self.source, now.max(Instant::now()));

        let mut sensor = (self.factory)();
        self.state = match sensor.start() {
            Ok(()) => {
                info!(source = %self.source, "sensor running");
                SensorState::Running
            }
            Err(err) => {
                error!(
                    source = %self.source,
                    code = err.code(),
                    error = %err,
                    "sensor failed to start; watchdog will retry"
                );
                SensorState::Stopped
            }
        };
        self.current = Some(sensor);
    }

    fn halt(&mut self) {
        if let Some(mut sensor) = self.current.take() {
            sensor.stop();
        }
        self.state = SensorState::Stopped;
    }

    fn status(&self) -> SensorStatus {
        SensorStatus {
            source: self.source,
            state: self.state,
            restarts: self.restarts,
            worker_alive: self.current.as_ref().is_some_and(|sensor| sensor.is_running()),
        }
    }
}

/// Keeps both sensors alive.
pub struct WatchdogSupervisor {
    engine: Arc<FusionEngine>,
    bluetooth: SensorSlot,
    wifi: SensorSlot,
    radio_reset: Box<dyn RadioReset>,
    poll_interval: Duration,
}

impl WatchdogSupervisor {
    #[must_use]
    pub fn new(
        engine: Arc<FusionEngine>,
        bluetooth: SensorFactory,
        wifi: SensorFactory,
        radio_reset: Box<dyn RadioReset>,
    ) -> Self {
        Self {
            engine,
            bluetooth: SensorSlot::new(SensorSource::Bluetooth, bluetooth),
            wifi: SensorSlot::new(SensorSource::Wifi, wifi),
            radio_reset,
            poll_interval: POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Start both sensors (initial launch, not counted as a restart).
    pub fn start_sensors(&mut self, now: Instant) {
        self.bluetooth.launch(&self.engine, now);
        self.wifi.launch(&self.engine, now);
    }

    /// Check both heartbeats at `now` and recover whichever sensor is stale.
    pub fn poll_once(&mut self, now: Instant) -> PollReport {
        let config = self.engine.config().snapshot();
        let mut report = PollReport::default();

        let bt_age = self.engine.heartbeat_age(SensorSource::Bluetooth, now);
        if bt_age > config.watchdog_timeout() {
            warn!(age = ?bt_age, "SENTRY: Bluetooth heartbeat lost, resetting adapter");
            self.bluetooth.state = SensorState::Restarting;
            let reset = self.radio_reset.reset();
            if !reset.success() {
                warn!(
                    failed_steps = reset.steps.iter().filter(|step| !step.done).count(),
                    "radio reset finished with failures; restarting sensor anyway"
                );
            }
            self.bluetooth.restarts += 1;
            self.bluetooth.launch(&self.engine, now);
            report.bluetooth_restarted = true;
        }

        let wifi_age = self.engine.heartbeat_age(SensorSource::Wifi, now);
        if wifi_age > config.wifi_watchdog_timeout() {
            warn!(age = ?wifi_age, "SENTRY: Wi-Fi heartbeat lost, restarting scanner");
            self.wifi.state = SensorState::Restarting;
            self.wifi.restarts += 1;
            self.wifi.launch(&self.engine, now);
            report.wifi_restarted = true;
        }

        report
    }

    /// Stop both sensors.
    pub fn stop_sensors(&mut self) {
        self.bluetooth.halt();
        self.wifi.halt();
    }

    #[must_use]
    pub fn status(&self) -> [SensorStatus; 2] {
        [self.bluetooth.status(), self.wifi.status()]
    }

    /// Run the poll loop on a dedicated thread.
    pub fn spawn(self) -> Result<SupervisorHandle> {
        let (stop, token) = stop_pair();
        let worker = std::thread::Builder::new()
            .name("sentry-watchdog".to_string())
            .spawn(move || self.run(&token))
            .map_err(|err| SentryError::Runtime {
                details: format!("failed to spawn watchdog thread: {err}"),
            })?;
        Ok(SupervisorHandle {
            stop,
            worker: Some(worker),
        })
    }

    fn run(mut self, token: &StopToken) -> Self {
        info!("SENTRY: watchdog started, initializing sensors");
        self.start_sensors(Instant::now());
        while token.pause(self.poll_interval) {
            self.poll_once(Instant::now());
        }
        self.stop_sensors();
        info!("SENTRY: watchdog stopped");
        self
    }
}

/// Owner of a running supervisor thread.
pub struct SupervisorHandle {
    stop: StopHandle,
    worker: Option<JoinHandle<WatchdogSupervisor>>,
}

impl SupervisorHandle {
    /// Halt polling, stop both sensors, and hand back the supervisor.
    pub fn stop(mut self) -> Result<WatchdogSupervisor> {
        self.stop.request_stop();
        let worker = self.worker.take().ok_or(SentryError::ChannelClosed {
            component: "watchdog",
        })?;
        worker.join().map_err(|_| SentryError::Runtime {
            details: "watchdog thread panicked".to_string(),
        })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|worker| !worker.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;

    #[cfg(unix)]
    #[test]
    fn reset_runs_every_step_even_when_all_fail() {
        let failing = || CommandSpec::new("sh", ["-c", "echo nope >&2; exit 1"]);
        let reset = HciRadioReset::new(ConfigHandle::new(Config::default()))
            .with_commands(failing(), failing(), failing())
            .with_settle_times(Duration::ZERO, Duration::ZERO);

        let report = reset.reset();
        assert_eq!(report.steps.len(), 3);
        assert!(report.steps.iter().all(|step| !step.done));
        assert!(
            report.steps[0]
                .error
                .as_deref()
                .is_some_and(|err| err.contains("nope"))
        );
        assert!(!report.success());
    }

    #[test]
    fn missing_reset_binaries_are_recorded_not_fatal() {
        let missing = || CommandSpec::new("/nonexistent/rfkill", Vec::<String>::new());
        let reset = HciRadioReset::new(ConfigHandle::new(Config::default()))
            .with_commands(missing(), missing(), missing())
            .with_settle_times(Duration::ZERO, Duration::ZERO);
        let report = reset.reset();
        assert_eq!(
            report
                .steps
                .iter()
                .map(|step| step.description.as_str())
                .collect::<Vec<_>>(),
            ["Disable radio", "Enable radio", "Reset adapter"]
        );
        assert!(!report.success());
    }

    #[cfg(unix)]
    #[test]
    fn successful_steps_are_marked_done() {
        let ok = || CommandSpec::new("true", Vec::<String>::new());
        let reset = HciRadioReset::new(ConfigHandle::new(Config::default()))
            .with_commands(ok(), ok(), ok())
            .with_settle_times(Duration::ZERO, Duration::ZERO);
        assert!(reset.reset().success());
    }

    #[test]
    fn default_commands_follow_config() {
        let config = Config {
            bluetooth_adapter: "hci1".to_string(),
            ..Config::default()
        };
        let reset = HciRadioReset::new(ConfigHandle::new(config));
        let rendered: Vec<String> = reset.commands().iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            [
                "sudo rfkill block bluetooth",
                "sudo rfkill unblock bluetooth",
                "sudo hciconfig hci1 reset",
            ]
        );
    }

    #[test]
    fn reloaded_config_changes_the_next_reset() {
        let handle = ConfigHandle::new(Config::default());
        let reset = HciRadioReset::new(handle.clone());
        assert_eq!(reset.commands()[2].to_string(), "sudo hciconfig hci0 reset");

        handle.replace(Config {
            use_sudo: false,
            bluetooth_adapter: "hci2".to_string(),
            ..Config::default()
        });
        let rendered: Vec<String> = reset.commands().iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            [
                "rfkill block bluetooth",
                "rfkill unblock bluetooth",
                "hciconfig hci2 reset",
            ]
        );
    }
}
