//! Active Wi-Fi sensor driving periodic `iw dev <iface> scan` runs.

use std::io::Read as _;
use std::process::{ChildStderr, ChildStdout};
use std::sync::{Arc, LazyLock};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, info, warn};

use super::command::CommandSpec;
use super::process::{SupervisedChild, TERMINATE_GRACE};
use super::{ReadingSink, Sensor, StopHandle, StopToken, stop_pair};
use crate::core::config::Config;
use crate::core::errors::{Result, SentryError};
use crate::core::types::{Reading, SensorSource};

static BSS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^BSS ([0-9A-Fa-f]{2}(?::[0-9A-Fa-f]{2}){5})").expect("bss pattern")
});
static SIGNAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"signal:\s*(-?\d+(?:\.\d+)?)\s*dBm").expect("signal pattern")
});

/// Timing of the scan cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTiming {
    /// Upper bound on one scan process; exceeding it is not an error.
    pub scan_timeout: Duration,
    /// Extra wait after a failed scan.
    pub error_backoff: Duration,
    /// Wait between scan cycles, whatever their outcome.
    pub pulse_interval: Duration,
}

impl Default for ScanTiming {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(5),
            error_backoff: Duration::from_secs(2),
            pulse_interval: Duration::from_secs(3),
        }
    }
}

/// Extract `(address, rssi)` pairs from `iw` scan output.
///
/// Blocks start at a `BSS <address>` header. The first `signal:` line after a
/// header yields one pair (float dBm truncated toward zero) and closes the
/// block; headers without a signal are discarded.
#[must_use]
pub fn parse_iw_scan(output: &str) -> Vec<(String, i32)> {
    let mut pairs = Vec::new();
    let mut current: Option<String> = None;

    for line in output.lines() {
        let line = line.trim();
        if line.starts_with("BSS") {
            if let Some(caps) = BSS_RE.captures(line) {
                current = Some(caps[1].to_ascii_uppercase());
            }
            continue;
        }
        if current.is_none() || !line.contains("signal:") {
            continue;
        }
        let Some(dbm) = SIGNAL_RE
            .captures(line)
            .and_then(|caps| caps[1].parse::<f64>().ok())
        else {
            continue;
        };
        if let Some(mac) = current.take() {
            #[allow(clippy::cast_possible_truncation)]
            pairs.push((mac, dbm.trunc() as i32));
        }
    }
    pairs
}

enum ScanOutcome {
    Completed(String),
    TimedOut,
    Cancelled,
}

/// The scan process currently in flight, shared with [`WifiSensor::stop`].
type InFlight = Arc<Mutex<Option<SupervisedChild>>>;

fn run_scan(
    command: &CommandSpec,
    timeout: Duration,
    in_flight: &InFlight,
    token: &StopToken,
) -> Result<ScanOutcome> {
    let (child, stdout, stderr) = SupervisedChild::spawn_capture("wifi", command)?;
    {
        let mut slot = in_flight.lock();
        // `stop` clears the flag before emptying the slot, so either it sees
        // this child or this check sees the stop.
        if !token.is_running() {
            drop(slot);
            child.terminate(TERMINATE_GRACE);
            return Ok(ScanOutcome::Cancelled);
        }
        *slot = Some(child.clone());
    }
    let outcome = await_scan(command, &child, stdout, stderr, timeout, token);
    in_flight.lock().take();
    outcome
}

fn await_scan(
    command: &CommandSpec,
    child: &SupervisedChild,
    stdout: ChildStdout,
    stderr: ChildStderr,
    timeout: Duration,
    token: &StopToken,
) -> Result<ScanOutcome> {
    let interrupted = || {
        child.terminate(TERMINATE_GRACE);
        if token.is_running() {
            ScanOutcome::TimedOut
        } else {
            ScanOutcome::Cancelled
        }
    };

    let (tx, rx) = crossbeam_channel::bounded(1);
    std::thread::Builder::new()
        .name("sentry-wifi-scan".to_string())
        .spawn(move || {
            let _ = tx.send(drain(stdout, stderr));
        })
        .map_err(|err| {
            child.terminate(TERMINATE_GRACE);
            SentryError::Runtime {
                details: format!("failed to spawn wifi output reader: {err}"),
            }
        })?;

    // Terminating the child closes both pipes, which releases the reader.
    let Ok(drained) = rx.recv_timeout(timeout) else {
        return Ok(interrupted());
    };
    let (output, errors) = drained.map_err(|source| SentryError::SensorIo {
        sensor: "wifi",
        source,
    })?;
    let Some(status) = child.wait_timeout(TERMINATE_GRACE) else {
        return Ok(interrupted());
    };
    if !token.is_running() {
        return Ok(ScanOutcome::Cancelled);
    }
    if !status.success() {
        return Err(SentryError::ScanFailed {
            details: format!("`{command}` exited with {status}: {}", errors.trim()),
        });
    }
    Ok(ScanOutcome::Completed(output))
}

fn drain(mut stdout: ChildStdout, mut stderr: ChildStderr) -> std::io::Result<(String, String)> {
    let mut output = Vec::new();
    stdout.read_to_end(&mut output)?;
    let mut errors = Vec::new();
    stderr.read_to_end(&mut errors)?;
    Ok((
        String::from_utf8_lossy(&output).into_owned(),
        String::from_utf8_lossy(&errors).into_owned(),
    ))
}

// ──────────────────── sensor ────────────────────

/// Periodically scans and reports every visible access point.
pub struct WifiSensor {
    command: CommandSpec,
    sink: Arc<dyn ReadingSink>,
    timing: ScanTiming,
    in_flight: InFlight,
    stop: Option<StopHandle>,
    worker: Option<JoinHandle<()>>,
}

impl WifiSensor {
    #[must_use]
    pub fn new(command: CommandSpec, sink: Arc<dyn ReadingSink>) -> Self {
        Self {
            command,
            sink,
            timing: ScanTiming::default(),
            in_flight: Arc::new(Mutex::new(None)),
            stop: None,
            worker: None,
        }
    }

    /// Sensor scanning `config.wifi_interface`.
    #[must_use]
    pub fn from_config(config: &Config, sink: Arc<dyn ReadingSink>) -> Self {
        Self::new(
            Self::scan_command(config.use_sudo, &config.wifi_interface),
            sink,
        )
    }

    #[must_use]
    pub fn scan_command(use_sudo: bool, interface: &str) -> CommandSpec {
        CommandSpec::privileged(use_sudo, "iw", ["dev", interface, "scan"])
    }

    #[must_use]
    pub fn with_timing(mut self, timing: ScanTiming) -> Self {
        self.timing = timing;
        self
    }

    #[must_use]
    pub fn command(&self) -> &CommandSpec {
        &self.command
    }
}

impl Sensor for WifiSensor {
    fn source(&self) -> SensorSource {
        SensorSource::Wifi
    }

    fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(SentryError::Runtime {
                details: "wifi sensor instance already started".to_string(),
            });
        }
        let (handle, token) = stop_pair();
        let sink = Arc::clone(&self.sink);
        let command = self.command.clone();
        let timing = self.timing;
        let in_flight = Arc::clone(&self.in_flight);

        let worker = std::thread::Builder::new()
            .name("sentry-wifi".to_string())
            .spawn(move || scan_loop(&command, sink.as_ref(), &token, timing, &in_flight))
            .map_err(|err| SentryError::Runtime {
                details: format!("failed to spawn wifi worker thread: {err}"),
            })?;

        info!(command = %self.command, "wifi sensor started");
        self.stop = Some(handle);
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stop) = self.stop.as_mut() {
            stop.request_stop();
        }
        // A replacement instance must not overlap this scan: the radio
        // rejects concurrent scans.
        let scan = self.in_flight.lock().take();
        if let Some(scan) = scan {
            scan.terminate(TERMINATE_GRACE);
        }
    }

    fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|worker| !worker.is_finished())
    }
}

impl Drop for WifiSensor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn scan_loop(
    command: &CommandSpec,
    sink: &dyn ReadingSink,
    token: &StopToken,
    timing: ScanTiming,
    in_flight: &InFlight,
) {
    while token.is_running() {
        match run_scan(command, timing.scan_timeout, in_flight, token) {
            Ok(ScanOutcome::Completed(output)) => {
                let pairs = parse_iw_scan(&output);
                debug!(networks = pairs.len(), "wifi scan completed");
                for (mac, rssi) in pairs {
                    if !token.is_running() {
                        break;
                    }
                    sink.submit(Reading::new(&mac, rssi, SensorSource::Wifi));
                }
            }
            Ok(ScanOutcome::TimedOut) => {
                debug!(timeout = ?timing.scan_timeout, "wifi scan timed out");
            }
            Ok(ScanOutcome::Cancelled) => break,
            Err(err) => {
                warn!(code = err.code(), error = %err, "SENTRY: WiFi worker error");
                if !token.pause(timing.error_backoff) {
                    break;
                }
            }
        }
        if !token.pause(timing.pulse_interval) {
            break;
        }
    }
    debug!("wifi scan loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Instant;

    const IW_SAMPLE: &str = "\
BSS aa:bb:cc:dd:ee:ff(on wlan0)
\tTSF: 123456789 usec
\tfreq: 5180
\tsignal: -52.75 dBm
\tSSID: HomeNetwork
\tBSS Load:
\t\t * station count: 3
BSS 11:22:33:44:55:66(on wlan0)
\tfreq: 2437
\tSSID: NoSignalLine
BSS de:ad:be:ef:ca:fe(on wlan0) -- associated
\tfreq: 5745
\tsignal: -45.00 dBm
\tsignal: -30.00 dBm
";

    #[test]
    fn parses_one_pair_per_complete_block() {
        assert_eq!(
            parse_iw_scan(IW_SAMPLE),
            [
                ("AA:BB:CC:DD:EE:FF".to_string(), -52),
                ("DE:AD:BE:EF:CA:FE".to_string(), -45),
            ]
        );
    }

    #[test]
    fn signal_before_any_header_is_ignored() {
        assert!(parse_iw_scan("\tsignal: -40.00 dBm\n").is_empty());
        assert!(parse_iw_scan("").is_empty());
    }

    #[test]
    fn integer_signal_values_are_accepted() {
        let output = "BSS 00:11:22:33:44:55(on wlan0)\n\tsignal: -61 dBm\n";
        assert_eq!(parse_iw_scan(output), [("00:11:22:33:44:55".to_string(), -61)]);
    }

    #[derive(Default)]
    struct CollectingSink {
        readings: Mutex<Vec<Reading>>,
    }

    impl ReadingSink for CollectingSink {
        fn submit(&self, reading: Reading) {
            self.readings.lock().push(reading);
        }
    }

    fn fast_timing() -> ScanTiming {
        ScanTiming {
            scan_timeout: Duration::from_millis(500),
            error_backoff: Duration::from_millis(10),
            pulse_interval: Duration::from_millis(10),
        }
    }

    #[cfg(unix)]
    #[test]
    fn sensor_submits_scan_results_until_stopped() {
        let sink = Arc::new(CollectingSink::default());
        let script = "printf 'BSS aa:bb:cc:dd:ee:01(on wlan0)\\n\\tsignal: -48.00 dBm\\n'";
        let mut sensor = WifiSensor::new(
            CommandSpec::new("sh", ["-c", script]),
            Arc::clone(&sink) as Arc<dyn ReadingSink>,
        )
        .with_timing(fast_timing());
        sensor.start().expect("start sensor");

        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.readings.lock().len() < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        sensor.stop();

        let readings = sink.readings.lock().clone();
        assert!(readings.len() >= 2, "scan loop repeats");
        assert!(readings.iter().all(|r| {
            r.mac_address == "AA:BB:CC:DD:EE:01"
                && r.signal_strength == -48
                && r.source == SensorSource::Wifi
        }));

        let deadline = Instant::now() + Duration::from_secs(5);
        while sensor.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!sensor.is_running());
    }

    #[cfg(unix)]
    #[test]
    fn failing_and_hanging_scans_keep_the_loop_alive() {
        for script in ["exit 3", "exec sleep 5"] {
            let sink = Arc::new(CollectingSink::default());
            let mut sensor = WifiSensor::new(
                CommandSpec::new("sh", ["-c", script]),
                Arc::clone(&sink) as Arc<dyn ReadingSink>,
            )
            .with_timing(ScanTiming {
                scan_timeout: Duration::from_millis(100),
                ..fast_timing()
            });
            sensor.start().expect("start sensor");
            std::thread::sleep(Duration::from_millis(300));
            assert!(sensor.is_running(), "loop survives `{script}`");
            assert!(sink.readings.lock().is_empty());
            sensor.stop();
        }
    }

    #[cfg(unix)]
    #[test]
    fn stop_terminates_the_scan_in_flight() {
        let sink = Arc::new(CollectingSink::default());
        let mut sensor = WifiSensor::new(
            CommandSpec::new("sh", ["-c", "trap '' TERM; sleep 30; true"]),
            sink as Arc<dyn ReadingSink>,
        )
        .with_timing(ScanTiming {
            scan_timeout: Duration::from_secs(60),
            ..fast_timing()
        });
        sensor.start().expect("start sensor");

        let deadline = Instant::now() + Duration::from_secs(5);
        while sensor.in_flight.lock().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        let scan = sensor.in_flight.lock().clone().expect("scan in flight");
        let pid = scan.pid();
        assert!(pid.is_some());

        let stopped_at = Instant::now();
        sensor.stop();
        assert!(scan.pid().is_none(), "scan released by stop");
        while sensor.is_running() && stopped_at.elapsed() < Duration::from_secs(2) {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!sensor.is_running(), "worker outlived its scan");
        assert!(sensor.in_flight.lock().is_none());
    }

    #[test]
    fn scan_command_targets_configured_interface() {
        let config = Config {
            wifi_interface: "wlp3s0".to_string(),
            use_sudo: false,
            ..Config::default()
        };
        let sink = Arc::new(CollectingSink::default()) as Arc<dyn ReadingSink>;
        let sensor = WifiSensor::from_config(&config, sink);
        assert_eq!(sensor.command().to_string(), "iw dev wlp3s0 scan");
    }
}
