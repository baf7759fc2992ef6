//! Daemon wiring and the alert consumer loop.
//!
//! Startup order: config, queue, fusion engine, watchdog (which launches both
//! sensors), signal listener, then the consumer loop on the calling thread.
//! Shutdown runs the same list in reverse.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use super::presenter::{AlertPresenter, ConfiguredPresenter};
use super::signals::{SignalContext, SignalListener};
use super::watchdog::{HciRadioReset, WatchdogSupervisor};
use crate::core::config::{ConfigHandle, DEFAULT_CONFIG_PATH};
use crate::core::errors::Result;
use crate::fusion::{EventQueue, FusionEngine};
use crate::sensor::{BluetoothSensor, ReadingSink, Sensor, SensorFactory, WifiSensor};

/// Sleep when the queue is empty.
pub const IDLE_TICK: Duration = Duration::from_millis(500);
/// Sleep after a failed presentation.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Daemon startup options.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub config_path: PathBuf,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }
}

/// Counters from one run of the consumer loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub presented: u64,
    pub failed: u64,
}

/// Run the daemon until SIGTERM/SIGINT.
pub fn run_daemon(options: &DaemonOptions) -> Result<()> {
    let config = ConfigHandle::from_file(&options.config_path);
    let snapshot = config.snapshot();
    info!(
        config = %options.config_path.display(),
        whitelisted = snapshot.whitelist.len(),
        interface = %snapshot.wifi_interface,
        "SENTRY: starting proximity sentry"
    );

    let queue = Arc::new(EventQueue::new(snapshot.event_queue_capacity));
    let engine = Arc::new(FusionEngine::new(config.clone(), Arc::clone(&queue)));
    let supervisor = WatchdogSupervisor::new(
        Arc::clone(&engine),
        bluetooth_factory(&engine),
        wifi_factory(&engine),
        Box::new(HciRadioReset::new(config.clone())),
    );
    let supervisor = supervisor.spawn()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let listener = match SignalListener::install(SignalContext {
        queue: Arc::clone(&queue),
        config: config.clone(),
        shutdown: Arc::clone(&shutdown),
    }) {
        Ok(listener) => listener,
        Err(err) => {
            let _ = supervisor.stop();
            return Err(err);
        }
    };

    let mut presenter = ConfiguredPresenter::new(config);
    let stats = run_alert_loop(&queue, &mut presenter, &shutdown);

    listener.close();
    supervisor.stop()?;
    info!(
        presented = stats.presented,
        failed = stats.failed,
        dropped = queue.dropped(),
        "SENTRY: stopped"
    );
    Ok(())
}

/// Consume alerts oldest-first until `shutdown` is set. Each presentation
/// blocks; a failure is logged and followed by [`ERROR_BACKOFF`].
pub fn run_alert_loop(
    queue: &EventQueue,
    presenter: &mut dyn AlertPresenter,
    shutdown: &AtomicBool,
) -> LoopStats {
    let mut stats = LoopStats::default();
    while !shutdown.load(Ordering::SeqCst) {
        let Some(event) = queue.pop_oldest() else {
            sleep_unless_shutdown(IDLE_TICK, shutdown);
            continue;
        };
        warn!(mac = %event.mac_address, "PROCESSING ALERT: {}", event.message);
        match presenter.present(&event) {
            Ok(()) => stats.presented += 1,
            Err(err) => {
                stats.failed += 1;
                error!(code = err.code(), error = %err, "SENTRY: alert presentation failed");
                sleep_unless_shutdown(ERROR_BACKOFF, shutdown);
            }
        }
    }
    stats
}

fn sleep_unless_shutdown(duration: Duration, shutdown: &AtomicBool) {
    const SLICE: Duration = Duration::from_millis(50);
    let deadline = Instant::now() + duration;
    while !shutdown.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep(SLICE.min(deadline - now));
    }
}

/// Each restart reads the current config snapshot, so reloaded sudo or
/// interface settings apply from the next sensor instance on.
fn bluetooth_factory(engine: &Arc<FusionEngine>) -> SensorFactory {
    let engine = Arc::clone(engine);
    Box::new(move || {
        let sink = Arc::clone(&engine) as Arc<dyn ReadingSink>;
        Box::new(BluetoothSensor::from_config(&engine.config().snapshot(), sink)) as Box<dyn Sensor>
    })
}

fn wifi_factory(engine: &Arc<FusionEngine>) -> SensorFactory {
    let engine = Arc::clone(engine);
    Box::new(move || {
        let sink = Arc::clone(&engine) as Arc<dyn ReadingSink>;
        Box::new(WifiSensor::from_config(&engine.config().snapshot(), sink)) as Box<dyn Sensor>
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::SentryError;
    use crate::fusion::AlertEvent;

    #[derive(Default)]
    struct Recording {
        seen: Vec<String>,
        fail_first: bool,
    }

    impl AlertPresenter for Recording {
        fn present(&mut self, event: &AlertEvent) -> Result<()> {
            self.seen.push(event.mac_address.clone());
            if self.fail_first && self.seen.len() == 1 {
                return Err(SentryError::Presentation {
                    details: "window refused".to_string(),
                });
            }
            Ok(())
        }
    }

    fn stop_after(shutdown: &Arc<AtomicBool>, delay: Duration) -> std::thread::JoinHandle<()> {
        let shutdown = Arc::clone(shutdown);
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            shutdown.store(true, Ordering::SeqCst);
        })
    }

    #[test]
    fn presents_in_fifo_order() {
        let queue = EventQueue::new(8);
        for mac in ["00:00:00:00:00:01", "00:00:00:00:00:02", "00:00:00:00:00:03"] {
            queue.push(AlertEvent::approach(mac, 10, -50));
        }
        let shutdown = Arc::new(AtomicBool::new(false));
        let stopper = stop_after(&shutdown, Duration::from_millis(200));

        let mut presenter = Recording::default();
        let stats = run_alert_loop(&queue, &mut presenter, &shutdown);
        stopper.join().expect("stopper");

        assert_eq!(
            presenter.seen,
            ["00:00:00:00:00:01", "00:00:00:00:00:02", "00:00:00:00:00:03"]
        );
        assert_eq!(stats, LoopStats { presented: 3, failed: 0 });
        assert!(queue.is_empty());
    }

    #[test]
    fn presentation_failure_does_not_stop_the_loop() {
        let queue = EventQueue::new(8);
        queue.push(AlertEvent::simulated());
        queue.push(AlertEvent::approach("00:00:00:00:00:09", 6, -40));
        let shutdown = Arc::new(AtomicBool::new(false));
        let stopper = stop_after(&shutdown, Duration::from_millis(1500));

        let mut presenter = Recording {
            fail_first: true,
            ..Recording::default()
        };
        let stats = run_alert_loop(&queue, &mut presenter, &shutdown);
        stopper.join().expect("stopper");

        assert_eq!(stats, LoopStats { presented: 1, failed: 1 });
        assert_eq!(presenter.seen.len(), 2);
    }

    #[test]
    fn preset_shutdown_returns_immediately() {
        let queue = EventQueue::new(1);
        queue.push(AlertEvent::simulated());
        let shutdown = AtomicBool::new(true);
        let stats = run_alert_loop(&queue, &mut Recording::default(), &shutdown);
        assert_eq!(stats, LoopStats::default());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn factories_build_unstarted_sensors_feeding_the_engine() {
        let queue = Arc::new(EventQueue::new(4));
        let engine = Arc::new(FusionEngine::new(
            ConfigHandle::new(crate::core::config::Config::default()),
            queue,
        ));
        let mut bluetooth = bluetooth_factory(&engine);
        let mut wifi = wifi_factory(&engine);

        let (bt, wl) = (bluetooth(), wifi());
        assert_eq!(bt.source(), crate::core::types::SensorSource::Bluetooth);
        assert_eq!(wl.source(), crate::core::types::SensorSource::Wifi);
        assert!(!bt.is_running() && !wl.is_running());
        // Each instance holds a sink reference to the shared engine.
        assert_eq!(Arc::strong_count(&engine), 5);
    }

    #[test]
    fn default_options_point_at_system_config() {
        assert_eq!(
            DaemonOptions::default().config_path,
            PathBuf::from(DEFAULT_CONFIG_PATH)
        );
    }
}
