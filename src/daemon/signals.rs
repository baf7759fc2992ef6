//! Signal handling: SIGUSR1 injects a simulated alert, SIGHUP reloads the
//! configuration, SIGTERM/SIGINT request shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM, SIGUSR1};
use signal_hook::iterator::{Handle, Signals};
use tracing::{error, info, warn};

use crate::core::config::ConfigHandle;
use crate::core::errors::{Result, SentryError};
use crate::fusion::{AlertEvent, EventQueue};

/// What a delivered signal asks the daemon to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    SimulateAlert,
    ReloadConfig,
    Shutdown,
}

impl SignalAction {
    #[must_use]
    pub const fn from_signal(signal: i32) -> Option<Self> {
        match signal {
            SIGUSR1 => Some(Self::SimulateAlert),
            SIGHUP => Some(Self::ReloadConfig),
            SIGTERM | SIGINT => Some(Self::Shutdown),
            _ => None,
        }
    }
}

/// Shared daemon state the handler acts on.
#[derive(Debug, Clone)]
pub struct SignalContext {
    pub queue: Arc<EventQueue>,
    pub config: ConfigHandle,
    pub shutdown: Arc<AtomicBool>,
}

impl SignalContext {
    /// Apply one action. Runs on the listener thread, never in a raw handler.
    pub fn apply(&self, action: SignalAction) {
        match action {
            SignalAction::SimulateAlert => {
                info!("SENTRY: simulated alert requested");
                self.queue.push(AlertEvent::simulated());
            }
            SignalAction::ReloadConfig => {
                if let Err(err) = self.config.reload() {
                    error!(code = err.code(), error = %err, "config reload failed; keeping current settings");
                }
            }
            SignalAction::Shutdown => {
                warn!("SENTRY: shutdown requested");
                self.shutdown.store(true, Ordering::SeqCst);
            }
        }
    }
}

/// Background thread translating delivered signals into [`SignalAction`]s.
pub struct SignalListener {
    handle: Handle,
    worker: Option<JoinHandle<()>>,
}

impl SignalListener {
    /// Register the handlers and start listening.
    pub fn install(context: SignalContext) -> Result<Self> {
        let mut signals = Signals::new([SIGUSR1, SIGHUP, SIGTERM, SIGINT]).map_err(|err| {
            SentryError::Runtime {
                details: format!("failed to register signal handlers: {err}"),
            }
        })?;
        let handle = signals.handle();
        let worker = std::thread::Builder::new()
            .name("sentry-signals".to_string())
            .spawn(move || {
                for signal in signals.forever() {
                    if let Some(action) = SignalAction::from_signal(signal) {
                        context.apply(action);
                    }
                }
            })
            .map_err(|err| SentryError::Runtime {
                details: format!("failed to spawn signal thread: {err}"),
            })?;
        Ok(Self {
            handle,
            worker: Some(worker),
        })
    }

    /// Stop listening and join the thread.
    pub fn close(mut self) {
        self.shutdown_listener();
    }

    fn shutdown_listener(&mut self) {
        self.handle.close();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        self.shutdown_listener();
    }
}
