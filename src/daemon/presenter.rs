//! Alert presentation: the blocking hand-off from the queue consumer to the user.

use std::process::Stdio;

use tracing::{info, warn};

use crate::core::config::{Config, ConfigHandle};
use crate::core::errors::{Result, SentryError};
use crate::fusion::AlertEvent;
use crate::sensor::CommandSpec;

/// Environment variable carrying the full alert as JSON for external presenters.
pub const ALERT_JSON_ENV: &str = "SENTRY_ALERT_JSON";

/// Shows one alert to the user. Blocks until the presentation is dismissed or
/// has finished, so at most one alert is on screen at a time.
pub trait AlertPresenter: Send {
    fn present(&mut self, event: &AlertEvent) -> Result<()>;
}

/// Presents alerts as warning log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPresenter;

impl AlertPresenter for LogPresenter {
    fn present(&mut self, event: &AlertEvent) -> Result<()> {
        warn!(
            mac = %event.mac_address,
            rssi = event.signal_strength,
            simulated = event.simulated,
            "{}",
            event.message
        );
        Ok(())
    }
}

/// Runs an external program per alert and waits for it to exit.
///
/// The message is appended as the final argument and the serialized event is
/// exported in [`ALERT_JSON_ENV`].
#[derive(Debug, Clone)]
pub struct CommandPresenter {
    command: CommandSpec,
}

impl CommandPresenter {
    /// Presenter for a non-empty `argv`.
    pub fn new(argv: &[String]) -> Result<Self> {
        let Some((program, args)) = argv.split_first() else {
            return Err(SentryError::InvalidConfig {
                details: "alert_command must not be empty".to_string(),
            });
        };
        Ok(Self {
            command: CommandSpec::new(program.as_str(), args.iter().cloned()),
        })
    }

    #[must_use]
    pub fn command(&self) -> &CommandSpec {
        &self.command
    }
}

impl AlertPresenter for CommandPresenter {
    fn present(&mut self, event: &AlertEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        let status = self
            .command
            .to_command()
            .arg(&event.message)
            .env(ALERT_JSON_ENV, payload)
            .stdin(Stdio::null())
            .status()
            .map_err(|err| SentryError::Presentation {
                details: format!("failed to run `{}`: {err}", self.command),
            })?;
        if status.success() {
            info!(command = %self.command, "alert presented");
            Ok(())
        } else {
            Err(SentryError::Presentation {
                details: format!("`{}` exited with {status}", self.command),
            })
        }
    }
}

/// Build the presenter a config asks for.
pub fn presenter_for(config: &Config) -> Result<Box<dyn AlertPresenter>> {
    match config.alert_command.as_deref() {
        Some(argv) => Ok(Box::new(CommandPresenter::new(argv)?)),
        None => Ok(Box::new(LogPresenter)),
    }
}

/// Picks the presenter from the current config snapshot on every alert, so
/// a reloaded `alert_command` takes effect without a restart.
#[derive(Debug, Clone)]
pub struct ConfiguredPresenter {
    config: ConfigHandle,
}

impl ConfiguredPresenter {
    #[must_use]
    pub const fn new(config: ConfigHandle) -> Self {
        Self { config }
    }
}

impl AlertPresenter for ConfiguredPresenter {
    fn present(&mut self, event: &AlertEvent) -> Result<()> {
        presenter_for(&self.config.snapshot())?.present(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_presenter_always_succeeds() {
        LogPresenter
            .present(&AlertEvent::simulated())
            .expect("log presentation");
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = CommandPresenter::new(&[]).expect_err("empty argv");
        assert_eq!(err.code(), "SEN-1001");
    }

    #[cfg(unix)]
    #[test]
    fn command_receives_message_and_json() {
        let dir = tempfile::tempdir().expect("temp dir");
        let out = dir.path().join("presented.txt");
        let script = format!(
            "printf '%s\\n%s' \"$1\" \"${ALERT_JSON_ENV}\" > '{}'",
            out.display()
        );
        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            script,
            "presenter".to_string(),
        ];
        let mut presenter = CommandPresenter::new(&argv).expect("presenter");
        let event = AlertEvent::approach("AA:BB:CC:DD:EE:FF", 20, -50);
        presenter.present(&event).expect("present");

        let written = std::fs::read_to_string(&out).expect("read output");
        let (message, json) = written.split_once('\n').expect("two lines");
        assert_eq!(message, event.message);
        let parsed: AlertEvent = serde_json::from_str(json).expect("alert json");
        assert_eq!(parsed, event);
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_is_a_presentation_error() {
        let argv = vec!["false".to_string()];
        let err = CommandPresenter::new(&argv)
            .expect("presenter")
            .present(&AlertEvent::simulated())
            .expect_err("non-zero exit");
        assert_eq!(err.code(), "SEN-3101");
    }

    #[test]
    fn configured_presenter_follows_reloads() {
        let handle = ConfigHandle::new(Config::default());
        let mut presenter = ConfiguredPresenter::new(handle.clone());
        presenter
            .present(&AlertEvent::simulated())
            .expect("log fallback");

        handle.replace(Config {
            alert_command: Some(vec!["/nonexistent/sentry-presenter".to_string()]),
            ..Config::default()
        });
        let err = presenter
            .present(&AlertEvent::simulated())
            .expect_err("missing presenter binary");
        assert_eq!(err.code(), "SEN-3101");
    }
}
