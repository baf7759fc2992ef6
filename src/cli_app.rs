//! Top-level CLI definition and dispatch.

use std::io::Write as _;
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use crate::core::config::{Config, DEFAULT_CONFIG_PATH};
use crate::core::errors::SentryError;
use crate::core::types::SensorSource;
use crate::daemon::loop_main::{DaemonOptions, run_daemon};
use crate::fusion::AlertEvent;
use crate::replay::{readings_from_capture, replay};

/// Proximity Sentry: alerts when an unknown Bluetooth or Wi-Fi device approaches.
#[derive(Debug, Parser)]
#[command(name = "sentry", version, about)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). `SENTRY_LOG` overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the sensors, fusion engine and watchdog in the foreground.
    Daemon(ConfigArgs),
    /// Print the effective configuration (defaults merged with the file).
    Config {
        #[command(flatten)]
        config: ConfigArgs,
        /// Print TOML instead of JSON.
        #[arg(long)]
        toml: bool,
    },
    /// Feed a captured btmon or iw scan transcript through the fusion engine.
    Replay {
        /// Which tool produced the capture.
        #[arg(long, value_enum)]
        source: SourceArg,
        #[command(flatten)]
        config: ConfigArgs,
        /// Capture file.
        file: PathBuf,
    },
    /// Print the alert a SIGUSR1 would inject.
    Simulate,
    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Shared `--config` flag.
#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Configuration file (`.toml` or JSON).
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
}

/// Sensor selector for `replay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    Bluetooth,
    Wifi,
}

impl From<SourceArg> for SensorSource {
    fn from(value: SourceArg) -> Self {
        match value {
            SourceArg::Bluetooth => Self::Bluetooth,
            SourceArg::Wifi => Self::Wifi,
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    match &cli.command {
        Command::Daemon(args) => {
            run_daemon(&DaemonOptions {
                config_path: args.config.clone(),
            })?;
        }
        Command::Config { config, toml } => {
            let effective = Config::load_or_default(&config.config);
            let rendered = if *toml {
                effective.to_toml()?
            } else {
                effective.to_json_pretty()?
            };
            println!("{}", rendered.trim_end());
        }
        Command::Replay {
            source,
            config,
            file,
        } => {
            let capture =
                std::fs::read_to_string(file).map_err(|source| SentryError::io(file, source))?;
            let source = SensorSource::from(*source);
            let readings = readings_from_capture(source, &capture);
            let summary = replay(Config::load_or_default(&config.config), source, &readings);

            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            for alert in &summary.alerts {
                writeln!(out, "{}", serde_json::to_string(alert)?)?;
            }
            writeln!(
                out,
                "{}",
                serde_json::json!({
                    "source": summary.source,
                    "readings": summary.readings,
                    "alerts": summary.alerts.len(),
                    "whitelisted": summary.whitelisted,
                    "tracked_devices": summary.tracked_devices,
                })
            )?;
        }
        Command::Simulate => {
            println!("{}", serde_json::to_string_pretty(&AlertEvent::simulated())?);
        }
        Command::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(*shell, &mut command, "sentry", &mut std::io::stdout());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn replay_arguments_parse() {
        let cli = Cli::try_parse_from([
            "sentry", "-vv", "replay", "--source", "wifi", "--config", "/tmp/c.toml", "scan.txt",
        ])
        .expect("parse");
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Replay {
                source,
                config,
                file,
            } => {
                assert_eq!(source, SourceArg::Wifi);
                assert_eq!(config.config, PathBuf::from("/tmp/c.toml"));
                assert_eq!(file, PathBuf::from("scan.txt"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn daemon_defaults_to_system_config() {
        let cli = Cli::try_parse_from(["sentry", "daemon"]).expect("parse");
        match cli.command {
            Command::Daemon(args) => assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH)),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
