//! Shared helpers for integration tests that drive the `sentry` binary.

#![allow(dead_code)]

use std::path::PathBuf;
use std::process::{Command, ExitStatus};

/// Captured result of one CLI invocation. Output is also written to a log file
/// so failures can be inspected after the run.
pub struct CliResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

/// Run `sentry` with `args`, logging the transcript under the target tmp dir.
pub fn run_cli_case(case: &str, args: &[&str]) -> CliResult {
    let output = Command::new(env!("CARGO_BIN_EXE_sentry"))
        .args(args)
        .env("SENTRY_LOG", "warn")
        .output()
        .expect("run sentry binary");

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    let log_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("cli-cases");
    std::fs::create_dir_all(&log_dir).expect("create log dir");
    let log_path = log_dir.join(format!("{case}.log"));
    let transcript = format!(
        "args: {args:?}\nstatus: {}\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}\n",
        output.status
    );
    std::fs::write(&log_path, transcript).expect("write case log");

    CliResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}
