//! Scoped subordinate processes with terminate-then-kill shutdown.
//!
//! Every child is started as the leader of its own process group and is
//! signalled as a group. Wrappers such as `sudo` or `sh -c` therefore cannot
//! leave the real monitor behind holding the output pipe.

use std::process::{Child, ChildStderr, ChildStdout, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::command::CommandSpec;
use crate::core::errors::{Result, SentryError};

/// Grace period between SIGTERM and SIGKILL when a sensor releases its process.
pub const TERMINATE_GRACE: Duration = Duration::from_millis(500);
/// How often exit is polled while waiting.
const EXIT_POLL: Duration = Duration::from_millis(20);

/// Shared handle to a running child. Clones refer to the same process, so the
/// worker thread and the controller can both release it; the first
/// `terminate` wins and later calls are no-ops.
#[derive(Debug, Clone)]
pub struct SupervisedChild {
    label: &'static str,
    child: Arc<Mutex<Option<Child>>>,
}

impl SupervisedChild {
    /// Spawn `spec` with stdout piped and stdin/stderr discarded. Returns the
    /// handle and the stdout pipe for the reader.
    pub fn spawn_piped(label: &'static str, spec: &CommandSpec) -> Result<(Self, ChildStdout)> {
        let (child, stdout, _) = Self::spawn_with(label, spec, Stdio::null())?;
        Ok((child, stdout))
    }

    /// Spawn `spec` with both stdout and stderr piped.
    pub fn spawn_capture(
        label: &'static str,
        spec: &CommandSpec,
    ) -> Result<(Self, ChildStdout, ChildStderr)> {
        let (child, stdout, stderr) = Self::spawn_with(label, spec, Stdio::piped())?;
        let Some(stderr) = stderr else {
            child.terminate(Duration::ZERO);
            return Err(SentryError::Runtime {
                details: format!("{label} process started without a stderr pipe"),
            });
        };
        Ok((child, stdout, stderr))
    }

    fn spawn_with(
        label: &'static str,
        spec: &CommandSpec,
        stderr: Stdio,
    ) -> Result<(Self, ChildStdout, Option<ChildStderr>)> {
        let mut command = spec.to_command();
        command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(stderr);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt as _;
            command.process_group(0);
        }
        let mut child = command.spawn().map_err(|source| SentryError::SensorSpawn {
            sensor: label,
            command: spec.to_string(),
            source,
        })?;
        let Some(stdout) = child.stdout.take() else {
            // Unreachable with Stdio::piped, but never leak the child.
            let _ = child.kill();
            let _ = child.wait();
            return Err(SentryError::Runtime {
                details: format!("{label} process started without a stdout pipe"),
            });
        };
        let stderr = child.stderr.take();
        debug!(sensor = label, pid = child.id(), command = %spec, "subordinate process started");
        Ok((
            Self {
                label,
                child: Arc::new(Mutex::new(Some(child))),
            },
            stdout,
            stderr,
        ))
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.lock().as_ref().map(Child::id)
    }

    /// True while the process has not exited and has not been released.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.child
            .lock()
            .as_mut()
            .is_some_and(|child| matches!(child.try_wait(), Ok(None)))
    }

    /// Wait up to `limit` for the process to exit on its own. On exit the
    /// child is reaped and released. `None` when the limit passed, or when
    /// another holder already released the process.
    pub fn wait_timeout(&self, limit: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + limit;
        loop {
            {
                let mut slot = self.child.lock();
                let child = slot.as_mut()?;
                if let Ok(Some(status)) = child.try_wait() {
                    slot.take();
                    return Some(status);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            std::thread::sleep(EXIT_POLL.min(deadline - now));
        }
    }

    /// Ask the process group to exit, wait up to `grace`, then kill the
    /// whole group. Always reaps the leader.
    pub fn terminate(&self, grace: Duration) {
        let Some(mut child) = self.child.lock().take() else {
            return;
        };
        let pid = child.id();
        if matches!(child.try_wait(), Ok(Some(_))) {
            // Leader gone; stragglers in its group still get killed.
            signal_group(&mut child, GroupSignal::Kill, self.label);
            debug!(sensor = self.label, pid, "subordinate process already exited");
            return;
        }

        signal_group(&mut child, GroupSignal::Terminate, self.label);
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if matches!(child.try_wait(), Ok(Some(_))) {
                signal_group(&mut child, GroupSignal::Kill, self.label);
                debug!(sensor = self.label, pid, "subordinate process terminated");
                return;
            }
            std::thread::sleep(EXIT_POLL);
        }

        signal_group(&mut child, GroupSignal::Kill, self.label);
        match child.wait() {
            Ok(status) => debug!(sensor = self.label, pid, %status, "subordinate process killed"),
            Err(err) => warn!(sensor = self.label, pid, error = %err, "reaping killed process failed"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

/// Signal the child's process group. A reaped leader's id stays reserved
/// while stragglers remain in its group.
#[cfg(unix)]
fn signal_group(child: &mut Child, signal: GroupSignal, label: &'static str) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(child.id()) else {
        return;
    };
    let signal = match signal {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => debug!(sensor = label, pgid = raw, ?signal, error = %err, "group signal failed"),
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, signal: GroupSignal, label: &'static str) {
    if matches!(signal, GroupSignal::Kill) {
        if let Err(err) = child.kill() {
            debug!(sensor = label, error = %err, "kill failed");
        }
    }
}
