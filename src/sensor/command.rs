//! External command descriptions for sensors and radio reset steps.

use std::fmt;
use std::process::Command;

/// Program plus arguments, optionally run through `sudo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    #[must_use]
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Same command, prefixed with `sudo` when `use_sudo` is set.
    #[must_use]
    pub fn privileged<I, S>(use_sudo: bool, program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args = args.into_iter().map(Into::into);
        if use_sudo {
            Self::new("sudo", std::iter::once(program.to_string()).chain(args))
        } else {
            Self::new(program, args)
        }
    }

    /// Build a `std::process::Command` with no stdio configuration applied.
    #[must_use]
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}
