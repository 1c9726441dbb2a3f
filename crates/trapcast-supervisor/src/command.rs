//! Command building utilities.

use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Base command cannot be parsed: {0}")]
    InvalidBase(String),
    #[error("Base command is empty after parsing")]
    EmptyCommand,
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandParts {
    /// Create new command parts.
    #[must_use]
    pub const fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// Build a tokio command for these parts.
    ///
    /// Stdin is closed; stdout and stderr are inherited so worker logs
    /// land next to the server's.
    #[must_use]
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        cmd
    }
}

/// Builder for worker command lines.
///
/// The base is a shell-style command line (e.g. `python workers/trap_receiver.py`)
/// split with POSIX rules; flags are appended verbatim after it.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    base: String,
    extra: Vec<String>,
}

impl CommandBuilder {
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            extra: Vec::new(),
        }
    }

    /// Append `flag value`.
    #[must_use]
    pub fn flag(mut self, flag: &str, value: impl ToString) -> Self {
        self.extra.push(flag.to_string());
        self.extra.push(value.to_string());
        self
    }

    /// Split the base and append the extra arguments.
    ///
    /// # Errors
    /// Returns error if the base cannot be parsed or yields no program.
    pub fn build(&self) -> Result<CommandParts, CommandBuildError> {
        let mut parts = shlex::split(&self.base)
            .ok_or_else(|| CommandBuildError::InvalidBase(self.base.clone()))?
            .into_iter()
            .chain(self.extra.iter().cloned());

        let program = parts.next().ok_or(CommandBuildError::EmptyCommand)?;
        Ok(CommandParts::new(program, parts.collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_splits_quoted_base() {
        let parts = CommandBuilder::new("sh -c 'sleep 30' worker")
            .flag("--port", 1061)
            .flag("--community", "public")
            .build()
            .unwrap();
        assert_eq!(parts.program, "sh");
        assert_eq!(
            parts.args,
            ["-c", "sleep 30", "worker", "--port", "1061", "--community", "public"]
        );
    }

    #[test]
    fn test_build_rejects_empty_and_unbalanced() {
        assert!(matches!(
            CommandBuilder::new("   ").build(),
            Err(CommandBuildError::EmptyCommand)
        ));
        assert!(matches!(
            CommandBuilder::new("python 'unterminated").build(),
            Err(CommandBuildError::InvalidBase(_))
        ));
    }
}
