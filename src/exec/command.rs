// src/exec/command.rs

use crate::errors::{CmdstreamError, Result};

/// A command line owned by one channel.
///
/// The line may be edited until the channel starts running it; from then on
/// it is frozen and the command cannot be started again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    line: String,
    started: bool,
}

impl Command {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            started: false,
        }
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn set_line(&mut self, line: impl Into<String>) -> Result<()> {
        if self.started {
            return Err(CmdstreamError::AlreadyExecuted);
        }
        self.line = line.into();
        Ok(())
    }

    pub fn has_started(&self) -> bool {
        self.started
    }

    /// Freeze the command for execution.
    ///
    /// Every [`CommandChannel`](super::CommandChannel) implementation calls
    /// this first in `run`; it is the single-use guard. Fails with
    /// [`CmdstreamError::AlreadyExecuted`] on a second call and with
    /// [`CmdstreamError::EmptyCommand`] for a blank line.
    pub fn begin(&mut self) -> Result<()> {
        if self.started {
            return Err(CmdstreamError::AlreadyExecuted);
        }
        if self.line.trim().is_empty() {
            return Err(CmdstreamError::EmptyCommand);
        }
        self.started = true;
        Ok(())
    }
}

impl From<&str> for Command {
    fn from(line: &str) -> Self {
        Command::new(line)
    }
}

impl From<String> for Command {
    fn from(line: String) -> Self {
        Command::new(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_most_once() {
        let mut cmd = Command::new("project ps");
        cmd.begin().unwrap();
        assert!(cmd.has_started());
        assert!(matches!(cmd.begin(), Err(CmdstreamError::AlreadyExecuted)));
    }

    #[test]
    fn line_is_frozen_after_start() {
        let mut cmd = Command::new("a");
        cmd.set_line("b").unwrap();
        cmd.begin().unwrap();
        assert!(matches!(cmd.set_line("c"), Err(CmdstreamError::AlreadyExecuted)));
        assert_eq!(cmd.line(), "b");
    }

    #[test]
    fn blank_line_cannot_start() {
        let mut cmd = Command::new("   ");
        assert!(matches!(cmd.begin(), Err(CmdstreamError::EmptyCommand)));
        assert!(!cmd.has_started());

        cmd.set_line("echo ok").unwrap();
        assert!(cmd.begin().is_ok());
    }
}
