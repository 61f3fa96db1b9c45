// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::fmt;

use thiserror::Error;

use crate::history::CommandId;
use crate::report::ErrorReport;

#[derive(Error, Debug)]
pub enum CmdstreamError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("command cannot be changed or run again once execution has started")]
    AlreadyExecuted,

    #[error("command line must be set before running")]
    EmptyCommand,

    #[error(transparent)]
    InvocationFailed(#[from] InvocationFailure),

    #[error("no command found for id=[{0}]")]
    UnknownCommand(CommandId),

    #[error("no matching command daemon reachable at {url}")]
    DaemonUnavailable { url: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A subprocess exited with a non-zero status.
///
/// Carries every error report the producer emitted before exiting, in the
/// order they arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationFailure {
    pub command: String,
    pub exit_code: i32,
    pub errors: Vec<ErrorReport>,
}

impl fmt::Display for InvocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "command `{}` failed with exit code {} ({} error report(s))",
            self.command,
            self.exit_code,
            self.errors.len()
        )?;
        for report in &self.errors {
            write!(f, "\n  [{}] {}", report.tag, report.data.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for InvocationFailure {}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, CmdstreamError>;
