// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `cmdstream`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "cmdstream",
    version,
    about = "Run a command and stream its structured reports to stdout.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Cmdstream.toml` in the current working directory, if present.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Run on the local command daemon instead of a subprocess.
    #[arg(long)]
    pub remote: bool,

    /// Query the daemon's `/info` endpoint and exit.
    #[arg(long)]
    pub ping: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CMDSTREAM_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Print the resolved settings and command line without running anything.
    #[arg(long)]
    pub dry_run: bool,

    /// The command line to run. Words are joined with single spaces.
    #[arg(value_name = "COMMAND", trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl CliArgs {
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_words_form_the_command_line() {
        let args = CliArgs::try_parse_from([
            "cmdstream",
            "--remote",
            "content",
            "publish",
            "--manifest-ids=global",
        ])
        .unwrap();
        assert!(args.remote);
        assert_eq!(args.command_line(), "content publish --manifest-ids=global");
    }

    #[test]
    fn flags_default_off() {
        let args = CliArgs::try_parse_from(["cmdstream", "--ping"]).unwrap();
        assert!(args.ping);
        assert!(!args.dry_run);
        assert!(args.config.is_none());
        assert!(args.command.is_empty());
    }
}
