// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::report::DEFAULT_DELIMITER;
use crate::types::ChannelKind;

/// Configuration exactly as read from TOML, before validation.
///
/// ```toml
/// [config]
/// channel = "process"
///
/// [process]
/// executable = "beam"
/// delimiter = "<|report|>"
///
/// [remote]
/// start_port = 8432
/// owner = "my-project"
///
/// [history]
/// command_cap = 30
/// ```
///
/// Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub process: ProcessSection,

    #[serde(default)]
    pub remote: RemoteSection,

    #[serde(default)]
    pub history: HistorySection,
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub process: ProcessSection,
    pub remote: RemoteSection,
    pub history: HistorySection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            config: raw.config,
            process: raw.process,
            remote: raw.remote,
            history: raw.history,
        }
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigSection {
    /// Which channel runs commands when the CLI does not force one.
    #[serde(default)]
    pub channel: ChannelKind,
}

/// `[process]` section: local subprocess execution.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessSection {
    /// Tool prefixed to every command line. Without it the command line is
    /// handed to the shell as-is.
    #[serde(default)]
    pub executable: Option<String>,

    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    /// How long an observed exit waits for stdout/stderr to close.
    #[serde(default = "default_exit_grace_ms")]
    pub exit_grace_ms: u64,

    /// Accept a final frame that has no trailing delimiter.
    #[serde(default = "default_true")]
    pub accept_unterminated: bool,

    /// Surface non-frame stderr lines at `warn` instead of `trace`.
    #[serde(default = "default_true")]
    pub log_stderr: bool,

    /// Extra environment for every child.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_delimiter() -> String {
    DEFAULT_DELIMITER.to_string()
}

fn default_exit_grace_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

impl Default for ProcessSection {
    fn default() -> Self {
        Self {
            executable: None,
            delimiter: default_delimiter(),
            exit_grace_ms: default_exit_grace_ms(),
            accept_unterminated: true,
            log_stderr: true,
            env: BTreeMap::new(),
        }
    }
}

impl ProcessSection {
    pub fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_ms)
    }
}

/// `[remote]` section: the HTTP command daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSection {
    #[serde(default = "default_host")]
    pub host: String,

    /// First port probed during discovery.
    #[serde(default = "default_start_port")]
    pub start_port: u16,

    #[serde(default = "default_max_port_attempts")]
    pub max_port_attempts: u16,

    /// Owner the daemon must report on `/info`. Unset accepts any owner.
    #[serde(default)]
    pub owner: Option<String>,

    /// Version the daemon must report on `/info`. Unset accepts any version.
    #[serde(default)]
    pub version: Option<String>,

    /// Prefix of response lines that carry an envelope.
    #[serde(default = "default_marker")]
    pub marker: String,

    /// Connect timeout for daemon requests. Responses themselves may stream
    /// for as long as the command runs.
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_start_port() -> u16 {
    8432
}

fn default_max_port_attempts() -> u16 {
    10
}

fn default_marker() -> String {
    "data: ".to_string()
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            start_port: default_start_port(),
            max_port_attempts: default_max_port_attempts(),
            owner: None,
            version: None,
            marker: default_marker(),
            connect_timeout_secs: None,
        }
    }
}

impl RemoteSection {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }
}

/// `[history]` section: how much a history snapshot keeps.
#[derive(Debug, Clone, Deserialize)]
pub struct HistorySection {
    #[serde(default = "default_command_cap")]
    pub command_cap: usize,

    #[serde(default = "default_log_cap")]
    pub log_cap: usize,

    #[serde(default = "default_server_event_cap")]
    pub server_event_cap: usize,
}

fn default_command_cap() -> usize {
    30
}

fn default_log_cap() -> usize {
    5000
}

fn default_server_event_cap() -> usize {
    100
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            command_cap: default_command_cap(),
            log_cap: default_log_cap(),
            server_event_cap: default_server_event_cap(),
        }
    }
}
