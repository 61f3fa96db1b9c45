#![allow(dead_code)]

use cmdstream::config::{ConfigFile, RawConfigFile};
use cmdstream::report::{envelope, Frame};
use cmdstream::types::ChannelKind;
use serde_json::{json, Value};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn channel(mut self, kind: ChannelKind) -> Self {
        self.config.config.channel = kind;
        self
    }

    pub fn executable(mut self, exe: &str) -> Self {
        self.config.process.executable = Some(exe.to_string());
        self
    }

    pub fn delimiter(mut self, delimiter: &str) -> Self {
        self.config.process.delimiter = delimiter.to_string();
        self
    }

    pub fn exit_grace_ms(mut self, ms: u64) -> Self {
        self.config.process.exit_grace_ms = ms;
        self
    }

    pub fn accept_unterminated(mut self, val: bool) -> Self {
        self.config.process.accept_unterminated = val;
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.config
            .process
            .env
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn remote_port(mut self, port: u16) -> Self {
        self.config.remote.start_port = port;
        self
    }

    pub fn max_port_attempts(mut self, attempts: u16) -> Self {
        self.config.remote.max_port_attempts = attempts;
        self
    }

    pub fn owner(mut self, owner: &str) -> Self {
        self.config.remote.owner = Some(owner.to_string());
        self
    }

    pub fn version(mut self, version: &str) -> Self {
        self.config.remote.version = Some(version.to_string());
        self
    }

    pub fn history_caps(mut self, commands: usize, logs: usize, server_events: usize) -> Self {
        self.config.history.command_cap = commands;
        self.config.history.log_cap = logs;
        self.config.history.server_event_cap = server_events;
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for report envelopes, as JSON text or as a parsed `Frame`.
pub struct FrameBuilder {
    tag: String,
    data: Value,
    ts: Option<i64>,
}

impl FrameBuilder {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            data: json!({}),
            ts: None,
        }
    }

    pub fn eof() -> Self {
        Self::new("eof")
    }

    pub fn error(tag: &str, message: &str) -> Self {
        Self::new(tag).data(json!({ "message": message }))
    }

    pub fn log(level: &str, message: &str) -> Self {
        Self::new("logs").data(json!({ "message": message, "logLevel": level }))
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn ts(mut self, ts: i64) -> Self {
        self.ts = Some(ts);
        self
    }

    pub fn json(&self) -> String {
        let mut value = envelope(&self.tag, self.data.clone());
        if let (Some(ts), Some(map)) = (self.ts, value.as_object_mut()) {
            map.insert("ts".to_string(), json!(ts));
        }
        value.to_string()
    }

    /// Envelope followed by `delimiter`, as a producer writes it.
    pub fn delimited(&self, delimiter: &str) -> String {
        format!("{}{}", self.json(), delimiter)
    }

    pub fn build(&self) -> Frame {
        Frame::parse(&self.json()).expect("builder produces valid envelopes")
    }
}
