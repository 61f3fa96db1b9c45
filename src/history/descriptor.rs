// src/history/descriptor.rs

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

use crate::report::{ErrorOutput, Frame, LogMessage};

pub type CommandId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Pending,
    ResolvingHost,
    Running,
    Done,
}

/// Bookkeeping record for one command invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDescriptor {
    pub id: CommandId,
    pub command_string: String,
    pub created_at: Option<DateTime<Utc>>,
    pub resolve_host_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    /// Where the command ran, for remote invocations.
    pub url: Option<String>,
    pub payloads: Vec<Frame>,
    pub logs: Vec<LogMessage>,
    pub errors: Vec<ErrorOutput>,
}

impl CommandDescriptor {
    pub fn new(id: CommandId, command_string: impl Into<String>) -> Self {
        Self {
            id,
            command_string: command_string.into(),
            created_at: None,
            resolve_host_at: None,
            started_at: None,
            ended_at: None,
            last_message_at: None,
            exit_code: None,
            url: None,
            payloads: Vec::new(),
            logs: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn status(&self) -> CommandStatus {
        if self.created_at.is_none() {
            CommandStatus::Pending
        } else if self.started_at.is_none() {
            CommandStatus::ResolvingHost
        } else if self.ended_at.is_none() {
            CommandStatus::Running
        } else {
            CommandStatus::Done
        }
    }

    /// `--key=value` and bare `--flag` options of the command string, in
    /// order. Flags map to `"true"`; surrounding quotes are stripped.
    pub fn arguments(&self) -> Vec<(String, String)> {
        static OPTION: OnceLock<Regex> = OnceLock::new();
        let re = OPTION.get_or_init(|| {
            Regex::new(r#"--([A-Za-z0-9][A-Za-z0-9-]*)(?:=("[^"]*"|\S+))?"#)
                .expect("option pattern is valid")
        });

        re.captures_iter(&self.command_string)
            .map(|caps| {
                let key = caps[1].to_string();
                let value = caps
                    .get(2)
                    .map(|m| m.as_str().trim_matches('"').to_string())
                    .unwrap_or_else(|| "true".to_string());
                (key, value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_timestamps() {
        let mut desc = CommandDescriptor::new(Uuid::new_v4(), "project ps");
        assert_eq!(desc.status(), CommandStatus::Pending);

        desc.created_at = Some(Utc::now());
        assert_eq!(desc.status(), CommandStatus::ResolvingHost);

        desc.started_at = Some(Utc::now());
        assert_eq!(desc.status(), CommandStatus::Running);

        desc.ended_at = Some(Utc::now());
        assert_eq!(desc.status(), CommandStatus::Done);
    }

    #[test]
    fn arguments_parse_options_in_order() {
        let desc = CommandDescriptor::new(
            Uuid::new_v4(),
            r#"services run --ids=a --log "info" --host="http://x y" --pretty --port=8432"#,
        );
        assert_eq!(
            desc.arguments(),
            vec![
                ("ids".to_string(), "a".to_string()),
                ("log".to_string(), "true".to_string()),
                ("host".to_string(), "http://x y".to_string()),
                ("pretty".to_string(), "true".to_string()),
                ("port".to_string(), "8432".to_string()),
            ]
        );
    }
}
