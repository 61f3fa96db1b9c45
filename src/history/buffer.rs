// src/history/buffer.rs

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::config::HistorySection;
use crate::errors::{CmdstreamError, Result};
use crate::exec::PingResult;
use crate::report::{ErrorOutput, Frame, LogMessage};

use super::descriptor::{CommandDescriptor, CommandId};

/// How much of each list a [`HistorySnapshot`] keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryCaps {
    pub commands: usize,
    /// Newest log lines kept per command.
    pub logs: usize,
    pub server_events: usize,
}

impl Default for HistoryCaps {
    fn default() -> Self {
        HistoryCaps::from(&HistorySection::default())
    }
}

impl From<&HistorySection> for HistoryCaps {
    fn from(section: &HistorySection) -> Self {
        Self {
            commands: section.command_cap,
            logs: section.log_cap,
            server_events: section.server_event_cap,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerEvent {
    pub time: DateTime<Utc>,
    pub message: String,
}

/// Outcome of the most recent daemon `/info` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PingRecord {
    pub port: u16,
    pub url: String,
    pub owner_matches: bool,
    pub version_matches: bool,
    pub result: PingResult,
}

/// Serializable, capped view of a [`HistoryBuffer`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySnapshot {
    pub commands: Vec<CommandDescriptor>,
    pub server_events: Vec<ServerEvent>,
    pub latest_ping: Option<PingRecord>,
}

/// In-memory record of command invocations and daemon activity.
///
/// Descriptors are only ever removed by [`HistoryBuffer::clear`]. Every
/// per-command operation fails with [`CmdstreamError::UnknownCommand`] for
/// an id the buffer never issued.
#[derive(Debug, Default)]
pub struct HistoryBuffer {
    caps: HistoryCaps,
    order: Vec<CommandId>,
    commands: HashMap<CommandId, CommandDescriptor>,
    server_events: Vec<ServerEvent>,
    latest_ping: Option<PingRecord>,
}

impl HistoryBuffer {
    pub fn new(caps: HistoryCaps) -> Self {
        Self {
            caps,
            ..Self::default()
        }
    }

    pub fn add_command(&mut self, command_line: &str) -> CommandId {
        let id = Uuid::new_v4();
        let mut desc = CommandDescriptor::new(id, command_line);
        desc.created_at = Some(Utc::now());

        self.order.push(id);
        self.commands.insert(id, desc);
        id
    }

    pub fn get(&self, id: CommandId) -> Result<&CommandDescriptor> {
        self.commands
            .get(&id)
            .ok_or(CmdstreamError::UnknownCommand(id))
    }

    fn get_mut(&mut self, id: CommandId) -> Result<&mut CommandDescriptor> {
        self.commands
            .get_mut(&id)
            .ok_or(CmdstreamError::UnknownCommand(id))
    }

    /// Descriptors in registration order.
    pub fn commands(&self) -> impl Iterator<Item = &CommandDescriptor> {
        self.order.iter().filter_map(|id| self.commands.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn update_command(&mut self, id: CommandId, command_line: &str) -> Result<()> {
        self.get_mut(id)?.command_string = command_line.to_string();
        Ok(())
    }

    pub fn update_resolving_host_time(&mut self, id: CommandId) -> Result<()> {
        self.get_mut(id)?.resolve_host_at = Some(Utc::now());
        Ok(())
    }

    pub fn update_start_time(&mut self, id: CommandId, url: Option<&str>) -> Result<()> {
        let desc = self.get_mut(id)?;
        desc.started_at = Some(Utc::now());
        desc.url = url.map(str::to_string);
        Ok(())
    }

    pub fn update_complete_time(&mut self, id: CommandId) -> Result<()> {
        self.get_mut(id)?.ended_at = Some(Utc::now());
        Ok(())
    }

    pub fn update_exit_code(&mut self, id: CommandId, exit_code: i32) -> Result<()> {
        self.get_mut(id)?.exit_code = Some(exit_code);
        Ok(())
    }

    /// Append a log line that did not come from the tool itself.
    pub fn add_custom_log(&mut self, id: CommandId, message: &str, level: &str) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        self.get_mut(id)?
            .logs
            .push(LogMessage::new(level, message, Some(now)));
        Ok(())
    }

    /// Sort `frame` into the descriptor's logs, errors or payloads.
    ///
    /// Error reports are also mirrored into the log list at `Error` level.
    pub fn handle_message(&mut self, id: CommandId, frame: &Frame) -> Result<()> {
        let desc = self.get_mut(id)?;
        desc.last_message_at = Some(Utc::now());

        if frame.is_log() {
            match frame.decode::<LogMessage>() {
                Ok(point) => desc.logs.push(point.data),
                Err(err) => warn!(command = %id, error = %err, "unreadable log report"),
            }
        } else if frame.is_error() {
            match frame.decode::<ErrorOutput>() {
                Ok(point) => {
                    let message = match &point.data.stack_trace {
                        Some(trace) => format!("{}\n\n{}", point.data.message, trace),
                        None => point.data.message.clone(),
                    };
                    desc.logs.push(LogMessage::new("Error", message, point.ts));
                    desc.errors.push(point.data);
                }
                Err(err) => warn!(command = %id, error = %err, "unreadable error report"),
            }
        } else {
            desc.payloads.push(frame.clone());
        }
        Ok(())
    }

    pub fn add_server_event(&mut self, message: impl Into<String>) {
        self.server_events.push(ServerEvent {
            time: Utc::now(),
            message: message.into(),
        });
    }

    pub fn server_events(&self) -> &[ServerEvent] {
        &self.server_events
    }

    pub fn set_latest_ping(&mut self, record: PingRecord) {
        self.latest_ping = Some(record);
    }

    pub fn latest_ping(&self) -> Option<&PingRecord> {
        self.latest_ping.as_ref()
    }

    /// Newest entries of every list, within the configured caps.
    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            commands: newest(self.commands().cloned().collect(), self.caps.commands)
                .into_iter()
                .map(|mut desc| {
                    desc.logs = newest(desc.logs, self.caps.logs);
                    desc
                })
                .collect(),
            server_events: newest(self.server_events.clone(), self.caps.server_events),
            latest_ping: self.latest_ping.clone(),
        }
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.commands.clear();
        self.server_events.clear();
        self.latest_ping = None;
    }
}

fn newest<T>(mut items: Vec<T>, cap: usize) -> Vec<T> {
    let excess = items.len().saturating_sub(cap);
    items.drain(..excess);
    items
}
