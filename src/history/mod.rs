// src/history/mod.rs

//! Per-invocation bookkeeping.
//!
//! Every tracked command gets a [`CommandDescriptor`] keyed by a generated
//! [`CommandId`]. Its status is derived from which timestamps are set, and
//! the frames seen so far are sorted into payloads, logs and errors.

pub mod buffer;
pub mod descriptor;

use std::sync::{Arc, Mutex, PoisonError};

use crate::errors::Result;
use crate::report::Frame;

pub use buffer::{HistoryBuffer, HistoryCaps, HistorySnapshot, PingRecord, ServerEvent};
pub use descriptor::{CommandDescriptor, CommandId, CommandStatus};

/// A history buffer shared between a channel factory and its channels.
#[derive(Debug, Clone, Default)]
pub struct SharedHistory {
    inner: Arc<Mutex<HistoryBuffer>>,
}

impl SharedHistory {
    pub fn new(buffer: HistoryBuffer) -> Self {
        Self {
            inner: Arc::new(Mutex::new(buffer)),
        }
    }

    /// Run `f` with exclusive access to the buffer.
    pub fn with<R>(&self, f: impl FnOnce(&mut HistoryBuffer) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Register `command_line` and return a link bound to its id.
    pub fn track(&self, command_line: &str) -> HistoryLink {
        let id = self.with(|history| history.add_command(command_line));
        HistoryLink {
            history: self.clone(),
            id,
        }
    }
}

/// One command's handle into a [`SharedHistory`].
#[derive(Debug, Clone)]
pub struct HistoryLink {
    history: SharedHistory,
    id: CommandId,
}

impl HistoryLink {
    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn history(&self) -> &SharedHistory {
        &self.history
    }

    pub fn update_command(&self, command_line: &str) -> Result<()> {
        self.history.with(|h| h.update_command(self.id, command_line))
    }

    pub fn resolving_host(&self) -> Result<()> {
        self.history.with(|h| h.update_resolving_host_time(self.id))
    }

    pub fn started(&self, url: Option<&str>) -> Result<()> {
        self.history.with(|h| h.update_start_time(self.id, url))
    }

    pub fn finished(&self, exit_code: Option<i32>) -> Result<()> {
        self.history.with(|h| {
            if let Some(code) = exit_code {
                h.update_exit_code(self.id, code)?;
            }
            h.update_complete_time(self.id)
        })
    }

    pub fn log(&self, level: &str, message: &str) -> Result<()> {
        self.history.with(|h| h.add_custom_log(self.id, message, level))
    }

    pub fn record(&self, frame: &Frame) -> Result<()> {
        self.history.with(|h| h.handle_message(self.id, frame))
    }
}
