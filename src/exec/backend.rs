// src/exec/backend.rs

//! Pluggable channel abstraction.
//!
//! Callers hold a `Box<dyn CommandChannel>` instead of a concrete channel.
//! A [`ChannelFactory`] decides which transport a command runs on, which
//! keeps callers independent of the transport and lets tests swap in a
//! scripted channel.
//!
//! - [`ProcessChannelFactory`] runs commands as local subprocesses sharing one
//!   [`ProcessRegistry`].
//! - [`RemoteChannelFactory`] posts commands to the local daemon found by
//!   [`RemoteEndpoint::discover`].

use std::future::Future;
use std::pin::Pin;

use crate::config::{ProcessSection, RemoteSection};
use crate::errors::{CmdstreamError, Result};
use crate::history::SharedHistory;
use crate::report::{ErrorReport, ReportSink};

use super::cancel::CancelHandle;
use super::command::Command;
use super::endpoint::RemoteEndpoint;
use super::process::ProcessChannel;
use super::registry::ProcessRegistry;
use super::remote::RemoteChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    NotStarted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// How a run that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The process exited with code zero.
    Succeeded,
    /// The end-of-stream report arrived before the process exit was seen.
    EndOfStream,
    /// Stopped by a cancel request or a host force-stop.
    Cancelled,
    /// The daemon closed its response.
    StreamClosed,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Exit code, when the process exit was observed.
    pub exit_code: Option<i32>,
    /// Error reports received, in arrival order.
    pub errors: Vec<ErrorReport>,
    /// Number of frames accepted.
    pub frames: usize,
}

/// One command bound to a transport.
pub trait CommandChannel: Send {
    fn command(&self) -> &Command;

    fn command_mut(&mut self) -> &mut Command;

    /// Register callbacks here before calling [`CommandChannel::run`].
    fn reports(&mut self) -> &mut ReportSink;

    fn cancel_handle(&self) -> CancelHandle;

    fn state(&self) -> ChannelState;

    /// Execute the command. A channel runs at most once.
    fn run(&mut self) -> Pin<Box<dyn Future<Output = Result<RunReport>> + Send + '_>>;
}

impl CommandChannel for ProcessChannel {
    fn command(&self) -> &Command {
        ProcessChannel::command(self)
    }

    fn command_mut(&mut self) -> &mut Command {
        ProcessChannel::command_mut(self)
    }

    fn reports(&mut self) -> &mut ReportSink {
        ProcessChannel::reports(self)
    }

    fn cancel_handle(&self) -> CancelHandle {
        ProcessChannel::cancel_handle(self)
    }

    fn state(&self) -> ChannelState {
        ProcessChannel::state(self)
    }

    fn run(&mut self) -> Pin<Box<dyn Future<Output = Result<RunReport>> + Send + '_>> {
        Box::pin(ProcessChannel::run(self))
    }
}

impl CommandChannel for RemoteChannel {
    fn command(&self) -> &Command {
        RemoteChannel::command(self)
    }

    fn command_mut(&mut self) -> &mut Command {
        RemoteChannel::command_mut(self)
    }

    fn reports(&mut self) -> &mut ReportSink {
        RemoteChannel::reports(self)
    }

    fn cancel_handle(&self) -> CancelHandle {
        RemoteChannel::cancel_handle(self)
    }

    fn state(&self) -> ChannelState {
        RemoteChannel::state(self)
    }

    fn run(&mut self) -> Pin<Box<dyn Future<Output = Result<RunReport>> + Send + '_>> {
        Box::pin(RemoteChannel::run(self))
    }
}

/// Creates channels for command lines.
pub trait ChannelFactory: Send + Sync {
    fn create(&self, command: Command) -> Box<dyn CommandChannel>;
}

fn track(history: Option<&SharedHistory>, channel: &mut dyn CommandChannel) {
    if let Some(history) = history {
        let link = history.track(channel.command().line());
        channel.reports().attach_history(link);
    }
}

#[derive(Debug, Clone)]
pub struct ProcessChannelFactory {
    settings: ProcessSection,
    registry: ProcessRegistry,
    history: Option<SharedHistory>,
}

impl ProcessChannelFactory {
    pub fn new(settings: ProcessSection, registry: ProcessRegistry) -> Self {
        Self {
            settings,
            registry,
            history: None,
        }
    }

    /// Track every created command in `history`.
    pub fn with_history(mut self, history: SharedHistory) -> Self {
        self.history = Some(history);
        self
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }
}

impl ChannelFactory for ProcessChannelFactory {
    fn create(&self, command: Command) -> Box<dyn CommandChannel> {
        let mut channel: Box<dyn CommandChannel> = Box::new(ProcessChannel::new(
            command,
            self.settings.clone(),
            self.registry.clone(),
        ));
        track(self.history.as_ref(), channel.as_mut());
        channel
    }
}

#[derive(Debug, Clone)]
pub struct RemoteChannelFactory {
    client: reqwest::Client,
    endpoint: RemoteEndpoint,
    marker: String,
    history: Option<SharedHistory>,
}

impl RemoteChannelFactory {
    pub fn new(settings: &RemoteSection) -> Result<Self> {
        let mut builder = reqwest::Client::builder().no_proxy();
        if let Some(timeout) = settings.connect_timeout() {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build().map_err(CmdstreamError::HttpError)?;

        Ok(Self {
            endpoint: RemoteEndpoint::new(settings, client.clone()),
            client,
            marker: settings.marker.clone(),
            history: None,
        })
    }

    /// Track commands, pings and discovery steps in `history`.
    pub fn with_history(mut self, history: SharedHistory) -> Self {
        self.endpoint = self.endpoint.with_history(history.clone());
        self.history = Some(history);
        self
    }

    pub fn endpoint(&self) -> &RemoteEndpoint {
        &self.endpoint
    }
}

impl ChannelFactory for RemoteChannelFactory {
    fn create(&self, command: Command) -> Box<dyn CommandChannel> {
        let mut channel: Box<dyn CommandChannel> = Box::new(RemoteChannel::new(
            command,
            self.endpoint.clone(),
            self.client.clone(),
            self.marker.clone(),
        ));
        track(self.history.as_ref(), channel.as_mut());
        channel
    }
}
