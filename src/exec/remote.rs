// src/exec/remote.rs

use std::io;

use futures_util::TryStreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::report::{Frame, ReportDataPoint, ReportSink};

use super::backend::{ChannelState, RunOutcome, RunReport};
use super::cancel::CancelHandle;
use super::command::Command;
use super::endpoint::RemoteEndpoint;

/// Body of `POST /execute`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest<'a> {
    command_line: &'a str,
}

/// Runs a command on the local daemon and reads its streamed response.
///
/// Each response line that starts with the marker carries one envelope.
/// The response ending is the only completion signal, so a run never fails
/// on its own; producers report failure through error frames.
#[derive(Debug)]
pub struct RemoteChannel {
    command: Command,
    endpoint: RemoteEndpoint,
    client: reqwest::Client,
    marker: String,
    sink: ReportSink,
    cancel: CancelHandle,
    state: ChannelState,
}

impl RemoteChannel {
    pub fn new(
        command: impl Into<Command>,
        endpoint: RemoteEndpoint,
        client: reqwest::Client,
        marker: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            endpoint,
            client,
            marker: marker.into(),
            sink: ReportSink::new(),
            cancel: CancelHandle::new(),
            state: ChannelState::NotStarted,
        }
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn command_mut(&mut self) -> &mut Command {
        &mut self.command
    }

    pub fn reports(&mut self) -> &mut ReportSink {
        &mut self.sink
    }

    pub fn on<T, F>(&mut self, tag: impl Into<String>, callback: F) -> &mut Self
    where
        T: DeserializeOwned + 'static,
        F: FnMut(ReportDataPoint<T>) + Send + 'static,
    {
        self.sink.on(tag, callback);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub async fn run(&mut self) -> Result<RunReport> {
        self.command.begin()?;
        let line = self.command.line().to_string();

        let streamed = self.stream(&line).await;
        self.transport_log("ending")?;
        match streamed {
            Ok(outcome) => {
                self.state = match outcome {
                    RunOutcome::Cancelled => ChannelState::Cancelled,
                    _ => ChannelState::Completed,
                };
                self.sink.terminate(None)?;
                Ok(RunReport {
                    outcome,
                    exit_code: None,
                    errors: self.sink.errors().to_vec(),
                    frames: self.sink.frames_seen(),
                })
            }
            Err(err) => {
                self.state = ChannelState::Failed;
                Err(err)
            }
        }
    }

    async fn stream(&mut self, line: &str) -> Result<RunOutcome> {
        if let Some(link) = self.sink.history() {
            link.update_command(line)?;
            link.resolving_host()?;
        }
        let url = self.endpoint.discover().await?;
        if let Some(link) = self.sink.history() {
            link.started(Some(&url))?;
        }

        self.state = ChannelState::Running;
        info!(command = %line, url = %url, "posting command to daemon");
        self.transport_log("starting request")?;

        let response = self
            .client
            .post(&url)
            .json(&ExecuteRequest { command_line: line })
            .send()
            .await?
            .error_for_status()?;
        self.transport_log("opened response")?;

        let body = response.bytes_stream().map_err(io::Error::other);
        let mut lines = StreamReader::new(Box::pin(body)).lines();
        self.transport_log("opened response stream")?;
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!(command = %line, "cancelled; closing daemon response");
                    return Ok(RunOutcome::Cancelled);
                }

                next = lines.next_line() => match next? {
                    Some(text) => self.handle_line(&text)?,
                    None => {
                        debug!(command = %line, "daemon response closed");
                        return Ok(RunOutcome::StreamClosed);
                    }
                },
            }
        }
    }

    /// Note a transport step in the command's history, if it has one.
    fn transport_log(&self, step: &str) -> Result<()> {
        match self.sink.history() {
            Some(link) => link.log("Info", &format!("[cmdstream] {step}...")),
            None => Ok(()),
        }
    }

    fn handle_line(&mut self, raw: &str) -> Result<()> {
        let cleaned = raw.replace('\u{200b}', "");
        let text = cleaned.trim_end_matches('\r');
        if text.trim().is_empty() {
            return Ok(());
        }

        let Some(envelope) = text.strip_prefix(self.marker.as_str()) else {
            warn!(line = %text, "ignoring daemon line without data marker");
            return Ok(());
        };

        match Frame::parse(envelope) {
            Ok(frame) => {
                self.sink.accept(frame)?;
            }
            Err(err) => warn!(error = %err, "discarding malformed daemon report"),
        }
        Ok(())
    }
}
