// src/exec/process.rs

//! Local subprocess channel.
//!
//! The command line runs through the platform shell with stdout and stderr
//! piped. Each stream gets its own [`FrameCodec`]; reader tasks only enqueue
//! raw lines, and [`ProcessChannel::run`] is the single consumer that
//! decodes and dispatches them.
//!
//! Two signals end a run, whichever comes first:
//! - the child exits. The exit resolves once both streams have closed, or
//!   after the configured grace period if they stay open;
//! - the producer sends its end-of-stream report. The child may still be
//!   running; it is handed to a background reaper that keeps its pid
//!   registered until it really exits.
//!
//! Once the child has exited, anything still alive in its process group
//! (typically a background job holding the output pipes) is killed before
//! the pid leaves the registry.

use std::process::Stdio;

use anyhow::Context;
use serde::de::DeserializeOwned;
use tokio::process::{Child, Command as ShellCommand};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::config::ProcessSection;
use crate::errors::{InvocationFailure, Result};
use crate::report::{FrameCodec, FrameDisposition, ReportDataPoint, ReportSink};

use super::backend::{ChannelState, RunOutcome, RunReport};
use super::cancel::CancelHandle;
use super::command::Command;
use super::completion::{Completion, CompletionLatch};
use super::registry::{ProcessRegistry, terminate, terminate_group};
use super::work_queue::{
    StreamEvent, StreamSource, WorkReceiver, WorkSender, spawn_exit_notice, spawn_line_reader,
    work_queue,
};

/// Pid of the process that launched the child.
pub const HOST_PID_ENV: &str = "CMDSTREAM_HOST_PID";
/// Executable path of the process that launched the child.
pub const HOST_EXE_ENV: &str = "CMDSTREAM_HOST_EXE";
/// Working directory of the process that launched the child.
pub const HOST_DIR_ENV: &str = "CMDSTREAM_HOST_DIR";

#[derive(Debug)]
pub struct ProcessChannel {
    command: Command,
    settings: ProcessSection,
    registry: ProcessRegistry,
    sink: ReportSink,
    cancel: CancelHandle,
    state: ChannelState,
}

/// Why the consumer loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Resolved(Completion),
    Cancelled,
    ForceStopped,
}

/// Per-run consumer state.
struct Pump {
    stdout: FrameCodec,
    stderr: FrameCodec,
    open_streams: u8,
    exited: bool,
    pending_exit: Option<i32>,
    latch: CompletionLatch,
}

impl Pump {
    fn new(settings: &ProcessSection) -> Self {
        let codec = FrameCodec::new(settings.delimiter.clone())
            .with_unterminated_fallback(settings.accept_unterminated);
        Self {
            stdout: codec.clone(),
            stderr: codec,
            open_streams: 2,
            exited: false,
            pending_exit: None,
            latch: CompletionLatch::new(),
        }
    }

    fn codec(&mut self, source: StreamSource) -> &mut FrameCodec {
        match source {
            StreamSource::Stdout => &mut self.stdout,
            StreamSource::Stderr => &mut self.stderr,
        }
    }
}

impl ProcessChannel {
    pub fn new(
        command: impl Into<Command>,
        settings: ProcessSection,
        registry: ProcessRegistry,
    ) -> Self {
        Self {
            command: command.into(),
            settings,
            registry,
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

    /// Register a typed callback for `tag`.
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

    /// Launch the command and consume its output until the run resolves.
    ///
    /// A non-zero exit fails with [`InvocationFailure`] carrying every error
    /// report seen. Cancellation and host force-stop are not errors.
    pub async fn run(&mut self) -> Result<RunReport> {
        self.command.begin()?;
        let line = self.command.line().to_string();

        if let Some(link) = self.sink.history() {
            link.update_command(&line)?;
            link.started(None)?;
        }

        let spawned = self
            .shell_command(&line)
            .spawn()
            .with_context(|| format!("spawning process for command '{line}'"));
        let mut child = match spawned {
            Ok(child) => child,
            Err(err) => {
                self.state = ChannelState::Failed;
                return Err(err.into());
            }
        };

        let pid = child.id();
        if let Some(pid) = pid {
            self.registry.add(pid);
        }
        self.state = ChannelState::Running;
        info!(command = %line, pid, "process started");

        let (tx, mut rx) = work_queue();
        match child.stdout.take() {
            Some(out) => {
                spawn_line_reader(StreamSource::Stdout, out, tx.clone());
            }
            None => {
                let _ = tx.send(StreamEvent::Closed(StreamSource::Stdout));
            }
        }
        match child.stderr.take() {
            Some(err) => {
                spawn_line_reader(StreamSource::Stderr, err, tx.clone());
            }
            None => {
                let _ = tx.send(StreamEvent::Closed(StreamSource::Stderr));
            }
        }

        let mut pump = Pump::new(&self.settings);
        let stop = self.pump(&mut child, &mut pump, &tx, &mut rx).await;

        let stop = match stop {
            Ok(stop) => stop,
            Err(err) => {
                kill(&self.registry, &mut child, pid, pump.exited).await;
                self.state = ChannelState::Failed;
                return Err(err);
            }
        };

        match stop {
            Stop::Cancelled | Stop::ForceStopped => {
                info!(command = %line, pid, reason = ?stop, "stopping process");
                kill(&self.registry, &mut child, pid, pump.exited).await;
                self.state = ChannelState::Cancelled;
                self.sink.terminate(pump.pending_exit)?;
                Ok(self.report(RunOutcome::Cancelled, pump.pending_exit))
            }
            Stop::Resolved(Completion::EndOfStream) => {
                if pump.exited {
                    sweep_group(pid);
                    self.release(pid);
                } else {
                    hand_to_reaper(child, pid, self.registry.clone());
                }
                debug!(command = %line, "end-of-stream report resolved the run");
                self.state = ChannelState::Completed;
                self.sink.terminate(pump.pending_exit)?;
                Ok(self.report(RunOutcome::EndOfStream, pump.pending_exit))
            }
            Stop::Resolved(Completion::Exited(code)) => {
                // Output already queued is still delivered; later signals
                // lose against the latch.
                while let Ok(event) = rx.try_recv() {
                    self.handle_event(&mut pump, event)?;
                }
                if pump.open_streams > 0 {
                    debug!(
                        command = %line,
                        open_streams = pump.open_streams,
                        "output still held open after exit"
                    );
                }
                sweep_group(pid);
                self.release(pid);
                self.sink.terminate(Some(code))?;
                info!(command = %line, exit_code = code, "process finished");

                if code == 0 {
                    self.state = ChannelState::Completed;
                    Ok(self.report(RunOutcome::Succeeded, Some(code)))
                } else {
                    self.state = ChannelState::Failed;
                    Err(InvocationFailure {
                        command: line,
                        exit_code: code,
                        errors: self.sink.take_errors(),
                    }
                    .into())
                }
            }
        }
    }

    async fn pump(
        &mut self,
        child: &mut Child,
        pump: &mut Pump,
        tx: &WorkSender,
        rx: &mut WorkReceiver,
    ) -> Result<Stop> {
        let cancel = self.cancel.clone();
        let mut force_stop = self.registry.subscribe();
        let mut watching_force_stop = true;
        let grace = self.settings.exit_grace();

        loop {
            if cancel.is_cancelled() {
                return Ok(Stop::Cancelled);
            }
            if force_stop_raised(&mut force_stop) {
                return Ok(Stop::ForceStopped);
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Ok(Stop::Cancelled),

                changed = force_stop.changed(), if watching_force_stop => {
                    if changed.is_err() {
                        watching_force_stop = false;
                    }
                }

                status = child.wait(), if !pump.exited => {
                    pump.exited = true;
                    let code = match status {
                        Ok(status) => status.code().unwrap_or(-1),
                        Err(err) => {
                            warn!(error = %err, "failed to read exit status");
                            -1
                        }
                    };
                    debug!(exit_code = code, open_streams = pump.open_streams, "process exited");

                    pump.pending_exit = Some(code);
                    if pump.open_streams == 0 {
                        if pump.latch.resolve(Completion::Exited(code)) {
                            return Ok(Stop::Resolved(Completion::Exited(code)));
                        }
                    } else {
                        spawn_exit_notice(tx.clone(), code, grace);
                    }
                }

                event = rx.recv() => {
                    // The queue cannot close while `tx` is alive.
                    let Some(event) = event else {
                        let code = pump.pending_exit.unwrap_or(-1);
                        return Ok(Stop::Resolved(Completion::Exited(code)));
                    };
                    if let Some(completion) = self.handle_event(pump, event)? {
                        return Ok(Stop::Resolved(completion));
                    }
                }
            }
        }
    }

    /// Apply one queued event. Returns the completion it won, if any.
    fn handle_event(&mut self, pump: &mut Pump, event: StreamEvent) -> Result<Option<Completion>> {
        match event {
            StreamEvent::Line { source, text } => {
                let codec = pump.codec(source);
                let eof = feed_line(&mut self.sink, codec, source, &text, self.settings.log_stderr)?;
                if eof && pump.latch.resolve(Completion::EndOfStream) {
                    return Ok(Some(Completion::EndOfStream));
                }
            }
            StreamEvent::Closed(source) => {
                pump.open_streams = pump.open_streams.saturating_sub(1);
                if let Some(rest) = pump.codec(source).finish() {
                    debug!(stream = %source, text = %rest, "unframed output left at end of stream");
                }
                if pump.open_streams == 0 {
                    if let Some(code) = pump.pending_exit {
                        if pump.latch.resolve(Completion::Exited(code)) {
                            return Ok(Some(Completion::Exited(code)));
                        }
                    }
                }
            }
            StreamEvent::Exited(code) => {
                if pump.latch.resolve(Completion::Exited(code)) {
                    return Ok(Some(Completion::Exited(code)));
                }
            }
        }
        Ok(None)
    }

    fn shell_command(&self, line: &str) -> ShellCommand {
        let script = match self.settings.executable.as_deref() {
            Some(exe) if !exe.trim().is_empty() => format!("{exe} {line}"),
            _ => line.to_string(),
        };

        let mut cmd = if cfg!(windows) {
            let mut c = ShellCommand::new("cmd");
            c.arg("/C").arg(&script);
            c
        } else {
            let mut c = ShellCommand::new("sh");
            c.arg("-c").arg(&script);
            c
        };

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .envs(host_identity_env())
            .envs(&self.settings.env);

        // Lead a fresh process group so a kill reaches everything the shell
        // started.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }

    fn release(&self, pid: Option<u32>) {
        if let Some(pid) = pid {
            self.registry.remove(pid);
        }
    }

    fn report(&self, outcome: RunOutcome, exit_code: Option<i32>) -> RunReport {
        RunReport {
            outcome,
            exit_code,
            errors: self.sink.errors().to_vec(),
            frames: self.sink.frames_seen(),
        }
    }
}

/// Environment telling the child who launched it.
pub fn host_identity_env() -> Vec<(&'static str, String)> {
    let mut env = vec![(HOST_PID_ENV, std::process::id().to_string())];
    if let Ok(exe) = std::env::current_exe() {
        env.push((HOST_EXE_ENV, exe.display().to_string()));
    }
    if let Ok(dir) = std::env::current_dir() {
        env.push((HOST_DIR_ENV, dir.display().to_string()));
    }
    env
}

fn force_stop_raised(rx: &mut watch::Receiver<bool>) -> bool {
    *rx.borrow_and_update()
}

/// Feed one output line through `codec` into `sink`.
///
/// Returns whether an end-of-stream report was among the frames.
fn feed_line(
    sink: &mut ReportSink,
    codec: &mut FrameCodec,
    source: StreamSource,
    text: &str,
    log_stderr: bool,
) -> Result<bool> {
    if carries_no_frame(codec, text) {
        let line = text.trim_end();
        if line.trim().is_empty() {
            return Ok(false);
        }
        let level = match source {
            StreamSource::Stdout => {
                debug!(stream = %source, "{line}");
                "Info"
            }
            StreamSource::Stderr => {
                if log_stderr {
                    warn!(stream = %source, "{line}");
                } else {
                    trace!(stream = %source, "{line}");
                }
                "Warning"
            }
        };
        if let Some(link) = sink.history() {
            link.log(level, line)?;
        }
        return Ok(false);
    }

    let mut eof = false;
    for result in codec.drain(text) {
        match result {
            Ok(frame) => {
                if sink.accept(frame)? == FrameDisposition::EndOfStream {
                    eof = true;
                }
            }
            Err(err) => warn!(stream = %source, error = %err, "discarding malformed report frame"),
        }
    }
    Ok(eof)
}

/// Plain output: nothing buffered, and the line neither opens an envelope
/// nor closes one.
fn carries_no_frame(codec: &FrameCodec, text: &str) -> bool {
    codec.buffered().trim().is_empty()
        && !text.contains(codec.delimiter())
        && !text.trim_start().starts_with('{')
}

/// Best-effort kill; failures are logged, never returned.
async fn kill(registry: &ProcessRegistry, child: &mut Child, pid: Option<u32>, exited: bool) {
    if exited {
        sweep_group(pid);
    } else {
        if let Some(pid) = pid {
            if let Err(err) = terminate(pid) {
                debug!(pid, error = %err, "could not kill process group; ignoring");
            }
        }
        if let Err(err) = child.start_kill() {
            debug!(pid, error = %err, "could not kill process; ignoring");
        }
        if let Err(err) = child.wait().await {
            debug!(pid, error = %err, "could not reap killed process; ignoring");
        }
    }
    if let Some(pid) = pid {
        registry.remove(pid);
    }
}

/// Kill anything the exited leader `pid` left running in its group.
///
/// Its pid is still in the registry at this point, so nothing it started
/// slips past `kill_all`.
fn sweep_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    match terminate_group(pid) {
        Ok(()) => debug!(pid, "killed processes left behind in the group"),
        Err(err) => trace!(pid, error = %err, "nothing left in the process group"),
    }
}

fn hand_to_reaper(mut child: Child, pid: Option<u32>, registry: ProcessRegistry) {
    tokio::spawn(async move {
        let status = child.wait().await;
        sweep_group(pid);
        if let Some(pid) = pid {
            registry.remove(pid);
        }
        debug!(pid, ?status, "reaped process that outlived its end-of-stream report");
    });
}
