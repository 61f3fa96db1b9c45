use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use cmdstream::errors::{CmdstreamError, InvocationFailure, Result};
use cmdstream::exec::{
    CancelHandle, ChannelFactory, ChannelState, Command, CommandChannel, RunOutcome, RunReport,
};
use cmdstream::history::SharedHistory;
use cmdstream::report::{Frame, FrameDisposition, ReportSink};

/// A scripted channel that:
/// - feeds a fixed list of frames to its sink, stopping at end-of-stream
/// - then "exits" with the scripted code (if any).
pub struct FakeChannel {
    command: Command,
    frames: Vec<Frame>,
    exit_code: Option<i32>,
    sink: ReportSink,
    cancel: CancelHandle,
    state: ChannelState,
}

impl FakeChannel {
    pub fn new(command: impl Into<Command>, frames: Vec<Frame>, exit_code: Option<i32>) -> Self {
        Self {
            command: command.into(),
            frames,
            exit_code,
            sink: ReportSink::new(),
            cancel: CancelHandle::new(),
            state: ChannelState::NotStarted,
        }
    }

    async fn run_script(&mut self) -> Result<RunReport> {
        self.command.begin()?;
        if let Some(link) = self.sink.history() {
            link.started(None)?;
        }
        self.state = ChannelState::Running;

        let mut outcome = None;
        for frame in std::mem::take(&mut self.frames) {
            if self.cancel.is_cancelled() {
                outcome = Some(RunOutcome::Cancelled);
                break;
            }
            tokio::task::yield_now().await;
            if self.sink.accept(frame)? == FrameDisposition::EndOfStream {
                outcome = Some(RunOutcome::EndOfStream);
                break;
            }
        }

        let outcome = match (outcome, self.exit_code) {
            (Some(outcome), _) => outcome,
            (None, Some(0)) => RunOutcome::Succeeded,
            (None, Some(code)) => {
                self.sink.terminate(Some(code))?;
                self.state = ChannelState::Failed;
                return Err(CmdstreamError::InvocationFailed(InvocationFailure {
                    command: self.command.line().to_string(),
                    exit_code: code,
                    errors: self.sink.take_errors(),
                }));
            }
            (None, None) => RunOutcome::StreamClosed,
        };

        let exit_code = match outcome {
            RunOutcome::Succeeded => self.exit_code,
            _ => None,
        };
        self.sink.terminate(exit_code)?;
        self.state = match outcome {
            RunOutcome::Cancelled => ChannelState::Cancelled,
            _ => ChannelState::Completed,
        };
        Ok(RunReport {
            outcome,
            exit_code,
            errors: self.sink.errors().to_vec(),
            frames: self.sink.frames_seen(),
        })
    }
}

impl CommandChannel for FakeChannel {
    fn command(&self) -> &Command {
        &self.command
    }

    fn command_mut(&mut self) -> &mut Command {
        &mut self.command
    }

    fn reports(&mut self) -> &mut ReportSink {
        &mut self.sink
    }

    fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn state(&self) -> ChannelState {
        self.state
    }

    fn run(&mut self) -> Pin<Box<dyn Future<Output = Result<RunReport>> + Send + '_>> {
        Box::pin(self.run_script())
    }
}

/// Hands out `FakeChannel`s that all play the same script, recording which
/// command lines were requested.
#[derive(Clone)]
pub struct FakeChannelFactory {
    frames: Vec<Frame>,
    exit_code: Option<i32>,
    history: Option<SharedHistory>,
    created: Arc<Mutex<Vec<String>>>,
}

impl FakeChannelFactory {
    pub fn new(frames: Vec<Frame>, exit_code: Option<i32>) -> Self {
        Self {
            frames,
            exit_code,
            history: None,
            created: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_history(mut self, history: SharedHistory) -> Self {
        self.history = Some(history);
        self
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }
}

impl ChannelFactory for FakeChannelFactory {
    fn create(&self, command: Command) -> Box<dyn CommandChannel> {
        self.created
            .lock()
            .unwrap()
            .push(command.line().to_string());

        let mut channel = FakeChannel::new(command, self.frames.clone(), self.exit_code);
        if let Some(history) = &self.history {
            let link = history.track(channel.command.line());
            channel.sink.attach_history(link);
        }
        Box::new(channel)
    }
}
