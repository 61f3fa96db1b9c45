// src/report/sink.rs

use std::fmt;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::history::HistoryLink;

use super::dispatcher::{ReportDispatcher, run_isolated};
use super::frame::{ErrorOutput, ErrorReport, Frame, ReportDataPoint};

type ErrorCallback = Box<dyn FnMut(&ErrorReport) + Send>;
type TerminateCallback = Box<dyn FnMut(Option<i32>) + Send>;
type FrameObserver = Box<dyn FnMut(&Frame) + Send>;

/// What a channel should do after handing a frame to [`ReportSink::accept`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    Payload,
    Error,
    /// The producer announced the end of its stream.
    EndOfStream,
}

/// Everything a channel delivers its frames to.
///
/// Owns the tag dispatcher, collects error reports for the failure raised
/// on a non-zero exit, and keeps the optional history record current.
#[derive(Default)]
pub struct ReportSink {
    dispatcher: ReportDispatcher,
    errors: Vec<ErrorReport>,
    error_callbacks: Vec<ErrorCallback>,
    terminate_callbacks: Vec<TerminateCallback>,
    observers: Vec<FrameObserver>,
    history: Option<HistoryLink>,
    frames_seen: usize,
}

impl fmt::Debug for ReportSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportSink")
            .field("dispatcher", &self.dispatcher)
            .field("errors", &self.errors.len())
            .field("history", &self.history.as_ref().map(HistoryLink::id))
            .field("frames_seen", &self.frames_seen)
            .finish_non_exhaustive()
    }
}

impl ReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed callback for `tag`.
    pub fn on<T, F>(&mut self, tag: impl Into<String>, callback: F) -> &mut Self
    where
        T: DeserializeOwned + 'static,
        F: FnMut(ReportDataPoint<T>) + Send + 'static,
    {
        self.dispatcher.register(tag, callback);
        self
    }

    /// Register a callback for every error report whose tag has no callback
    /// of its own.
    pub fn on_error<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnMut(&ErrorReport) + Send + 'static,
    {
        self.error_callbacks.push(Box::new(callback));
        self
    }

    /// Register a callback run once when the channel finishes, with the exit
    /// code if one was observed.
    pub fn on_terminate<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnMut(Option<i32>) + Send + 'static,
    {
        self.terminate_callbacks.push(Box::new(callback));
        self
    }

    /// Observe every accepted frame before it is dispatched.
    pub fn on_frame<F>(&mut self, observer: F) -> &mut Self
    where
        F: FnMut(&Frame) + Send + 'static,
    {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn attach_history(&mut self, link: HistoryLink) {
        self.history = Some(link);
    }

    pub fn history(&self) -> Option<&HistoryLink> {
        self.history.as_ref()
    }

    pub fn errors(&self) -> &[ErrorReport] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<ErrorReport> {
        std::mem::take(&mut self.errors)
    }

    pub fn frames_seen(&self) -> usize {
        self.frames_seen
    }

    /// Record, classify and dispatch one frame.
    ///
    /// Fails only when the attached history no longer knows this command.
    pub fn accept(&mut self, frame: Frame) -> Result<FrameDisposition> {
        self.frames_seen += 1;
        if let Some(link) = &self.history {
            link.record(&frame)?;
        }
        for (index, observer) in self.observers.iter_mut().enumerate() {
            run_isolated("on_frame", Some(frame.tag.as_str()), index, || observer(&frame));
        }

        if frame.is_eof() {
            debug!("end-of-stream report received");
            self.dispatcher.dispatch(&frame);
            return Ok(FrameDisposition::EndOfStream);
        }

        if !frame.is_error() {
            self.dispatcher.dispatch(&frame);
            return Ok(FrameDisposition::Payload);
        }

        match frame.decode::<ErrorOutput>() {
            Ok(report) => {
                if !self.dispatcher.has_handlers(&frame.tag) {
                    let tag = Some(frame.tag.as_str());
                    for (index, callback) in self.error_callbacks.iter_mut().enumerate() {
                        run_isolated("on_error", tag, index, || callback(&report));
                    }
                }
                self.errors.push(report);
            }
            Err(err) => warn!(tag = %frame.tag, error = %err, "unreadable error report"),
        }
        self.dispatcher.dispatch(&frame);
        Ok(FrameDisposition::Error)
    }

    /// Run the terminate callbacks and close the history record.
    pub fn terminate(&mut self, exit_code: Option<i32>) -> Result<()> {
        for (index, callback) in self.terminate_callbacks.iter_mut().enumerate() {
            run_isolated("on_terminate", None, index, || callback(exit_code));
        }
        if let Some(link) = &self.history {
            link.finished(exit_code)?;
        }
        Ok(())
    }
}
