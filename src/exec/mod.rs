// src/exec/mod.rs

//! Command execution layer.
//!
//! A command runs on one of two channels and both feed a [`ReportSink`]:
//!
//! - [`process`] spawns the tool locally and decodes delimiter-framed
//!   reports from its stdout and stderr.
//! - [`remote`] posts the command to a local daemon and decodes marker-
//!   prefixed lines from the streamed response; [`endpoint`] finds the
//!   daemon.
//! - [`registry`] tracks live children so host shutdown can kill them all.
//! - [`work_queue`] and [`completion`] are the process channel's plumbing:
//!   background readers enqueue, one consumer decodes, and the first
//!   completion signal wins.
//! - [`backend`] provides the `CommandChannel` and `ChannelFactory` traits
//!   that callers and tests program against.
//!
//! [`ReportSink`]: crate::report::ReportSink

pub mod backend;
pub mod cancel;
pub mod command;
pub mod completion;
pub mod endpoint;
pub mod process;
pub mod registry;
pub mod remote;
pub mod work_queue;

pub use backend::{
    ChannelFactory, ChannelState, CommandChannel, ProcessChannelFactory, RemoteChannelFactory,
    RunOutcome, RunReport,
};
pub use cancel::CancelHandle;
pub use command::Command;
pub use completion::{Completion, CompletionLatch};
pub use endpoint::{DaemonInfo, PingResult, RemoteEndpoint};
pub use process::ProcessChannel;
pub use registry::{HostEvent, ProcessRegistry};
pub use remote::RemoteChannel;
