// src/report/mod.rs

//! Structured report stream handling.
//!
//! A running tool emits a sequence of JSON envelopes, each tagged with a
//! `type`. This module turns raw text into [`Frame`]s and routes them to
//! typed callbacks.
//!
//! - [`frame`] defines the envelope, its typed form and the well-known payloads.
//! - [`codec`] reconstructs frames from arbitrarily fragmented text.
//! - [`dispatcher`] maps type tags to typed callbacks.
//! - [`sink`] is what a channel feeds: dispatch plus error accumulation,
//!   observers and history bookkeeping.

pub mod codec;
pub mod dispatcher;
pub mod frame;
pub mod sink;

pub use codec::{FrameCodec, DEFAULT_DELIMITER};
pub use dispatcher::ReportDispatcher;
pub use frame::{
    envelope, is_error_tag, DecodeError, EofOutput, ErrorOutput, ErrorReport, Frame, LogMessage,
    ReportDataPoint, EOF_TAG, ERROR_TAG, LOG_TAG,
};
pub use sink::{FrameDisposition, ReportSink};
