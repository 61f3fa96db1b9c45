// src/report/dispatcher.rs

//! Tag-to-callback routing.
//!
//! Each registration pairs an exact type tag with a closure that knows how to
//! decode its own payload shape, so routing needs no runtime type inspection.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::de::DeserializeOwned;
use tracing::{error, trace, warn};

use super::frame::{DecodeError, Frame, ReportDataPoint};

type Handler = Box<dyn FnMut(&Frame) -> Result<(), DecodeError> + Send>;

#[derive(Default)]
pub struct ReportDispatcher {
    handlers: HashMap<String, Vec<Handler>>,
}

impl fmt::Debug for ReportDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<(&str, usize)> = self
            .handlers
            .iter()
            .map(|(tag, handlers)| (tag.as_str(), handlers.len()))
            .collect();
        tags.sort_unstable();
        f.debug_struct("ReportDispatcher")
            .field("handlers", &tags)
            .finish()
    }
}

impl ReportDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for frames tagged exactly `tag`.
    ///
    /// Callbacks for the same tag run in registration order.
    pub fn register<T, F>(&mut self, tag: impl Into<String>, mut callback: F) -> &mut Self
    where
        T: DeserializeOwned + 'static,
        F: FnMut(ReportDataPoint<T>) + Send + 'static,
    {
        let handler: Handler = Box::new(move |frame: &Frame| {
            let point = frame.decode::<T>()?;
            callback(point);
            Ok(())
        });
        self.handlers.entry(tag.into()).or_default().push(handler);
        self
    }

    pub fn has_handlers(&self, tag: &str) -> bool {
        self.handlers.get(tag).is_some_and(|h| !h.is_empty())
    }

    /// Deliver `frame` to every callback registered for its tag.
    ///
    /// Returns how many callbacks completed. A callback whose payload shape
    /// does not match, or that panics, is logged and skipped; the rest still
    /// run. Frames with no registration are dropped.
    pub fn dispatch(&mut self, frame: &Frame) -> usize {
        let Some(handlers) = self.handlers.get_mut(&frame.tag) else {
            trace!(tag = %frame.tag, "no callback registered; dropping frame");
            return 0;
        };

        let mut delivered = 0;
        for (index, handler) in handlers.iter_mut().enumerate() {
            let tag = Some(frame.tag.as_str());
            let mut outcome = Ok(());
            if !run_isolated("typed", tag, index, || outcome = handler(frame)) {
                continue;
            }
            match outcome {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(
                        tag = %frame.tag,
                        callback = index,
                        error = %err,
                        "report payload does not match callback shape; skipping callback"
                    );
                }
            }
        }
        delivered
    }
}

/// Run one caller-supplied callback, containing any panic it raises.
///
/// Returns `false` when the callback panicked. The panic is logged and the
/// caller carries on with the next callback.
pub(crate) fn run_isolated(
    kind: &str,
    tag: Option<&str>,
    index: usize,
    callback: impl FnOnce(),
) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(()) => true,
        Err(payload) => {
            error!(
                kind,
                tag = tag.unwrap_or("-"),
                callback = index,
                reason = %panic_message(payload.as_ref()),
                "report callback panicked; continuing with remaining callbacks"
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Deserialize)]
    struct Value {
        v: i64,
    }

    fn frame(raw: &str) -> Frame {
        Frame::parse(raw).unwrap()
    }

    #[test]
    fn routes_by_exact_tag_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = ReportDispatcher::new();

        let first = Arc::clone(&seen);
        let second = Arc::clone(&seen);
        dispatcher
            .register::<Value, _>("x", move |p| first.lock().unwrap().push(("first", p.data.v)))
            .register::<Value, _>("x", move |p| second.lock().unwrap().push(("second", p.data.v)));

        assert_eq!(dispatcher.dispatch(&frame(r#"{"type":"x","v":3}"#)), 2);
        assert_eq!(dispatcher.dispatch(&frame(r#"{"type":"xy","v":4}"#)), 0);

        assert_eq!(*seen.lock().unwrap(), vec![("first", 3), ("second", 3)]);
    }

    #[test]
    fn unmatched_tag_does_not_affect_later_frames() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut dispatcher = ReportDispatcher::new();
        dispatcher.register::<Value, _>("x", move |p| sink.lock().unwrap().push(p.data.v));

        dispatcher.dispatch(&frame(r#"{"type":"diagnostic","v":0}"#));
        dispatcher.dispatch(&frame(r#"{"type":"x","v":1}"#));

        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn failing_callbacks_do_not_stop_the_rest() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = ReportDispatcher::new();

        dispatcher.register::<Value, _>("x", |_| panic!("callback bug"));
        // Wrong shape: `v` is required.
        dispatcher.register::<Value, _>("y", |_| {});
        let sink = Arc::clone(&seen);
        dispatcher.register::<Value, _>("x", move |p| sink.lock().unwrap().push(p.data.v));

        assert_eq!(dispatcher.dispatch(&frame(r#"{"type":"x","v":5}"#)), 1);
        assert_eq!(dispatcher.dispatch(&frame(r#"{"type":"y"}"#)), 0);
        assert_eq!(dispatcher.dispatch(&frame(r#"{"type":"x","v":6}"#)), 1);

        assert_eq!(*seen.lock().unwrap(), vec![5, 6]);
    }
}
