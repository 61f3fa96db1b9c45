// src/report/codec.rs

//! Delimiter-based frame reconstruction.
//!
//! Producers write `<envelope><delimiter><envelope><delimiter>...` to a
//! stream that reaches us in pieces of any size. [`FrameCodec`] keeps the
//! incomplete tail between calls, so feeding a stream one byte at a time
//! yields the same frames as feeding it whole.

use tracing::trace;

use super::frame::{DecodeError, Frame};

/// Token separating frames on subprocess output. Never valid inside JSON text
/// produced by a conforming tool.
pub const DEFAULT_DELIMITER: &str = "<|report|>";

#[derive(Debug, Clone)]
pub struct FrameCodec {
    delimiter: String,
    buffer: String,
    accept_unterminated: bool,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_DELIMITER)
    }
}

impl FrameCodec {
    pub fn new(delimiter: impl Into<String>) -> Self {
        Self {
            delimiter: delimiter.into(),
            buffer: String::new(),
            accept_unterminated: true,
        }
    }

    /// Toggle the unterminated-frame fallback.
    ///
    /// When enabled and the retained buffer holds no delimiter, the whole
    /// buffer is emitted as a frame if it is a complete JSON object with a
    /// string `type`. This tolerates producers that omit the delimiter after
    /// their last frame. Anything that is not such an object (a bare JSON
    /// string, a number, a half-written object) stays buffered.
    pub fn with_unterminated_fallback(mut self, enabled: bool) -> Self {
        self.accept_unterminated = enabled;
        self
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// Text retained from previous calls.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Append `chunk` and extract at most one frame.
    ///
    /// `None` means more input is needed. A `Some` result may leave further
    /// complete frames in the buffer; call again with an empty chunk until
    /// `None` before reading more input (or use [`FrameCodec::drain`]).
    /// A malformed candidate is removed from the buffer and reported as
    /// `Some(Err(_))`.
    pub fn feed(&mut self, chunk: &str) -> Option<Result<Frame, DecodeError>> {
        self.buffer.push_str(chunk);

        while let Some(pos) = self.buffer.find(&self.delimiter) {
            let candidate: String = self.buffer.drain(..pos).collect();
            self.buffer.drain(..self.delimiter.len());

            if candidate.trim().is_empty() {
                // Two delimiters in a row, or the tail of a frame the
                // fallback already emitted.
                continue;
            }
            return Some(Frame::parse(&candidate));
        }

        self.take_unterminated()
    }

    /// Feed `chunk` and collect every result it completes, in order.
    pub fn drain(&mut self, chunk: &str) -> Vec<Result<Frame, DecodeError>> {
        let mut results = Vec::new();
        let mut next = self.feed(chunk);
        while let Some(result) = next {
            results.push(result);
            next = self.feed("");
        }
        results
    }

    /// Take whatever non-whitespace text is left, e.g. when the stream closes.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }

    fn take_unterminated(&mut self) -> Option<Result<Frame, DecodeError>> {
        if !self.accept_unterminated {
            return None;
        }

        let trimmed = self.buffer.trim();
        if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
            return None;
        }

        match Frame::parse(trimmed) {
            Ok(frame) => {
                trace!(tag = %frame.tag, "accepted frame without trailing delimiter");
                self.buffer.clear();
                Some(Ok(frame))
            }
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const D: &str = DEFAULT_DELIMITER;

    fn tags(results: &[Result<Frame, DecodeError>]) -> Vec<String> {
        results
            .iter()
            .map(|r| match r {
                Ok(frame) => frame.tag.clone(),
                Err(_) => "<err>".to_string(),
            })
            .collect()
    }

    #[test]
    fn incomplete_input_is_retained() {
        let mut codec = FrameCodec::default();
        assert!(codec.feed(r#"{"type":"x","#).is_none());
        assert_eq!(codec.buffered(), r#"{"type":"x","#);
    }

    #[test]
    fn splits_on_first_delimiter_and_keeps_remainder() {
        let mut codec = FrameCodec::default().with_unterminated_fallback(false);
        let input = format!(r#"{{"type":"x","v":1}}{D}{{"type":"y","v":2}}{D}{{"type":"z""#);

        let first = codec.feed(&input).unwrap().unwrap();
        assert_eq!(first.tag, "x");
        assert!(codec.buffered().starts_with(r#"{"type":"y""#));

        let second = codec.feed("").unwrap().unwrap();
        assert_eq!(second.tag, "y");
        assert!(codec.feed("").is_none());
        assert_eq!(codec.buffered(), r#"{"type":"z""#);
    }

    #[test]
    fn split_across_two_feeds_yields_both_in_order() {
        let input = format!(r#"{{"type":"x","v":1}}{D}{{"type":"y","v":2}}{D}"#);
        for offset in 0..=input.len() {
            let mut codec = FrameCodec::default();
            let mut results = codec.drain(&input[..offset]);
            results.extend(codec.drain(&input[offset..]));
            assert_eq!(tags(&results), vec!["x", "y"], "offset {offset}");
        }
    }

    #[test]
    fn malformed_candidate_is_discarded_without_corrupting_followers() {
        let mut codec = FrameCodec::default();
        let input = format!(r#"{{"type":"x"}}{D}not json{D}{{"type":"y"}}{D}"#);
        let results = codec.drain(&input);
        assert_eq!(tags(&results), vec!["x", "<err>", "y"]);
        assert!(codec.buffered().is_empty());
    }

    #[test]
    fn unterminated_object_is_accepted_only_when_enabled() {
        let mut codec = FrameCodec::default();
        let frame = codec.feed(r#"{"type":"eof"}"#).unwrap().unwrap();
        assert!(frame.is_eof());
        assert!(codec.buffered().is_empty());

        let mut strict = FrameCodec::default().with_unterminated_fallback(false);
        assert!(strict.feed(r#"{"type":"eof"}"#).is_none());
    }

    #[test]
    fn unterminated_non_object_json_stays_buffered() {
        let mut codec = FrameCodec::default();
        assert!(codec.feed(r#""just a string""#).is_none());
        assert!(codec.feed("").is_none());
        assert_eq!(codec.finish().as_deref(), Some(r#""just a string""#));
    }

    #[test]
    fn custom_delimiter() {
        let mut codec = FrameCodec::new("\u{1e}").with_unterminated_fallback(false);
        let results = codec.drain("{\"type\":\"a\"}\u{1e}{\"type\":\"b\"}\u{1e}");
        assert_eq!(tags(&results), vec!["a", "b"]);
    }
}
