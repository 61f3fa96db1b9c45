// src/exec/work_queue.rs

//! Background I/O feeding a channel's single consumer.
//!
//! Reader tasks and the exit notice only enqueue [`StreamEvent`]s. All codec
//! and dispatcher mutation happens in the task that drains the queue, one
//! event at a time, in arrival order.

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamSource::Stdout => f.write_str("stdout"),
            StreamSource::Stderr => f.write_str("stderr"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// One line of output, trailing newline included.
    Line { source: StreamSource, text: String },
    /// The stream reached end of file. Sent after its last line.
    Closed(StreamSource),
    /// Delayed notice of an observed exit.
    Exited(i32),
}

pub type WorkSender = mpsc::UnboundedSender<StreamEvent>;
pub type WorkReceiver = mpsc::UnboundedReceiver<StreamEvent>;

pub fn work_queue() -> (WorkSender, WorkReceiver) {
    mpsc::unbounded_channel()
}

/// Read `reader` line by line into the queue.
///
/// Invalid UTF-8 is replaced rather than ending the stream. The reader keeps
/// draining after the consumer is gone so the child never blocks on a full
/// pipe.
pub fn spawn_line_reader<R>(source: StreamSource, reader: R, tx: WorkSender) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut forwarding = true;

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if !forwarding {
                        continue;
                    }
                    let text = String::from_utf8_lossy(&buf).into_owned();
                    if tx.send(StreamEvent::Line { source, text }).is_err() {
                        trace!(stream = %source, "consumer gone; discarding further output");
                        forwarding = false;
                    }
                }
                Err(err) => {
                    debug!(stream = %source, error = %err, "output stream read failed");
                    break;
                }
            }
        }

        let _ = tx.send(StreamEvent::Closed(source));
    })
}

/// Enqueue [`StreamEvent::Exited`] after `grace`.
pub fn spawn_exit_notice(tx: WorkSender, exit_code: i32, grace: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        let _ = tx.send(StreamEvent::Exited(exit_code));
    })
}
