//! Event-stream wire protocol: line framing and frame decoding.
//!
//! A frame is exactly two lines followed by a blank line:
//!
//! ```text
//! event: put
//! data: {"path":"/","data":{"height":4}}
//!
//! ```

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::{Event, FrameError};

const EVENT_PREFIX: &str = "event:";
const DATA_PREFIX: &str = "data:";
const FRAME_LINES: usize = 2;

/// What the reader hands to the dispatch loop for each frame.
pub(crate) type DecodeResult = Result<Event, FrameError>;

fn trim_line(line: &str) -> &str {
    line.trim_matches(|c| matches!(c, ' ' | '\r' | '\n'))
}

// ---------------------------------------------------------------------------
// Frame decoder
// ---------------------------------------------------------------------------

/// Incremental frame decoder, fed one line at a time.
///
/// Lines past the second within a frame are dropped; the frame still decodes
/// from its first two lines.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    lines: Vec<String>,
    seen: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (with or without its terminator). Returns a result when
    /// the line was blank and therefore closed a frame.
    pub fn push_line(&mut self, raw: &str) -> Option<Result<Event, FrameError>> {
        let line = trim_line(raw);
        if line.is_empty() {
            let lines = std::mem::take(&mut self.lines);
            self.seen = 0;
            return Some(decode_frame(lines));
        }

        self.seen += 1;
        if self.lines.len() < FRAME_LINES {
            self.lines.push(line.to_string());
        } else {
            tracing::debug!(line_number = self.seen, "Dropping extra line in frame");
        }
        None
    }
}

fn decode_frame(lines: Vec<String>) -> Result<Event, FrameError> {
    let count = lines.len();
    let mut it = lines.into_iter();
    let (Some(first), Some(second)) = (it.next(), it.next()) else {
        return Err(FrameError::LineCount { lines: count });
    };
    let event_type = first
        .strip_prefix(EVENT_PREFIX)
        .ok_or(FrameError::MissingEvent)?;
    let data = second
        .strip_prefix(DATA_PREFIX)
        .ok_or(FrameError::MissingData)?;
    Ok(Event::new(trim_line(event_type), trim_line(data)))
}

// ---------------------------------------------------------------------------
// Reader task
// ---------------------------------------------------------------------------

/// Read lines from `reader`, decode frames, and forward each result to the
/// dispatch loop. Returns on EOF, read error, cancellation, or when the
/// dispatch loop has gone away. `reader` is dropped on return.
pub(crate) async fn read_frames<R>(
    mut reader: R,
    frame_tx: mpsc::Sender<DecodeResult>,
    cancel: CancellationToken,
) where
    R: AsyncBufRead + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Reader cancelled");
                return;
            }
            read = reader.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => {
                tracing::debug!("Event stream reached EOF");
                return;
            }
            Ok(_) if buf.last() != Some(&b'\n') => {
                // Unterminated trailing line: the stream ended mid-frame.
                tracing::debug!(bytes = buf.len(), "Event stream ended mid-line");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Event stream read error: {e}");
                return;
            }
        }

        let line = String::from_utf8_lossy(&buf);
        if let Some(result) = decoder.push_line(&line) {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("Reader cancelled during handoff");
                    return;
                }
                sent = frame_tx.send(result) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
