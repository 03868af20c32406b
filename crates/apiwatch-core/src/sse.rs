//! Server-sent-events framing for the event wire format.
//!
//! The wire carries one event per SSE frame: one or more `data:` lines
//! terminated by a blank line. [`SseFramer`] reassembles frames from
//! arbitrarily split network chunks without touching their bytes, and
//! [`decode_frame`] turns a complete frame into an [`Event`].

use bytes::{Bytes, BytesMut};
use tracing::warn;

use crate::error::{Error, Result};
use crate::event::Event;

/// Default upper bound on a single buffered frame.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Splits a byte stream into complete SSE frames.
#[derive(Debug)]
pub struct SseFramer {
    buf: BytesMut,
    /// Bytes of `buf` already scanned for a frame terminator.
    scanned: usize,
    /// No content seen since the last line break.
    at_line_start: bool,
    /// Dropping the rest of an oversized frame up to its blank line.
    discarding: bool,
    max_frame_bytes: usize,
}

impl SseFramer {
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            scanned: 0,
            at_line_start: true,
            discarding: false,
            max_frame_bytes,
        }
    }

    /// Feed a chunk and return every frame it completed, in order.
    ///
    /// Returned frames include their terminating blank line. A partial frame
    /// growing past the size limit is discarded up to and including its
    /// terminating blank line.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut i = self.scanned;
        while i < self.buf.len() {
            match self.buf[i] {
                b'\n' if self.at_line_start => {
                    let frame = self.buf.split_to(i + 1).freeze();
                    if self.discarding {
                        self.discarding = false;
                    } else {
                        frames.push(frame);
                    }
                    i = 0;
                    continue;
                }
                b'\n' => self.at_line_start = true,
                b'\r' => {}
                _ => self.at_line_start = false,
            }
            i += 1;
        }
        self.scanned = i;

        // Line state survives a discard: the oversized frame's own blank
        // line ends it.
        if self.discarding {
            self.buf.clear();
            self.scanned = 0;
        } else if self.buf.len() > self.max_frame_bytes {
            warn!(
                buffered = self.buf.len(),
                limit = self.max_frame_bytes,
                "Discarding oversized SSE frame"
            );
            self.buf.clear();
            self.scanned = 0;
            self.discarding = true;
        }

        frames
    }

    /// Bytes buffered for the frame currently being assembled.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

impl Default for SseFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// Concatenated `data:` payload of a frame, or `None` for frames without data
/// (keep-alive comments, bare `event:`/`id:`/`retry:` lines).
pub fn frame_data(frame: &[u8]) -> Result<Option<String>> {
    let text = std::str::from_utf8(frame)
        .map_err(|e| Error::EventDecode(format!("frame is not UTF-8: {e}")))?;

    let mut data: Option<String> = None;
    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        if field != "data" {
            continue;
        }
        let value = value.strip_prefix(' ').unwrap_or(value);
        match data.as_mut() {
            Some(buf) => {
                buf.push('\n');
                buf.push_str(value);
            }
            None => data = Some(value.to_string()),
        }
    }
    Ok(data)
}

/// Decode a complete SSE frame into an event.
pub fn decode_frame(frame: &[u8]) -> Result<Option<Event>> {
    match frame_data(frame)? {
        Some(data) => Event::from_json(&data).map(Some),
        None => Ok(None),
    }
}

/// Encode an event as a single SSE frame.
pub fn encode_frame(event: &Event) -> Result<Bytes> {
    Ok(Bytes::from(format!("data: {}\n\n", event.to_json()?)))
}
