//! Reassembly of `data: ` event lines from an arbitrarily chunked byte stream.
//!
//! The upstream transport delivers bytes in order but with no alignment to
//! line boundaries. [`FrameReassembler`] keeps the undelimited tail between
//! pushes so the frames it yields do not depend on where the chunks were cut.

use bytes::BytesMut;
use serde_json::Value;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_TOKEN: &str = "[DONE]";

/// One logical event recovered from the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalFrame {
    /// The `[DONE]` termination marker.
    Done,
    /// A payload that parsed as JSON.
    Json(Value),
    /// A payload that did not parse; forwarded verbatim.
    Raw(String),
}

/// Per-stream line accumulator. Owned by exactly one forwarding task.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    buffer: BytesMut,
    // prefix of `buffer` already known to hold no newline
    scanned: usize,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every frame completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<LogicalFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let pos = self.scanned + offset;
            let line = self.buffer.split_to(pos + 1);
            self.scanned = 0;
            if let Some(frame) = classify_line(&line[..pos]) {
                frames.push(frame);
            }
        }
        self.scanned = self.buffer.len();
        frames
    }

    /// Flush a final line left without a trailing newline at end of stream.
    pub fn finish(&mut self) -> Option<LogicalFrame> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = self.buffer.split();
        self.scanned = 0;
        classify_line(&rest)
    }

    /// Bytes held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn classify_line(raw: &[u8]) -> Option<LogicalFrame> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw);
    let payload = line.strip_prefix(DATA_PREFIX)?;

    if payload == DONE_TOKEN {
        return Some(LogicalFrame::Done);
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(value) => Some(LogicalFrame::Json(value)),
        Err(_) => Some(LogicalFrame::Raw(payload.to_string())),
    }
}
