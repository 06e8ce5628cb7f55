//! Server-Sent Events framing and queue event decoding.

use bytes::BytesMut;
use serde_json::Value;
use tracing::warn;

use crate::error::{Result, SourceError};
use crate::payload::{decode_snapshot, document_from_value};
use crate::snapshot::{QueueSnapshot, SnapshotSource};

/// Field of the event data carrying the queue document.
pub const QUEUE_EVENT_FIELD: &str = "manageListQueue";

/// Upper bound for a single unterminated line before it is discarded.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// A dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE parser.
///
/// Bytes are buffered until a full line is available, so chunks may split
/// lines (and UTF-8 sequences) anywhere. Consecutive `data:` lines are joined
/// with `\n` and dispatched on the blank line that ends the event.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    data: Vec<String>,
    event: Option<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw = self.buffer.split_to(pos + 1);
            let text = String::from_utf8_lossy(&raw[..pos]);
            let line = text.strip_suffix('\r').unwrap_or(&text);
            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }

        if self.buffer.len() > MAX_LINE_BYTES {
            warn!(
                buffered = self.buffer.len(),
                "Discarding oversized unterminated stream line"
            );
            self.buffer.clear();
        }

        frames
    }

    /// Number of bytes waiting for a line terminator.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn process_line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            return self.dispatch();
        }

        // Comment lines double as keep-alives.
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<Frame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(Frame { event, data })
    }
}

/// Decode an event into a snapshot.
///
/// `Ok(None)` means the event is well formed but carries no queue document.
pub fn decode_frame(frame: &Frame) -> Result<Option<QueueSnapshot>> {
    let data = frame.data.trim();
    if data.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(data)?;
    let Value::Object(mut map) = value else {
        return Err(SourceError::decode("stream event data is not a JSON object"));
    };

    match map.remove(QUEUE_EVENT_FIELD) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(inner)) => decode_snapshot(&inner, SnapshotSource::Streaming).map(Some),
        Some(inner @ Value::Object(_)) => {
            Ok(Some(document_from_value(inner)?.into_snapshot(SnapshotSource::Streaming)))
        }
        Some(_) => Err(SourceError::decode(format!(
            "{QUEUE_EVENT_FIELD} is neither a string nor an object"
        ))),
    }
}
