//! SSE (Server-Sent Events) parser
//!
//! Parses the `text/event-stream` wire format into [`MessageEvent`]s.

use std::borrow::Cow;
use std::time::Duration;

use bytes::Bytes;
use tracing::trace;

use super::types::{MessageEvent, MESSAGE};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// SSE parser state
///
/// Lines may end in `\n`, `\r` or `\r\n`, including a `\r\n` split across
/// two chunks. The last event ID persists across records; everything else
/// is reset at each record boundary.
#[derive(Debug, Default)]
pub struct SseParser {
    /// Bytes of the current incomplete line
    buffer: Vec<u8>,
    /// Previous chunk ended in `\r`; a leading `\n` belongs to it
    pending_cr: bool,
    /// Leading byte order mark has been handled
    bom_checked: bool,
    /// Current event data being accumulated
    data_buffer: String,
    /// Current event type (empty means "message")
    event_type: String,
    /// `id:` of the current record
    event_id: Option<String>,
    /// `retry:` of the current record
    event_retry: Option<u64>,
    /// Last event ID seen on the stream
    last_event_id: String,
    /// Reconnect delay update not yet collected
    retry: Option<Duration>,
    /// Origin stamped on decoded events
    origin: String,
}

impl SseParser {
    /// Create a new SSE parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a known last event ID (e.g. after a reconnect)
    pub fn with_last_event_id(mut self, id: impl Into<String>) -> Self {
        self.last_event_id = id.into();
        self
    }

    /// Set the origin reported on decoded events
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Last event ID seen so far
    pub fn last_event_id(&self) -> &str {
        &self.last_event_id
    }

    /// Bytes buffered for the current unterminated line
    pub fn pending_line_len(&self) -> usize {
        self.buffer.len()
    }

    /// Take the most recent valid `retry:` value, if one arrived since the last call
    pub fn take_retry(&mut self) -> Option<Duration> {
        self.retry.take()
    }

    /// Feed bytes into the parser and extract any complete events
    pub fn feed(&mut self, bytes: Bytes) -> Vec<MessageEvent> {
        let mut events = Vec::new();

        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.extend_from_slice(&bytes);

        if !self.bom_checked {
            // Wait until we can tell whether the stream starts with a BOM
            if buffer.len() < UTF8_BOM.len() && UTF8_BOM.starts_with(&buffer) {
                self.buffer = buffer;
                return events;
            }
            if buffer.starts_with(UTF8_BOM) {
                buffer.drain(..UTF8_BOM.len());
            }
            self.bom_checked = true;
        }

        let mut consumed = 0;
        loop {
            if self.pending_cr {
                match buffer.get(consumed) {
                    Some(b'\n') => {
                        consumed += 1;
                        self.pending_cr = false;
                    }
                    Some(_) => self.pending_cr = false,
                    None => break,
                }
            }

            let rest = &buffer[consumed..];
            let Some(pos) = rest.iter().position(|&b| b == b'\n' || b == b'\r') else {
                break;
            };

            if rest[pos] == b'\r' {
                self.pending_cr = true;
            }

            if let Some(event) = self.process_line(&rest[..pos]) {
                events.push(event);
            }
            consumed += pos + 1;
        }

        buffer.drain(..consumed);
        self.buffer = buffer;

        events
    }

    /// Process a single line of SSE data
    fn process_line(&mut self, line: &[u8]) -> Option<MessageEvent> {
        // Empty line signals end of event
        if line.is_empty() {
            return self.dispatch_event();
        }

        // Comment line (keepalive)
        if line.starts_with(b":") {
            trace!("SSE keepalive/comment");
            return None;
        }

        let line = String::from_utf8_lossy(line);
        if let Cow::Owned(_) = &line {
            trace!("SSE line contained invalid UTF-8, replaced");
        }

        // Split on first colon
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            // Field with no value
            None => (&*line, ""),
        };

        match field {
            "event" => {
                self.event_type = value.to_string();
            }
            "data" => {
                self.data_buffer.push_str(value);
                self.data_buffer.push('\n');
            }
            "id" => {
                if value.contains('\0') {
                    trace!("SSE id containing NUL ignored");
                } else {
                    self.event_id = Some(value.to_string());
                    self.last_event_id = value.to_string();
                }
            }
            "retry" => match parse_retry(value) {
                Some(ms) => {
                    self.event_retry = Some(ms);
                    self.retry = Some(Duration::from_millis(ms));
                }
                None => trace!("SSE invalid retry ignored: {}", value),
            },
            _ => {
                // Unknown field, ignored
                trace!("SSE unknown field: {}", field);
            }
        }

        None
    }

    /// Dispatch the accumulated event
    fn dispatch_event(&mut self) -> Option<MessageEvent> {
        let mut data = std::mem::take(&mut self.data_buffer);
        let event_type = std::mem::take(&mut self.event_type);
        let id = self.event_id.take();
        let retry = self.event_retry.take();

        // If no data, nothing to dispatch
        if data.is_empty() {
            return None;
        }

        if data.ends_with('\n') {
            data.pop();
        }

        Some(MessageEvent {
            event_type: if event_type.is_empty() {
                MESSAGE.to_string()
            } else {
                event_type
            },
            data,
            id,
            retry,
            last_event_id: self.last_event_id.clone(),
            origin: self.origin.clone(),
        })
    }
}

/// `retry:` values must be ASCII digits only
fn parse_retry(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}
