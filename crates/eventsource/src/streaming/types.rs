//! Event types dispatched by an event source

use std::sync::Arc;

use serde::Serialize;

use crate::error::EventSourceError;
use crate::types::ReadyState;

/// Event type used when a record has no `event:` field
pub const MESSAGE: &str = "message";
/// Event type dispatched when a connection is established
pub const OPEN: &str = "open";
/// Event type dispatched on connection failures
pub const ERROR: &str = "error";

/// A decoded record from the event stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageEvent {
    /// Event type (`"message"` unless the record set `event:`)
    #[serde(rename = "type")]
    pub event_type: String,

    /// Payload; repeated `data:` lines are joined with `\n`
    pub data: String,

    /// The record's own `id:` value, if it had one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// The record's `retry:` value in milliseconds, if valid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<u64>,

    /// Last event ID of the source when this event was dispatched
    pub last_event_id: String,

    /// ASCII origin of the stream URL
    pub origin: String,
}

impl MessageEvent {
    /// Decode the payload as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.data)
    }
}

/// Connection failure delivered to `error` listeners
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    /// What went wrong
    pub error: Arc<EventSourceError>,
    /// State of the source after the failure
    pub ready_state: ReadyState,
}

impl ErrorEvent {
    /// Whether the source closed because of this error
    pub fn is_fatal(&self) -> bool {
        self.error.is_fatal()
    }
}

/// Anything an event source dispatches to its listeners
#[derive(Debug, Clone)]
pub enum Event {
    /// The connection was established
    Open,
    /// A decoded record, typed `"message"` or a custom type
    Message(MessageEvent),
    /// The connection failed or was dropped
    Error(ErrorEvent),
}

impl Event {
    /// Listener channel this event is dispatched on
    pub fn event_type(&self) -> &str {
        match self {
            Event::Open => OPEN,
            Event::Message(message) => &message.event_type,
            Event::Error(_) => ERROR,
        }
    }

    /// The decoded record, if this is a message
    pub fn as_message(&self) -> Option<&MessageEvent> {
        match self {
            Event::Message(message) => Some(message),
            _ => None,
        }
    }

    /// The error, if this is an error event
    pub fn as_error(&self) -> Option<&ErrorEvent> {
        match self {
            Event::Error(error) => Some(error),
            _ => None,
        }
    }
}
