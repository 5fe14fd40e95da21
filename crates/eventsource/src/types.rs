//! Connection state and configuration types

use std::fmt;
use std::time::Duration;

use serde::{Serialize, Serializer};
use url::Url;

/// Default reconnect delay before the server sends a `retry:` field
pub const DEFAULT_RETRY: Duration = Duration::from_millis(3000);
/// Default connection timeout for each attempt
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default cap on a single unterminated line, in bytes
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Lifecycle state of an event source connection
///
/// Stored as its raw numeric value so that any `u8` maps to a state; values
/// outside the three defined ones display as `"Unknown"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadyState(u8);

impl ReadyState {
    /// The connection is being established.
    pub const CONNECTING: Self = Self(0);
    /// The connection is open and dispatching events.
    pub const OPEN: Self = Self(1);
    /// The connection is not being established, has been closed or there was a fatal error.
    pub const CLOSED: Self = Self(2);

    /// Wrap a raw state value
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    /// Raw numeric value (Connecting=0, Open=1, Closed=2)
    pub const fn as_raw(self) -> u8 {
        self.0
    }

    /// Human-readable name of the state
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CONNECTING => "Connecting",
            Self::OPEN => "Open",
            Self::CLOSED => "Closed",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ReadyState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Options for opening an event source
#[derive(Debug, Clone)]
pub struct EventSourceOptions {
    /// Send credentials on cross-origin requests
    pub with_credentials: bool,
    /// Base for resolving relative URLs; also defines the "same origin"
    pub base_url: Option<Url>,
    /// Reconnect delay until the server overrides it
    pub retry: Duration,
    /// Timeout for establishing each connection
    pub connect_timeout: Duration,
    /// Initial `Last-Event-ID`, for resuming a stream
    pub last_event_id: Option<String>,
    /// Bearer token sent as `Authorization` when credentials apply
    pub bearer_token: Option<String>,
    /// Extra request headers
    pub headers: Vec<(String, String)>,
    /// Longest line accepted before the connection is dropped and retried
    pub max_line_length: usize,
}

impl Default for EventSourceOptions {
    fn default() -> Self {
        Self {
            with_credentials: false,
            base_url: None,
            retry: DEFAULT_RETRY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            last_event_id: None,
            bearer_token: None,
            headers: Vec::new(),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl EventSourceOptions {
    /// Create options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(mut self, with_credentials: bool) -> Self {
        self.with_credentials = with_credentials;
        self
    }

    pub fn base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    pub fn retry(mut self, retry: Duration) -> Self {
        self.retry = retry;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn last_event_id(mut self, id: impl Into<String>) -> Self {
        self.last_event_id = Some(id.into());
        self
    }

    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Add an extra request header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }
}
