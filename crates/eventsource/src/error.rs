//! Error types for event source operations

use thiserror::Error;

/// Result type alias for event source operations
pub type Result<T> = std::result::Result<T, EventSourceError>;

/// Errors that can occur while opening or running an event source
///
/// Only [`EventSourceError::Config`] is ever returned to a caller. The other
/// variants are delivered through `error` events once the source is running.
#[derive(Error, Debug)]
pub enum EventSourceError {
    /// Invalid URL or option at construction time
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Network-level failure; the source reconnects after the retry delay
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Unusable response; the source closes and does not reconnect
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl EventSourceError {
    /// Whether this error permanently closes the source
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Protocol(_))
    }
}

/// Construction-time errors, surfaced synchronously
#[derive(Error, Debug)]
pub enum ConfigError {
    /// URL could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// URL is relative and no base URL was configured
    #[error("Relative URL without a base URL: {0}")]
    RelativeUrl(String),

    /// URL scheme is not http or https
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// A configured request header is not a valid HTTP header
    #[error("Invalid header {name}: {message}")]
    InvalidHeader { name: String, message: String },

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// No tokio runtime to run the connection task on
    #[error("No tokio runtime available")]
    NoRuntime,
}

impl ConfigError {
    /// Create an invalid header error
    pub fn invalid_header(name: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidHeader {
            name: name.into(),
            message: message.to_string(),
        }
    }
}

/// Non-fatal connection failures that trigger a reconnect
#[derive(Error, Debug)]
pub enum TransportError {
    /// Request could not be sent or no response arrived
    #[error("Connection failed: {0}")]
    Connect(#[source] reqwest::Error),

    /// Reading the response body failed mid-stream
    #[error("Stream read failed: {0}")]
    Read(#[source] reqwest::Error),

    /// Server ended the response body
    #[error("Stream closed by server")]
    Closed,

    /// A line grew past the configured maximum without a terminator
    #[error("Line exceeded {max} bytes")]
    LineTooLong { max: usize },
}

/// Fatal response conditions; the source does not reconnect
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Server answered with a non-2xx status
    #[error("Server returned HTTP {status}")]
    HttpStatus { status: u16 },

    /// Response is not an event stream
    #[error("Unexpected content type: {}", .content_type.as_deref().unwrap_or("<none>"))]
    ContentType { content_type: Option<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let protocol: EventSourceError = ProtocolError::HttpStatus { status: 404 }.into();
        assert!(protocol.is_fatal());

        let transport: EventSourceError = TransportError::Closed.into();
        assert!(!transport.is_fatal());

        let config: EventSourceError = ConfigError::NoRuntime.into();
        assert!(config.is_fatal());
    }

    #[test]
    fn test_content_type_message() {
        let err = ProtocolError::ContentType { content_type: None };
        assert_eq!(err.to_string(), "Unexpected content type: <none>");

        let err = ProtocolError::ContentType {
            content_type: Some("text/html".into()),
        };
        assert_eq!(err.to_string(), "Unexpected content type: text/html");
    }

    #[test]
    fn test_line_too_long_is_retryable() {
        let err: EventSourceError = TransportError::LineTooLong { max: 1024 }.into();
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "Line exceeded 1024 bytes");
    }
}
