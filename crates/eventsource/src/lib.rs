//! Server-Sent Events Client Library
//!
//! Opens a long-lived `text/event-stream` connection, decodes records as they
//! arrive, tracks the connection state and reconnects after network
//! failures, resuming with the `Last-Event-ID` header.
//!
//! # Example
//!
//! ```rust,no_run
//! use eventsource::{listener, Event, EventSource, EventSourceOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = EventSource::builder("http://localhost:8080/events")
//!         .options(EventSourceOptions::new().with_credentials(true))
//!         .on("open", listener(|_: &Event| println!("connected")))
//!         .on("update", listener(|event: &Event| {
//!             if let Some(message) = event.as_message() {
//!                 println!("update: {}", message.data);
//!             }
//!         }))
//!         .open()?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(30)).await;
//!     source.close();
//!     Ok(())
//! }
//! ```
//!
//! # Connection lifecycle
//!
//! | From | To | Trigger | Event |
//! |------|----|---------|-------|
//! | Connecting | Open | valid response received | `open` |
//! | Open | Connecting | connection dropped | `error`, then reconnect |
//! | Connecting | Connecting | attempt failed | `error`, then reconnect |
//! | any | Closed | `close()`, non-2xx status, wrong content type | `error` (fatal only) |
//!
//! Reconnects happen after a fixed delay (3 s, or the server's last
//! `retry:` value) with no attempt limit.
//!
//! # Testing
//!
//! The `testing` module provides an in-process HTTP server:
//!
//! ```rust,ignore
//! use eventsource::testing::TestServer;
//!
//! let server = TestServer::start(router).await?;
//! let source = EventSource::new(&server.url("/events"))?;
//! ```

mod client;
mod error;
pub mod listeners;
pub mod streaming;
pub mod testing;
mod types;

pub use client::{CloseHandle, EventSource, EventSourceBuilder};
pub use error::{ConfigError, EventSourceError, ProtocolError, Result, TransportError};
pub use listeners::{listener, EventTarget, Listener};
pub use types::*;

// Re-export streaming types for convenience
pub use streaming::{ErrorEvent, Event, EventStream, MessageEvent, SseParser, ERROR, MESSAGE, OPEN};
