//! Event stream decoding and delivery
//!
//! Contains the `text/event-stream` parser, the event types dispatched to
//! listeners, and [`EventStream`], an async stream view over a source's events.
//!
//! # Example
//!
//! ```no_run
//! use eventsource::{Event, EventSource};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = EventSource::new("http://localhost:8080/events")?;
//! let mut events = source.events(&["message", "error"]);
//!
//! while let Some(event) = events.next().await {
//!     match event {
//!         Event::Message(message) => println!("{}: {}", message.event_type, message.data),
//!         Event::Error(error) if error.is_fatal() => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod event_stream;
mod parser;
mod types;

pub use event_stream::EventStream;
pub use parser::SseParser;
pub use types::{ErrorEvent, Event, MessageEvent, ERROR, MESSAGE, OPEN};
