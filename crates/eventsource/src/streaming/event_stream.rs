//! Async stream over an event source's dispatched events

use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::{mpsc, watch};

use super::types::Event;
use crate::client::Shared;
use crate::listeners::{listener, Listener};

/// Events of selected types from one event source
///
/// Implements `Stream<Item = Event>`. Events are queued in dispatch order.
///
/// # Lifecycle
///
/// - Created via `EventSource::events()` or `EventSourceBuilder::open_stream()`
/// - Ends after the source closes (explicitly or on a fatal error) and the
///   queue is drained
/// - Dropping it unregisters its listeners from the source
pub struct EventStream {
    /// Queued events, ending on close
    inner: BoxStream<'static, Event>,

    /// Source to unregister from on drop
    source: Weak<Shared>,

    /// Listener registrations owned by this stream
    registrations: Vec<(String, Listener<Event>)>,
}

impl EventStream {
    pub(crate) fn attach(shared: &Arc<Shared>, event_types: &[&str]) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let forward = listener(move |event: &Event| {
            let _ = tx.send(event.clone());
        });

        let registrations = event_types
            .iter()
            .map(|event_type| {
                shared.listeners.subscribe(event_type, forward.clone());
                (event_type.to_string(), forward.clone())
            })
            .collect();

        Self {
            inner: queued(rx, shared.closed_rx()).boxed(),
            source: Arc::downgrade(shared),
            registrations,
        }
    }

    /// Get the next event
    ///
    /// Returns `None` once the source is closed and no events remain.
    pub async fn next(&mut self) -> Option<Event> {
        <Self as StreamExt>::next(self).await
    }
}

/// Yield queued events; once closed, drain what is left and finish
fn queued(
    rx: mpsc::UnboundedReceiver<Event>,
    closed: watch::Receiver<bool>,
) -> impl Stream<Item = Event> + Send {
    stream::unfold((rx, closed), |(mut rx, mut closed)| async move {
        tokio::select! {
            biased;
            event = rx.recv() => event.map(|event| (event, (rx, closed))),
            _ = async { let _ = closed.wait_for(|closed| *closed).await; } => {
                rx.try_recv().ok().map(|event| (event, (rx, closed)))
            }
        }
    })
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(shared) = self.source.upgrade() {
            for (event_type, listener) in &self.registrations {
                shared.listeners.unsubscribe(event_type, listener);
            }
        }
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let event_types: Vec<&str> = self.registrations.iter().map(|(t, _)| t.as_str()).collect();
        f.debug_struct("EventStream")
            .field("event_types", &event_types)
            .finish()
    }
}
