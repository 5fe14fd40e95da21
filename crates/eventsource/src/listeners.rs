//! Listener registry keyed by event type
//!
//! A small publish/subscribe map: listeners are registered per event-type
//! string and invoked in registration order. Listener identity is the `Arc`
//! pointer, so the same [`Listener`] can be registered (and fires) more than
//! once, and `unsubscribe` needs a clone of the handle that was registered.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::error;

/// A registered callback
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Wrap a closure as a listener handle
pub fn listener<E, F>(f: F) -> Listener<E>
where
    F: Fn(&E) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Listener registry for events of type `E`
pub struct EventTarget<E> {
    listeners: RwLock<HashMap<String, Vec<Listener<E>>>>,
}

impl<E> Default for EventTarget<E> {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
        }
    }
}

impl<E> std::fmt::Debug for EventTarget<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read();
        let counts: HashMap<&str, usize> = listeners
            .iter()
            .map(|(event_type, list)| (event_type.as_str(), list.len()))
            .collect();
        f.debug_struct("EventTarget")
            .field("listeners", &counts)
            .finish()
    }
}

impl<E> EventTarget<E> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for an event type
    pub fn subscribe(&self, event_type: &str, listener: Listener<E>) {
        self.listeners
            .write()
            .entry(event_type.to_string())
            .or_default()
            .push(listener);
    }

    /// Remove the earliest registration of `listener` for an event type
    ///
    /// Returns `false` if it was not registered.
    pub fn unsubscribe(&self, event_type: &str, listener: &Listener<E>) -> bool {
        let mut listeners = self.listeners.write();
        let Some(list) = listeners.get_mut(event_type) else {
            return false;
        };
        let Some(pos) = list.iter().position(|l| Arc::ptr_eq(l, listener)) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            listeners.remove(event_type);
        }
        true
    }

    /// Number of listeners registered for an event type
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.listeners
            .read()
            .get(event_type)
            .map_or(0, |list| list.len())
    }

    /// Remove every listener
    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    /// Invoke the listeners registered for `event_type`, in order
    ///
    /// Works on a snapshot, so listeners may subscribe or unsubscribe while
    /// being called. A panicking listener is logged and skipped. Returns the
    /// number of listeners that completed.
    pub fn dispatch(&self, event_type: &str, event: &E) -> usize {
        let snapshot = match self.listeners.read().get(event_type) {
            Some(list) => list.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for listener in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    error!(
                        event_type,
                        panic = panic_message(&*payload),
                        "Event listener panicked"
                    );
                }
            }
        }
        delivered
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic>"
    }
}
