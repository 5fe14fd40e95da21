//! Event source client implementation

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE,
};
use reqwest::{Client, Response};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, error, instrument, warn};
use url::Url;

use crate::error::{ConfigError, EventSourceError, ProtocolError, Result, TransportError};
use crate::listeners::{listener, EventTarget, Listener};
use crate::streaming::{ErrorEvent, Event, EventStream, SseParser};
use crate::types::{EventSourceOptions, ReadyState};

/// MIME type an event stream response must declare
const EVENT_STREAM_MIME: &str = "text/event-stream";
/// Request header carrying the resumption token
const LAST_EVENT_ID: &str = "Last-Event-ID";

/// Client for a `text/event-stream` endpoint
///
/// Connects immediately on construction, reconnects after the retry delay
/// whenever the connection drops, and dispatches `open`, `message`,
/// custom-typed and `error` events to registered listeners. Only an explicit
/// [`close`](EventSource::close), dropping the source, a non-2xx status or a
/// wrong content type stop it.
///
/// # Example
///
/// ```no_run
/// use eventsource::{listener, Event, EventSource};
///
/// # async fn example() -> eventsource::Result<()> {
/// let source = EventSource::new("http://localhost:8080/events")?;
///
/// source.subscribe("message", listener(|event: &Event| {
///     if let Some(message) = event.as_message() {
///         println!("{}", message.data);
///     }
/// }));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct EventSource {
    shared: Arc<Shared>,
}

/// Builder for opening an event source with listeners already attached
///
/// Listeners registered here are in place before the first connection
/// attempt, so they cannot miss the initial `open` event.
pub struct EventSourceBuilder {
    url: String,
    options: EventSourceOptions,
    listeners: Vec<(String, Listener<Event>)>,
}

/// Closes an event source without keeping it alive
///
/// Safe to capture in listeners of the source it closes.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    shared: Weak<Shared>,
}

/// State shared between the public handle, the connection task and event streams
pub(crate) struct Shared {
    url: Url,
    origin: String,
    with_credentials: bool,
    state: AtomicU8,
    /// Set once no further events may be dispatched
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
    last_event_id: RwLock<String>,
    retry: RwLock<Duration>,
    task: Mutex<Option<AbortHandle>>,
    pub(crate) listeners: EventTarget<Event>,
}

/// Per-source HTTP setup, built once at construction
struct Connection {
    client: Client,
    url: Url,
    headers: HeaderMap,
    max_line_length: usize,
}

impl EventSource {
    /// Open an event source with default options
    ///
    /// # Arguments
    /// * `url` - Absolute http(s) URL of the stream (e.g., "http://localhost:8080/events")
    pub fn new(url: &str) -> Result<Self> {
        Self::with_options(url, EventSourceOptions::default())
    }

    /// Open an event source with custom options
    ///
    /// Returns as soon as the connection task is spawned; the outcome of the
    /// connection is reported through `open` and `error` events. Must be
    /// called from within a tokio runtime.
    pub fn with_options(url: &str, options: EventSourceOptions) -> Result<Self> {
        Self::builder(url).options(options).open()
    }

    /// Start building an event source
    pub fn builder(url: &str) -> EventSourceBuilder {
        EventSourceBuilder {
            url: url.to_string(),
            options: EventSourceOptions::default(),
            listeners: Vec::new(),
        }
    }

    /// Resolved stream URL
    pub fn url(&self) -> &Url {
        &self.shared.url
    }

    /// Current connection state
    pub fn ready_state(&self) -> ReadyState {
        self.shared.ready_state()
    }

    /// Last event ID received (or configured), empty if none
    pub fn last_event_id(&self) -> String {
        self.shared.last_event_id()
    }

    /// Delay before the next reconnection attempt
    pub fn retry_delay(&self) -> Duration {
        self.shared.retry_delay()
    }

    /// Whether credentials are sent on cross-origin requests
    pub fn with_credentials(&self) -> bool {
        self.shared.with_credentials
    }

    /// Register a listener for an event type
    pub fn subscribe(&self, event_type: &str, listener: Listener<Event>) {
        self.shared.listeners.subscribe(event_type, listener);
    }

    /// Remove a previously registered listener
    pub fn unsubscribe(&self, event_type: &str, listener: &Listener<Event>) -> bool {
        self.shared.listeners.unsubscribe(event_type, listener)
    }

    /// Register a closure and return its handle for later `unsubscribe`
    pub fn on<F>(&self, event_type: &str, f: F) -> Listener<Event>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let handle = listener(f);
        self.subscribe(event_type, handle.clone());
        handle
    }

    /// Number of listeners for an event type
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.shared.listeners.listener_count(event_type)
    }

    /// Stream the given event types
    ///
    /// The stream ends once the source is closed and every queued event has
    /// been yielded. Dropping it removes its listeners.
    pub fn events(&self, event_types: &[&str]) -> EventStream {
        EventStream::attach(&self.shared, event_types)
    }

    /// Close the connection, if any, and set the ready state to Closed
    ///
    /// Cancels an in-flight request or pending reconnect. If the source is
    /// already closed, the method does nothing.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Handle that closes this source from elsewhere (e.g. a listener)
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl EventSourceBuilder {
    /// Replace the options
    pub fn options(mut self, options: EventSourceOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a listener before connecting
    pub fn on(mut self, event_type: &str, listener: Listener<Event>) -> Self {
        self.listeners.push((event_type.to_string(), listener));
        self
    }

    /// Validate the configuration and start connecting
    pub fn open(self) -> Result<EventSource> {
        let (source, connection) = self.prepare()?;
        source.shared.spawn(connection)?;
        Ok(source)
    }

    /// Like [`open`](Self::open), with a stream of `event_types` attached before connecting
    pub fn open_stream(self, event_types: &[&str]) -> Result<(EventSource, EventStream)> {
        let (source, connection) = self.prepare()?;
        let stream = source.events(event_types);
        source.shared.spawn(connection)?;
        Ok((source, stream))
    }

    fn prepare(self) -> Result<(EventSource, Connection)> {
        let options = self.options;
        let url = resolve_url(&self.url, options.base_url.as_ref())?;

        // Credentials go to the same origin, or anywhere when requested
        let send_credentials = options.with_credentials
            || options
                .base_url
                .as_ref()
                .map_or(true, |base| base.origin() == url.origin());

        let connection = Connection::new(&url, &options, send_credentials)?;

        let (closed_tx, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            origin: url.origin().ascii_serialization(),
            url,
            with_credentials: options.with_credentials,
            state: AtomicU8::new(ReadyState::CONNECTING.as_raw()),
            closed: AtomicBool::new(false),
            closed_tx,
            last_event_id: RwLock::new(options.last_event_id.unwrap_or_default()),
            retry: RwLock::new(options.retry),
            task: Mutex::new(None),
            listeners: EventTarget::new(),
        });

        for (event_type, listener) in self.listeners {
            shared.listeners.subscribe(&event_type, listener);
        }

        Ok((EventSource { shared }, connection))
    }
}

impl CloseHandle {
    /// Close the source if it still exists
    pub fn close(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.close();
        }
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSource")
            .field("url", &self.url.as_str())
            .field("ready_state", &self.ready_state())
            .field("last_event_id", &self.last_event_id())
            .field("listeners", &self.listeners)
            .finish()
    }
}

impl Shared {
    fn spawn(self: &Arc<Self>, connection: Connection) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
        let handle = runtime.spawn(run(self.clone(), connection));
        *self.task.lock() = Some(handle.abort_handle());
        Ok(())
    }

    pub(crate) fn ready_state(&self) -> ReadyState {
        ReadyState::from_raw(self.state.load(Ordering::SeqCst))
    }

    /// Move to `state` unless already Closed; returns whether it moved
    fn set_state(&self, state: ReadyState) -> bool {
        let closed = ReadyState::CLOSED.as_raw();
        let result = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current != closed).then_some(state.as_raw())
            });

        match result {
            Ok(previous) => {
                let previous = ReadyState::from_raw(previous);
                if previous != state {
                    debug!(url = %self.url, from = %previous, to = %state, "Ready state changed");
                }
                true
            }
            Err(_) => false,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn closed_rx(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    fn last_event_id(&self) -> String {
        self.last_event_id.read().clone()
    }

    fn set_last_event_id(&self, id: &str) {
        let mut current = self.last_event_id.write();
        if current.as_str() != id {
            *current = id.to_string();
        }
    }

    fn retry_delay(&self) -> Duration {
        *self.retry.read()
    }

    fn set_retry(&self, retry: Duration) {
        debug!(retry_ms = retry.as_millis() as u64, "Server set reconnect delay");
        *self.retry.write() = retry;
    }

    /// Deliver an event unless the source has been closed
    fn dispatch(&self, event: Event) {
        if self.is_closed() {
            return;
        }
        self.listeners.dispatch(event.event_type(), &event);
    }

    fn dispatch_error(&self, error: EventSourceError) {
        let event = Event::Error(ErrorEvent {
            error: Arc::new(error),
            ready_state: self.ready_state(),
        });
        self.dispatch(event);
    }

    /// Connection established
    fn announce(&self) {
        if self.is_closed() {
            return;
        }
        if self.set_state(ReadyState::OPEN) {
            self.dispatch(Event::Open);
        }
    }

    /// Non-fatal failure: back to Connecting and report it
    fn reestablish(&self, error: EventSourceError) {
        if self.is_closed() {
            return;
        }
        if self.set_state(ReadyState::CONNECTING) {
            self.dispatch_error(error);
        }
    }

    /// Fatal failure: Closed, report once, never reconnect
    fn fail(&self, error: EventSourceError) {
        if self.is_closed() {
            return;
        }
        error!(url = %self.url, error = %error, "Fatal SSE error, will not retry");
        if !self.set_state(ReadyState::CLOSED) {
            return;
        }
        self.dispatch_error(error);
        self.closed.store(true, Ordering::SeqCst);
        self.task.lock().take();
        self.closed_tx.send_replace(true);
    }

    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(ReadyState::CLOSED);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.closed_tx.send_replace(true);
        debug!(url = %self.url, "Event source closed");
    }
}

/// Connection loop: connect, stream, and reconnect until closed or failed
async fn run(shared: Arc<Shared>, connection: Connection) {
    loop {
        let result = connection.connect_and_stream(&shared).await;
        if shared.is_closed() {
            return;
        }

        let error = match result {
            Ok(()) => return,
            Err(e) if e.is_fatal() => {
                shared.fail(e);
                return;
            }
            Err(e) => e,
        };

        let delay = shared.retry_delay();
        warn!(
            url = %shared.url,
            error = %error,
            reconnect_in_ms = delay.as_millis() as u64,
            "SSE connection failed, will reconnect"
        );
        shared.reestablish(error);

        tokio::time::sleep(delay).await;
        if shared.is_closed() {
            return;
        }
    }
}

impl Connection {
    fn new(url: &Url, options: &EventSourceOptions, send_credentials: bool) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &options.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ConfigError::invalid_header(name, e))?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| ConfigError::invalid_header(name, e))?;
            headers.append(header_name, header_value);
        }

        headers.insert(ACCEPT, HeaderValue::from_static(EVENT_STREAM_MIME));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let mut url = url.clone();
        if send_credentials {
            if let Some(token) = &options.bearer_token {
                let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| ConfigError::invalid_header(AUTHORIZATION.as_str(), e))?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
        } else {
            // Userinfo would otherwise be sent as basic auth
            let _ = url.set_username("");
            let _ = url.set_password(None);
        }

        // No overall timeout: the response body is long-lived
        let client = Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(ConfigError::HttpClient)?;

        Ok(Self {
            client,
            url,
            headers,
            max_line_length: options.max_line_length,
        })
    }

    /// One connection attempt
    ///
    /// Returns `Ok(())` only when the source was closed while streaming.
    #[instrument(skip_all, fields(url = %self.url))]
    async fn connect_and_stream(&self, shared: &Shared) -> Result<()> {
        let mut request = self.client.get(self.url.clone()).headers(self.headers.clone());

        let last_event_id = shared.last_event_id();
        if !last_event_id.is_empty() {
            match HeaderValue::from_str(&last_event_id) {
                Ok(value) => request = request.header(LAST_EVENT_ID, value),
                Err(_) => warn!(
                    last_event_id = ?last_event_id,
                    "Last event ID is not a valid header value, resuming without it"
                ),
            }
        }

        debug!(last_event_id = %last_event_id, "Connecting to SSE stream");

        let response = request.send().await.map_err(TransportError::Connect)?;
        check_response(&response)?;

        if shared.is_closed() {
            return Ok(());
        }
        shared.announce();

        let mut parser = SseParser::new()
            .with_last_event_id(last_event_id)
            .with_origin(shared.origin.clone());
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(TransportError::Read)?;

            for event in parser.feed(bytes) {
                if shared.is_closed() {
                    return Ok(());
                }
                shared.set_last_event_id(&event.last_event_id);
                shared.dispatch(Event::Message(event));
            }

            shared.set_last_event_id(parser.last_event_id());
            if let Some(retry) = parser.take_retry() {
                shared.set_retry(retry);
            }

            if parser.pending_line_len() > self.max_line_length {
                return Err(TransportError::LineTooLong {
                    max: self.max_line_length,
                }
                .into());
            }

            if shared.is_closed() {
                return Ok(());
            }
        }

        Err(TransportError::Closed.into())
    }
}

/// Resolve `url` against an optional base and require http(s)
fn resolve_url(url: &str, base: Option<&Url>) -> std::result::Result<Url, ConfigError> {
    let resolved = match base {
        Some(base) => base.join(url)?,
        None => Url::parse(url).map_err(|e| match e {
            url::ParseError::RelativeUrlWithoutBase => ConfigError::RelativeUrl(url.to_string()),
            other => ConfigError::InvalidUrl(other),
        })?,
    };

    match resolved.scheme() {
        "http" | "https" => Ok(resolved),
        other => Err(ConfigError::UnsupportedScheme(other.to_string())),
    }
}

/// Non-2xx statuses and non-event-stream bodies are fatal
fn check_response(response: &Response) -> std::result::Result<(), ProtocolError> {
    let status = response.status();
    if !status.is_success() {
        return Err(ProtocolError::HttpStatus {
            status: status.as_u16(),
        });
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    if !content_type.is_some_and(is_event_stream) {
        return Err(ProtocolError::ContentType {
            content_type: content_type.map(String::from),
        });
    }

    Ok(())
}

/// Compare the MIME essence, ignoring parameters and case
fn is_event_stream(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|essence| essence.eq_ignore_ascii_case(EVENT_STREAM_MIME))
}
