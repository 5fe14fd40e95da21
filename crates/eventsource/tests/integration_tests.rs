//! Integration tests for eventsource
//!
//! These tests spin up a real HTTP server and point an event source at it,
//! covering connection setup, decoding, reconnection and fatal responses.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use eventsource::testing::{event_stream, event_stream_chunks, wait_for, TestServer};
use eventsource::{
    listener, Event, EventSource, EventSourceError, EventSourceOptions, EventStream,
    ProtocolError, ReadyState, TransportError,
};
use pretty_assertions::assert_eq;

// =============================================================================
// Helpers
// =============================================================================

/// Records the headers of every request the server receives
#[derive(Clone, Default)]
struct Recorder {
    requests: Arc<Mutex<Vec<HeaderMap>>>,
}

impl Recorder {
    fn record(&self, headers: HeaderMap) -> usize {
        let mut requests = self.requests.lock().unwrap();
        requests.push(headers);
        requests.len() - 1
    }

    fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn header(&self, index: usize, name: &str) -> Option<String> {
        self.requests.lock().unwrap()[index]
            .get(name)
            .map(|v| v.to_str().unwrap().to_string())
    }
}

/// Router serving `/events`; `respond` gets the zero-based connection number
fn scripted<F>(recorder: &Recorder, respond: F) -> Router
where
    F: Fn(usize) -> Response + Clone + Send + Sync + 'static,
{
    let recorder = recorder.clone();
    Router::new().route(
        "/events",
        get(move |headers: HeaderMap| {
            let recorder = recorder.clone();
            let respond = respond.clone();
            async move {
                let attempt = recorder.record(headers);
                respond(attempt)
            }
        }),
    )
}

fn fast_retry() -> EventSourceOptions {
    EventSourceOptions::new().retry(Duration::from_millis(20))
}

async fn next_event(stream: &mut EventStream) -> Event {
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("timed out waiting for event")
        .expect("event stream ended")
}

fn message_data(event: &Event) -> &str {
    &event.as_message().expect("expected a message event").data
}

// =============================================================================
// Connection and decoding
// =============================================================================

#[tokio::test]
async fn test_open_then_message() {
    let recorder = Recorder::default();
    let server = TestServer::start(scripted(&recorder, |_| {
        event_stream_chunks(vec!["data: hello\n\n".into()], true)
    }))
    .await
    .unwrap();

    let (source, mut events) = EventSource::builder(&server.url("/events"))
        .open_stream(&["open", "message"])
        .unwrap();

    assert!(matches!(next_event(&mut events).await, Event::Open));
    assert_eq!(source.ready_state(), ReadyState::OPEN);

    let event = next_event(&mut events).await;
    let message = event.as_message().unwrap();
    assert_eq!(message.event_type, "message");
    assert_eq!(message.data, "hello");
    assert_eq!(message.origin, server.base_url());

    source.close();
    assert_eq!(source.ready_state(), ReadyState::CLOSED);
    assert!(events.next().await.is_none());
}

#[tokio::test]
async fn test_request_headers() {
    let recorder = Recorder::default();
    let server = TestServer::start(scripted(&recorder, |_| {
        event_stream_chunks(vec![], true)
    }))
    .await
    .unwrap();

    let options = EventSourceOptions::new().header("X-Client", "tests");
    let source = EventSource::with_options(&server.url("/events"), options).unwrap();

    assert!(wait_for(|| recorder.count() >= 1, Duration::from_secs(5)).await);
    assert_eq!(recorder.header(0, "accept").as_deref(), Some("text/event-stream"));
    assert_eq!(recorder.header(0, "cache-control").as_deref(), Some("no-cache"));
    assert_eq!(recorder.header(0, "x-client").as_deref(), Some("tests"));
    assert_eq!(recorder.header(0, "last-event-id"), None);

    source.close();
}

#[tokio::test]
async fn test_multiline_custom_event() {
    let recorder = Recorder::default();
    let server = TestServer::start(scripted(&recorder, |_| {
        event_stream_chunks(
            vec!["event: update\ndata: foo\ndata: bar\n\ndata: plain\n\n".into()],
            true,
        )
    }))
    .await
    .unwrap();

    let (source, mut events) = EventSource::builder(&server.url("/events"))
        .open_stream(&["update", "message"])
        .unwrap();

    let first = next_event(&mut events).await;
    assert_eq!(first.event_type(), "update");
    assert_eq!(message_data(&first), "foo\nbar");

    let second = next_event(&mut events).await;
    assert_eq!(second.event_type(), "message");
    assert_eq!(message_data(&second), "plain");

    source.close();
}

#[tokio::test]
async fn test_comment_only_record_dispatches_nothing() {
    let recorder = Recorder::default();
    let server = TestServer::start(scripted(&recorder, |_| {
        event_stream_chunks(
            vec![": keepalive\n: another\n\n".into(), "data: after\n\n".into()],
            true,
        )
    }))
    .await
    .unwrap();

    let (source, mut events) = EventSource::builder(&server.url("/events"))
        .open_stream(&["message"])
        .unwrap();

    assert_eq!(message_data(&next_event(&mut events).await), "after");

    source.close();
}

#[tokio::test]
async fn test_relative_url_with_base() {
    let recorder = Recorder::default();
    let server = TestServer::start(scripted(&recorder, |_| {
        event_stream_chunks(vec!["data: ok\n\n".into()], true)
    }))
    .await
    .unwrap();

    let options = EventSourceOptions::new().base_url(server.parsed_base_url().unwrap());
    let (source, mut events) = EventSource::builder("/events")
        .options(options)
        .open_stream(&["message"])
        .unwrap();

    assert_eq!(source.url().as_str(), server.url("/events"));
    assert_eq!(message_data(&next_event(&mut events).await), "ok");

    source.close();
}

// =============================================================================
// Reconnection
// =============================================================================

#[tokio::test]
async fn test_reconnect_resumes_with_last_event_id() {
    let recorder = Recorder::default();
    let server = TestServer::start(scripted(&recorder, |_| {
        event_stream("retry: 50\nid: 42\ndata: first\n\ndata: second\n\n")
    }))
    .await
    .unwrap();

    let (source, mut events) = EventSource::builder(&server.url("/events"))
        .open_stream(&["open", "message", "error"])
        .unwrap();

    assert!(matches!(next_event(&mut events).await, Event::Open));

    let first = next_event(&mut events).await;
    assert_eq!(first.as_message().unwrap().id.as_deref(), Some("42"));

    let second = next_event(&mut events).await;
    let second = second.as_message().unwrap();
    assert_eq!(second.id, None);
    assert_eq!(second.last_event_id, "42");

    // Server ended the body: error, back to Connecting, then reconnect
    let error = next_event(&mut events).await;
    let error = error.as_error().expect("expected an error event");
    assert!(!error.is_fatal());
    assert_eq!(error.ready_state, ReadyState::CONNECTING);
    assert!(matches!(
        *error.error,
        EventSourceError::Transport(TransportError::Closed)
    ));
    assert_eq!(source.retry_delay(), Duration::from_millis(50));

    assert!(matches!(next_event(&mut events).await, Event::Open));
    assert!(recorder.count() >= 2);
    assert_eq!(recorder.header(0, "last-event-id"), None);
    assert_eq!(recorder.header(1, "last-event-id").as_deref(), Some("42"));
    assert_eq!(source.last_event_id(), "42");

    source.close();
}

#[tokio::test]
async fn test_initial_last_event_id_sent() {
    let recorder = Recorder::default();
    let server = TestServer::start(scripted(&recorder, |_| {
        event_stream_chunks(vec![], true)
    }))
    .await
    .unwrap();

    let options = EventSourceOptions::new().last_event_id("17");
    let source = EventSource::with_options(&server.url("/events"), options).unwrap();

    assert!(wait_for(|| recorder.count() >= 1, Duration::from_secs(5)).await);
    assert_eq!(recorder.header(0, "last-event-id").as_deref(), Some("17"));

    source.close();
}

#[tokio::test]
async fn test_control_character_id_does_not_block_reconnect() {
    let recorder = Recorder::default();
    let server = TestServer::start(scripted(&recorder, |attempt| {
        if attempt == 0 {
            event_stream("id: a\u{1}b\ndata: x\n\n")
        } else {
            event_stream_chunks(vec!["data: y\n\n".into()], true)
        }
    }))
    .await
    .unwrap();

    let (source, mut events) = EventSource::builder(&server.url("/events"))
        .options(fast_retry())
        .open_stream(&["message"])
        .unwrap();

    let first = next_event(&mut events).await;
    assert_eq!(first.as_message().unwrap().last_event_id, "a\u{1}b");

    // The id cannot be sent as a header, but the reconnect still goes out
    let second = next_event(&mut events).await;
    assert_eq!(message_data(&second), "y");
    assert!(recorder.count() >= 2);
    assert_eq!(recorder.header(1, "last-event-id"), None);

    source.close();
}

#[tokio::test]
async fn test_overlong_line_drops_connection() {
    let recorder = Recorder::default();
    let server = TestServer::start(scripted(&recorder, |_| {
        event_stream_chunks(vec![format!("data: {}", "x".repeat(2048))], true)
    }))
    .await
    .unwrap();

    let (source, mut events) = EventSource::builder(&server.url("/events"))
        .options(fast_retry().max_line_length(1024))
        .open_stream(&["error"])
        .unwrap();

    let event = next_event(&mut events).await;
    let error = event.as_error().expect("expected an error event");
    assert!(!error.is_fatal());
    assert!(matches!(
        *error.error,
        EventSourceError::Transport(TransportError::LineTooLong { max: 1024 })
    ));

    assert!(wait_for(|| recorder.count() >= 2, Duration::from_secs(5)).await);

    source.close();
}

#[tokio::test]
async fn test_retries_without_limit() {
    let recorder = Recorder::default();
    let server = TestServer::start(scripted(&recorder, |_| event_stream("data: x\n\n")))
        .await
        .unwrap();

    let source = EventSource::with_options(&server.url("/events"), fast_retry()).unwrap();

    assert!(wait_for(|| recorder.count() >= 5, Duration::from_secs(5)).await);
    assert_ne!(source.ready_state(), ReadyState::CLOSED);

    source.close();
}

#[tokio::test]
async fn test_connection_refused_keeps_retrying() {
    // Grab a free port, then release it so connections are refused
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let (source, mut events) = EventSource::builder(&format!("http://127.0.0.1:{}/events", port))
        .options(fast_retry())
        .open_stream(&["open", "error"])
        .unwrap();

    for _ in 0..2 {
        let event = next_event(&mut events).await;
        let error = event.as_error().expect("expected an error event");
        assert!(matches!(
            *error.error,
            EventSourceError::Transport(TransportError::Connect(_))
        ));
        assert_eq!(error.ready_state, ReadyState::CONNECTING);
    }
    assert_eq!(source.ready_state(), ReadyState::CONNECTING);

    // Errors queued before the close are still drained, then the stream ends
    source.close();
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while events.next().await.is_some() {}
    })
    .await;
    assert!(drained.is_ok());
}

// =============================================================================
// Fatal responses
// =============================================================================

#[tokio::test]
async fn test_not_found_is_fatal() {
    let recorder = Recorder::default();
    let server = TestServer::start(scripted(&recorder, |_| {
        (StatusCode::NOT_FOUND, "missing").into_response()
    }))
    .await
    .unwrap();

    let (source, mut events) = EventSource::builder(&server.url("/events"))
        .options(fast_retry())
        .open_stream(&["open", "message", "error"])
        .unwrap();

    let event = next_event(&mut events).await;
    let error = event.as_error().expect("expected an error event");
    assert!(error.is_fatal());
    assert_eq!(error.ready_state, ReadyState::CLOSED);
    assert!(matches!(
        *error.error,
        EventSourceError::Protocol(ProtocolError::HttpStatus { status: 404 })
    ));

    // No further events and no second attempt
    assert!(events.next().await.is_none());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(recorder.count(), 1);
    assert_eq!(source.ready_state(), ReadyState::CLOSED);
}

#[tokio::test]
async fn test_wrong_content_type_is_fatal() {
    let recorder = Recorder::default();
    let server = TestServer::start(scripted(&recorder, |_| "data: x\n\n".into_response()))
        .await
        .unwrap();

    let errors = Arc::new(AtomicUsize::new(0));
    let counter = errors.clone();
    let source = EventSource::builder(&server.url("/events"))
        .options(fast_retry())
        .on(
            "error",
            listener(move |event: &Event| {
                let error = event.as_error().unwrap();
                assert!(matches!(
                    *error.error,
                    EventSourceError::Protocol(ProtocolError::ContentType { .. })
                ));
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .open()
        .unwrap();

    assert!(wait_for(|| source.ready_state() == ReadyState::CLOSED, Duration::from_secs(5)).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.count(), 1);

    // Closing after a fatal error is a no-op
    source.close();
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Listeners and close
// =============================================================================

#[tokio::test]
async fn test_panicking_listener_does_not_stop_stream() {
    let recorder = Recorder::default();
    let server = TestServer::start(scripted(&recorder, |_| {
        event_stream_chunks(vec!["data: 1\n\n".into(), "data: 2\n\n".into()], true)
    }))
    .await
    .unwrap();

    let (source, mut events) = EventSource::builder(&server.url("/events"))
        .on("message", listener(|_: &Event| panic!("listener failure")))
        .open_stream(&["message"])
        .unwrap();

    assert_eq!(message_data(&next_event(&mut events).await), "1");
    assert_eq!(message_data(&next_event(&mut events).await), "2");
    assert_eq!(source.ready_state(), ReadyState::OPEN);

    source.close();
}

#[tokio::test]
async fn test_close_from_listener_stops_dispatch() {
    let recorder = Recorder::default();
    let server = TestServer::start(scripted(&recorder, |_| {
        event_stream_chunks(vec!["data: 1\n\ndata: 2\n\ndata: 3\n\n".into()], true)
    }))
    .await
    .unwrap();

    let source = EventSource::with_options(&server.url("/events"), fast_retry()).unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let closer = source.close_handle();
    source.on("message", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        closer.close();
    });

    assert!(wait_for(|| source.ready_state() == ReadyState::CLOSED, Duration::from_secs(5)).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.count(), 1);
}

#[tokio::test]
async fn test_unsubscribed_listener_not_called() {
    let recorder = Recorder::default();
    let server = TestServer::start(scripted(&recorder, |_| {
        event_stream_chunks(vec!["data: 1\n\n".into()], true)
    }))
    .await
    .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handle = listener(move |_: &Event| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let (source, mut events) = EventSource::builder(&server.url("/events"))
        .on("message", handle.clone())
        .open_stream(&["message"])
        .unwrap();
    assert!(source.unsubscribe("message", &handle));

    next_event(&mut events).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    source.close();
}

#[tokio::test]
async fn test_dropping_stream_unregisters() {
    let source = EventSource::new("http://127.0.0.1:9/events").unwrap();

    let events = source.events(&["message", "error"]);
    assert_eq!(source.listener_count("message"), 1);
    assert_eq!(source.listener_count("error"), 1);

    drop(events);
    assert_eq!(source.listener_count("message"), 0);
    assert_eq!(source.listener_count("error"), 0);
}

// =============================================================================
// Credentials
// =============================================================================

async fn authorization_for(options: EventSourceOptions) -> Option<String> {
    let recorder = Recorder::default();
    let server = TestServer::start(scripted(&recorder, |_| {
        event_stream_chunks(vec![], true)
    }))
    .await
    .unwrap();

    let source = EventSource::with_options(&server.url("/events"), options).unwrap();
    assert!(wait_for(|| recorder.count() >= 1, Duration::from_secs(5)).await);
    source.close();

    recorder.header(0, "authorization")
}

#[tokio::test]
async fn test_credentials_same_origin() {
    let auth = authorization_for(EventSourceOptions::new().bearer_token("secret")).await;
    assert_eq!(auth.as_deref(), Some("Bearer secret"));
}

#[tokio::test]
async fn test_credentials_cross_origin() {
    let other = url::Url::parse("http://app.example.com/").unwrap();

    let auth = authorization_for(
        EventSourceOptions::new()
            .base_url(other.clone())
            .bearer_token("secret"),
    )
    .await;
    assert_eq!(auth, None);

    let auth = authorization_for(
        EventSourceOptions::new()
            .base_url(other)
            .bearer_token("secret")
            .with_credentials(true),
    )
    .await;
    assert_eq!(auth.as_deref(), Some("Bearer secret"));
}
