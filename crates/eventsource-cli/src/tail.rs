//! Tail command - print events from a stream until stopped

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use eventsource::{Event, EventSource, EventSourceOptions, ERROR, OPEN};
use tracing::debug;

use crate::output::{OutputContext, SummaryRow};

/// When to stop tailing
pub struct TailLimits {
    /// Stop after this many decoded events
    pub max_events: Option<usize>,
}

/// Follow a stream, printing the requested event types
pub async fn tail(
    url: &str,
    event_types: &[String],
    options: EventSourceOptions,
    limits: TailLimits,
    ctx: &OutputContext,
) -> Result<()> {
    let mut types: Vec<&str> = event_types.iter().map(String::as_str).collect();
    types.extend([OPEN, ERROR]);
    types.sort_unstable();
    types.dedup();
    debug!(?types, "Subscribing to event types");

    let (source, mut events) = EventSource::builder(url)
        .options(options)
        .open_stream(&types)
        .with_context(|| format!("Failed to open event source: {}", url))?;

    ctx.info(&format!("Connecting to {}...", source.url()));
    ctx.info("Press Ctrl+C to stop");

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    ctx.print_header();

    let mut summary: BTreeMap<String, SummaryRow> = BTreeMap::new();
    let mut received = 0usize;

    while running.load(Ordering::SeqCst) {
        tokio::select! {
            event = events.next() => {
                match event {
                    Some(Event::Open) => {
                        ctx.success(&format!("Connected (last event ID: {:?})", source.last_event_id()));
                    }
                    Some(Event::Message(message)) => {
                        ctx.print_event(&message);

                        let row = summary
                            .entry(message.event_type.clone())
                            .or_insert_with(|| SummaryRow {
                                event_type: message.event_type.clone(),
                                count: 0,
                                last_id: String::new(),
                            });
                        row.count += 1;
                        row.last_id = message.last_event_id.clone();

                        received += 1;
                        if limits.max_events.is_some_and(|max| received >= max) {
                            break;
                        }
                    }
                    Some(Event::Error(error)) if error.is_fatal() => {
                        ctx.error(&format!("Stream failed: {}", error.error));
                        break;
                    }
                    Some(Event::Error(error)) => {
                        ctx.warn(&format!(
                            "Connection lost: {} (reconnecting in {}ms)",
                            error.error,
                            source.retry_delay().as_millis()
                        ));
                    }
                    None => {
                        ctx.info("Stream ended");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(tokio::time::Duration::from_millis(100)) => {
                // Check running flag periodically
                if !running.load(Ordering::SeqCst) {
                    break;
                }
            }
        }
    }

    ctx.info("\nClosing stream...");
    let last_event_id = source.last_event_id();
    debug!(received, last_event_id = %last_event_id, "Tail finished");
    source.close();

    let rows: Vec<SummaryRow> = summary.into_values().collect();
    ctx.print(&rows);
    if !last_event_id.is_empty() {
        ctx.info(&format!("Resume with --last-event-id {}", last_event_id));
    }

    Ok(())
}
