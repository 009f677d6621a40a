//! Event Stream Registry — fans every consumed [`AccessLogEvent`] out to
//! every connected dashboard viewer over server-sent events.
//!
//! Subscribers are tracked in a `DashMap<Uuid, UnboundedSender<_>>`, the
//! same concurrent-map primitive the teacher's in-process rate limiter
//! keys by IP. `DashMap` tolerates concurrent insertion, removal, and
//! iteration, which `broadcast` relies on: it walks the live subscriber
//! set while `register`/disconnect may be running on other tasks.
//! `tokio::sync::broadcast` was considered and rejected — its lag-based
//! drop semantics discard the *oldest* buffered events for a slow
//! subscriber, whereas the dashboard feed wants to drop the *subscriber*
//! outright on a full/closed channel and keep serving everyone else.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use dashmap::DashMap;
use futures_util::StreamExt as _;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::access_log::AccessLogEvent;

/// Registry of currently connected dashboard subscribers.
#[derive(Default)]
pub struct EventStreamRegistry {
    subscribers: DashMap<Uuid, mpsc::UnboundedSender<AccessLogEvent>>,
}

impl EventStreamRegistry {
    pub fn new() -> Self {
        Self { subscribers: DashMap::new() }
    }

    /// Register a new subscriber and return the stream of SSE events it
    /// should be served. The entry is removed automatically once the
    /// receiver, and therefore the SSE response, is dropped (the
    /// corresponding `send` starts failing and `broadcast` removes it).
    pub fn register(&self) -> impl futures_util::Stream<Item = Result<Event, Infallible>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.subscribers.insert(id, tx);

        let established =
            futures_util::stream::once(async { Ok::<Event, Infallible>(Event::default().comment("connected")) });
        let events = UnboundedReceiverStream::new(rx).filter_map(|event| match Event::default().json_data(&event) {
            Ok(sse_event) => Some(Ok(sse_event)),
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize access log event for sse, dropping");
                None
            }
        });

        established.chain(events)
    }

    /// Send `event` to every currently registered subscriber. A subscriber
    /// whose channel is closed (receiver dropped) is removed; all others
    /// still receive the event.
    pub fn broadcast(&self, event: AccessLogEvent) {
        self.subscribers.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// `GET /dashboard/stream` handler.
pub async fn stream_handler(
    axum::extract::State(state): axum::extract::State<std::sync::Arc<crate::AppState>>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>> {
    let stream = state.event_stream.register();
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
