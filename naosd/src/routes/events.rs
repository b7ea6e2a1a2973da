//! `GET /api/events` — server-sent live push. Frame format is the literal
//! contract in `spec.md` §4.6/§6: an `event: <token>` line naming the
//! category (or `connected`/`overflow`/`heartbeat`), a `data: <json>` line,
//! and a blank line. Grounded on the teacher's
//! `handlers/scan/handle_scan.rs` SSE handlers — same `async_stream::stream!`
//! plus `Sse::new(..).keep_alive(..)` shape — adapted to drain a
//! [`naos_core::events::BoundedSubscriber`] instead of a raw broadcast
//! receiver, so the 256-then-one-overflow-frame rule is enforced
//! independently of how fast the HTTP client reads (Testable Property 7).

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use naos_core::events::{BoundedSubscriber, Frame};
use serde::Deserialize;
use tokio_stream::Stream;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::live_push::{spawn_forwarder, ConnectionGuard};

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Comma-separated category allow-list. Empty/absent means "everything"
    /// (see `passes_filter`'s no-filter default).
    pub categories: Option<String>,
}

fn frame_to_sse(frame: Frame) -> SseEvent {
    match frame {
        Frame::Event(event) => SseEvent::default()
            .event(event.category.clone())
            .data(serde_json::to_string(&event).unwrap_or_default()),
        Frame::Overflow(overflow) => SseEvent::default()
            .event("overflow")
            .data(serde_json::to_string(&overflow).unwrap_or_default()),
    }
}

fn default_keep_alive() -> KeepAlive {
    KeepAlive::new().interval(Duration::from_secs(15))
}

pub async fn stream_events(
    State(state): State<AppState>,
    Query(q): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let categories: Vec<String> =
        q.categories.map(|raw| raw.split(',').map(|c| c.trim().to_string()).filter(|c| !c.is_empty()).collect()).unwrap_or_default();

    let subscriber_id = Uuid::now_v7();
    let subscriber = std::sync::Arc::new(BoundedSubscriber::new(state.config.subscriber_queue_capacity));
    state.subscribers.insert(subscriber_id, subscriber.clone());

    let forward_task = spawn_forwarder(
        state.live_feed.clone(),
        subscriber.clone(),
        std::sync::Arc::new(parking_lot::Mutex::new(categories)),
    );
    let guard = ConnectionGuard { subscribers: state.subscribers.clone(), id: subscriber_id, forward_task };

    let stream = async_stream::stream! {
        // Moved into the generator so it is dropped — unregistering the
        // subscriber and aborting its forwarder — the moment this stream
        // is, whether from a write error bubbling out of hyper or the
        // client closing the connection.
        let _guard = guard;

        yield Ok(SseEvent::default().event("connected").data(serde_json::json!({ "subscriber_id": subscriber_id }).to_string()));

        let mut heartbeat = tokio::time::interval(Duration::from_secs(15));
        heartbeat.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                _ = subscriber.wait_for_frame() => {
                    while let Some(frame) = subscriber.try_pop() {
                        yield Ok(frame_to_sse(frame));
                    }
                }
                _ = heartbeat.tick() => {
                    yield Ok(SseEvent::default().event("heartbeat").data("{}"));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(default_keep_alive())
}
