//! Shared plumbing behind `GET /api/events` and `GET /ws/monitor`: a
//! per-connection [`BoundedSubscriber`] fed by a forwarder task subscribed to
//! the [`EventBus`], and a drop guard that unregisters the connection and
//! stops its forwarder the moment the transport goes away (`spec.md` §4.6:
//! "a subscriber is removed when its write returns any error, when the
//! client closes, or when the daemon is shutting down").

use std::sync::Arc;

use dashmap::DashMap;
use naos_core::alerts::{passes_filter, AlertEngine};
use naos_core::events::{BoundedSubscriber, EventBus};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

pub type CategoryFilter = Arc<Mutex<Vec<String>>>;

/// Feeds every published event into `alerts`, collapsing repeats into
/// groups per `spec.md` §4.5, and republishes onto `live_feed` exactly the
/// events the engine's throttle/priority decision admits. This is the
/// single place §4.5's "at most one live notification per group per
/// throttle window" contract is enforced, upstream of both live-push
/// transports — `spawn_forwarder` only ever sees events already cleared for
/// push. Runs for the caller's lifetime; exits only when `events` is torn
/// down.
pub fn spawn_alert_feed(
    events: Arc<EventBus>,
    live_feed: Arc<EventBus>,
    alerts: Arc<AlertEngine>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut receiver = events.subscribe();
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let (_, should_push) = alerts.submit(event.clone());
                    if should_push {
                        live_feed.publish(event).await;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "alert feed lagged behind the event bus");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}

/// Subscribes to `events` and pushes each event into `subscriber`, honoring
/// `categories` as a live-updatable allow-list (`spec.md` §4.6's
/// subscription-update messages). Production callers pass `AppState::live_feed`
/// here, not the raw event bus — the alert engine's throttle/priority
/// decision (`spec.md` §4.5) has already been applied by the time an event
/// reaches that bus, so this forwarder only ever needs to apply the
/// category filter on top. A lagged broadcast receiver is reported as an
/// internal event drop, not surfaced to the client — the per-connection
/// bounded queue is the client-visible drop mechanism (Testable Property 7).
pub fn spawn_forwarder(
    events: Arc<EventBus>,
    subscriber: Arc<BoundedSubscriber>,
    categories: CategoryFilter,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut receiver = events.subscribe();
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let allowed = {
                        let guard = categories.lock();
                        passes_filter(event.severity, &event.category, &guard)
                    };
                    if allowed {
                        subscriber.push(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}

/// Unregisters a connection's subscriber queue and aborts its forwarder on
/// drop, wherever that happens — a plain function return for `/ws/monitor`,
/// or the generator frame being dropped on client disconnect for
/// `/api/events`'s `async_stream`.
pub struct ConnectionGuard {
    pub subscribers: Arc<DashMap<Uuid, Arc<BoundedSubscriber>>>,
    pub id: Uuid,
    pub forward_task: tokio::task::JoinHandle<()>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.forward_task.abort();
        self.subscribers.remove(&self.id);
    }
}
