//! Event source fan-in: the single internal stream every other component
//! publishes to or subscribes from. Per `spec.md` §9's design note, making
//! this the sole publisher breaks the cyclic reference that would otherwise
//! exist between the subscriber set, the alert engine, and the heartbeat —
//! no component holds a direct reference to another's internals.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub use crate::storage::health::Severity;

/// A host event normalized from hot-plug callbacks, pool-state polling, or
/// job progress. See `spec.md` §4.4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub category: String,
    pub severity: Severity,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub group_key: Option<String>,
}

impl Event {
    /// Builds an event with a placeholder sequence number; [`EventBus::publish`]
    /// assigns the real, monotonically increasing sequence before fan-out.
    pub fn new(category: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            sequence: 0,
            timestamp: Utc::now(),
            category: category.into(),
            severity,
            message: message.into(),
            details: None,
            group_key: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_group_key(mut self, key: impl Into<String>) -> Self {
        self.group_key = Some(key.into());
        self
    }
}

/// The internal fan-in/fan-out bus. Every ingress source (`spec.md` §4.4:
/// hot-plug callbacks, the pool-state poller, job progress) publishes here;
/// the alert engine and the live-push layer both subscribe, independently.
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    sequence: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, sequence: AtomicU64::new(0) }
    }

    /// Publishes `event`, assigning it the next sequence number. Ordering
    /// guarantee (`spec.md` §5): any single subscriber observes
    /// non-decreasing sequence numbers, since assignment and send happen
    /// under the same call with no intervening await that could reorder
    /// two publishers racing this method (the fetch_add is the ordering
    /// point; tokio's broadcast channel preserves send order to receivers).
    pub async fn publish(&self, mut event: Event) -> Event {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        event.sequence = seq;
        // A lagging or absent subscriber is not our problem here; callers
        // that need delivery guarantees use the alert engine's own
        // tracking, not raw broadcast send success.
        let _ = self.sender.send(event.clone());
        event
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

pub fn shared(capacity: usize) -> Arc<EventBus> {
    Arc::new(EventBus::new(capacity))
}

/// A synthetic frame queued in place of a dropped event once a subscriber's
/// queue is full. Carries the sequence number at which the drop started so
/// a client can tell how much it missed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Overflow {
    pub since_sequence: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    Event(Event),
    Overflow(Overflow),
}

/// A per-subscriber bounded queue backing `GET /api/events` and
/// `/ws/monitor`. Connection-scoped state modeled the way the teacher's
/// `websocket::Connection` wraps an `mpsc::Sender` per client, except this
/// queue is a plain `VecDeque` behind a lock rather than a channel, so the
/// exact 256-then-one-overflow-frame behavior (`spec.md` Testable Property
/// 7) is a property of this type rather than of tokio's channel backpressure.
pub struct BoundedSubscriber {
    queue: parking_lot::Mutex<std::collections::VecDeque<Frame>>,
    notify: tokio::sync::Notify,
    capacity: usize,
    overflowed: std::sync::atomic::AtomicBool,
}

impl BoundedSubscriber {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: parking_lot::Mutex::new(std::collections::VecDeque::new()),
            notify: tokio::sync::Notify::new(),
            capacity,
            overflowed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Enqueues `event`, honoring the overflow rule: once the queue is at
    /// capacity, all further real events are dropped silently except for
    /// one synthetic [`Frame::Overflow`] marking the drop.
    pub fn push(&self, event: Event) {
        if self.overflowed.load(std::sync::atomic::Ordering::Acquire) {
            return;
        }
        let mut queue = self.queue.lock();
        if queue.len() < self.capacity {
            queue.push_back(Frame::Event(event));
        } else {
            self.overflowed.store(true, std::sync::atomic::Ordering::Release);
            queue.push_back(Frame::Overflow(Overflow { since_sequence: event.sequence }));
        }
        drop(queue);
        self.notify.notify_waiters();
    }

    pub fn try_pop(&self) -> Option<Frame> {
        self.queue.lock().pop_front()
    }

    pub async fn wait_for_frame(&self) {
        self.notify.notified().await;
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
