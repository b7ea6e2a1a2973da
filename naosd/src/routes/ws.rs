//! `GET /ws/monitor` — the full-duplex counterpart to `/api/events`: pushes
//! the same frames as discrete text messages and, unlike SSE, accepts
//! subscription-update messages from the client (`spec.md` §4.6: "a
//! connected client may add or remove categories from its filter without
//! reconnecting").

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use naos_core::events::{BoundedSubscriber, Frame};
use parking_lot::Mutex;
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::live_push::{spawn_forwarder, CategoryFilter, ConnectionGuard};

pub async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum SubscriptionUpdate {
    Add { category: String },
    Remove { category: String },
}

fn apply_update(categories: &CategoryFilter, update: SubscriptionUpdate) {
    let mut guard = categories.lock();
    match update {
        SubscriptionUpdate::Add { category } => {
            if !guard.contains(&category) {
                guard.push(category);
            }
        }
        SubscriptionUpdate::Remove { category } => guard.retain(|c| c != &category),
    }
}

fn frame_payload(frame: Frame) -> String {
    serde_json::to_string(&frame).unwrap_or_default()
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let subscriber_id = Uuid::now_v7();
    let subscriber = Arc::new(BoundedSubscriber::new(state.config.subscriber_queue_capacity));
    state.subscribers.insert(subscriber_id, subscriber.clone());
    let categories: CategoryFilter = Arc::new(Mutex::new(Vec::new()));

    let forward_task = spawn_forwarder(state.live_feed.clone(), subscriber.clone(), categories.clone());
    let _guard = ConnectionGuard { subscribers: state.subscribers.clone(), id: subscriber_id, forward_task };

    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(update) = serde_json::from_str::<SubscriptionUpdate>(&text) {
                    apply_update(&categories, update);
                }
            }
        }
    });

    let payload = serde_json::json!({ "kind": "connected", "subscriber_id": subscriber_id }).to_string();
    if sender.send(Message::Text(payload.into())).await.is_err() {
        reader.abort();
        return;
    }

    let mut heartbeat = tokio::time::interval(Duration::from_secs(15));
    loop {
        tokio::select! {
            _ = subscriber.wait_for_frame() => {
                while let Some(frame) = subscriber.try_pop() {
                    if sender.send(Message::Text(frame_payload(frame).into())).await.is_err() {
                        reader.abort();
                        return;
                    }
                }
            }
            _ = heartbeat.tick() => {
                let payload = serde_json::json!({ "kind": "heartbeat" }).to_string();
                if sender.send(Message::Text(payload.into())).await.is_err() {
                    reader.abort();
                    return;
                }
            }
        }
    }
}
