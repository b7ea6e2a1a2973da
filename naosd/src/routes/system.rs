//! Daemon-wide status, the readiness gate's HTTP face (Scenario C), disk
//! listing, and the internal device-event ingress hot-plug callbacks use.

use axum::extract::State;
use axum::{Extension, Json};
use naos_core::auth::Session;
use naos_core::events::{Event, Severity};
use naos_core::storage::ReadinessStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::zfs::exec_response;
use crate::app_state::AppState;
use crate::errors::AppError;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub uptime_s: i64,
    pub ready: bool,
    pub version: &'static str,
}

pub async fn status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        uptime_s: state.uptime_seconds(),
        ready: state.readiness.is_ready(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn zfs_gate_status(State(state): State<AppState>) -> Json<ReadinessStatus> {
    Json(state.readiness.status())
}

pub async fn disks(State(state): State<AppState>, Extension(session): Extension<Session>) -> Result<Json<Value>, AppError> {
    exec_response(state.storage.list_disks(session.subject_id).await?)
}

/// Event kind/action pairs a host hot-plug callback reports. The category
/// strings match the live-push tokens in `spec.md` §6 so the event can be
/// republished onto the bus unchanged.
#[derive(Debug, Deserialize)]
pub struct DeviceEventRequest {
    pub action: String,
    pub device: String,
    #[serde(rename = "type")]
    pub device_type: String,
}

fn category_for_action(action: &str) -> &'static str {
    match action {
        "add" => "disk_added",
        "remove" => "disk_removed",
        "smart-change" => "disk_smart_changed",
        "usage-change" => "disk_usage_changed",
        _ => "zfs_event",
    }
}

pub async fn device_event(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<DeviceEventRequest>,
) -> Result<Json<Value>, AppError> {
    let category = category_for_action(&req.action);
    let event = Event::new(category, Severity::Info, format!("{} {} ({})", req.action, req.device, req.device_type))
        .with_details(serde_json::json!({ "device": req.device, "type": req.device_type }));
    state.events.publish(event).await;
    state
        .persistence
        .append_audit(Some(session.subject_id), "system.device-event", "ok", Uuid::now_v7(), None)
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}
