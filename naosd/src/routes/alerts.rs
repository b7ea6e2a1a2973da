//! Alert listing and the ack/dismiss actions, thin wrappers over
//! [`naos_core::alerts::AlertEngine`]'s in-memory index (Scenario B).

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use naos_core::alerts::{AlertFilter, AlertGroup};
use naos_core::auth::Session;
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::errors::AppError;

#[derive(Debug, Deserialize)]
pub struct ListAlertsQuery {
    pub category: Option<String>,
    pub group_key: Option<String>,
    #[serde(default)]
    pub include_dismissed: bool,
}

pub async fn list(State(state): State<AppState>, Query(q): Query<ListAlertsQuery>) -> Json<Vec<AlertGroup>> {
    let filter = AlertFilter { category: q.category, group_key: q.group_key, include_dismissed: q.include_dismissed };
    Json(state.alerts.list(&filter))
}

pub async fn ack(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<Uuid>,
) -> Result<Json<AlertGroup>, AppError> {
    Ok(Json(state.alerts.acknowledge(id, session.subject_id)?))
}

pub async fn dismiss(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<AlertGroup>, AppError> {
    Ok(Json(state.alerts.dismiss(id)?))
}
