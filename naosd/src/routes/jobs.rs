//! `GET /api/jobs` and `GET /api/jobs/{id}` — polling surface for the job
//! registry, added per `SPEC_FULL.md` §6 (spec.md §4.7 names the route but
//! the contract table in §6 omitted it).

use axum::extract::{Path, State};
use axum::Json;
use naos_core::jobs::Job;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::errors::AppError;

pub async fn list(State(state): State<AppState>) -> Json<Vec<Job>> {
    Json(state.jobs.list())
}

pub async fn get(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Job>, AppError> {
    Ok(Json(state.jobs.get(id)?))
}
