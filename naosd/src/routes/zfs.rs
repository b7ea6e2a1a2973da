//! Pool/dataset/snapshot endpoints, each thinly wrapping one
//! [`naos_core::storage::StorageOps`] call and appending exactly one audit
//! row per call regardless of outcome (Testable Property 10, Scenario E).

use axum::extract::{Query, State};
use axum::{Extension, Json};
use naos_core::auth::Session;
use naos_core::error::StorageError;
use naos_core::executor::ExecResult;
use naos_core::storage::ReplaceJob;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::errors::{AppError, ErrorKind};

pub(crate) fn exec_response(result: ExecResult) -> Result<Json<Value>, AppError> {
    match result {
        ExecResult::Exit { code: 0, stdout, .. } => {
            let value: Value = serde_json::from_slice(&stdout)
                .unwrap_or_else(|_| serde_json::json!({ "success": true, "output": String::from_utf8_lossy(&stdout) }));
            Ok(Json(value))
        }
        ExecResult::Exit { code, stderr, .. } => Err(AppError::new(
            ErrorKind::Conflict,
            format!("command exited with code {code}: {}", truncate(&String::from_utf8_lossy(&stderr))),
        )),
        ExecResult::Timeout { .. } => Err(AppError::new(ErrorKind::Timeout, "executor exceeded its time budget")),
        ExecResult::SpawnFail { message } => Err(AppError::new(ErrorKind::Internal, message)),
        ExecResult::Forbidden { violations } => Err(AppError::forbidden(violations.join("; "))),
    }
}

/// Captured stderr is surfaced to clients but bounded, per `spec.md` §7.
fn truncate(s: &str) -> String {
    const MAX: usize = 2048;
    if s.len() > MAX {
        format!("{}…", &s[..MAX])
    } else {
        s.trim().to_string()
    }
}

fn outcome_of(result: &Result<ExecResult, StorageError>) -> &'static str {
    match result {
        Ok(exec_result) => exec_result.kind(),
        Err(StorageError::Exec(naos_core::error::ExecError::Forbidden(_))) => "forbidden",
        Err(_) => "rejected",
    }
}

async fn audited(
    state: &AppState,
    route: &str,
    subject: Option<Uuid>,
    detail: Value,
    result: Result<ExecResult, StorageError>,
) -> Result<Json<Value>, AppError> {
    let correlation_id = Uuid::now_v7();
    let outcome = outcome_of(&result);
    state.persistence.append_audit(subject, route, outcome, correlation_id, Some(&detail)).await?;
    exec_response(result?)
}

pub async fn list_pools(State(state): State<AppState>, Extension(session): Extension<Session>) -> Result<Json<Value>, AppError> {
    exec_response(state.storage.list_pools(session.subject_id).await?)
}

#[derive(Debug, Deserialize)]
pub struct DatasetsQuery {
    pub pool: Option<String>,
}

pub async fn list_datasets(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(q): Query<DatasetsQuery>,
) -> Result<Json<Value>, AppError> {
    let pool = q.pool.as_deref().unwrap_or("");
    exec_response(state.storage.list_datasets(pool, session.subject_id).await?)
}

#[derive(Debug, Deserialize)]
pub struct SnapshotsQuery {
    pub dataset: Option<String>,
}

pub async fn list_snapshots(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(q): Query<SnapshotsQuery>,
) -> Result<Json<Value>, AppError> {
    exec_response(state.storage.list_snapshots(q.dataset.as_deref(), session.subject_id).await?)
}

#[derive(Debug, Deserialize)]
pub struct CreateDatasetRequest {
    pub name: String,
    #[serde(default)]
    pub properties: String,
}

pub async fn create_dataset(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<CreateDatasetRequest>,
) -> Result<Json<Value>, AppError> {
    let detail = serde_json::json!({ "name": req.name, "properties": req.properties });
    let result = state.storage.create_dataset(&req.name, &req.properties, session.subject_id).await;
    audited(&state, "zfs.create-dataset", Some(session.subject_id), detail, result).await
}

#[derive(Debug, Deserialize)]
pub struct SnapshotRequest {
    pub dataset: String,
    pub name: String,
}

pub async fn create_snapshot(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<SnapshotRequest>,
) -> Result<Json<Value>, AppError> {
    let detail = serde_json::json!({ "dataset": req.dataset, "name": req.name });
    let result = state.storage.snapshot(&req.dataset, &req.name, session.subject_id).await;
    audited(&state, "zfs.snapshot", Some(session.subject_id), detail, result).await
}

#[derive(Debug, Deserialize)]
pub struct SnapshotTargetRequest {
    pub snapshot: String,
}

pub async fn destroy_snapshot(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<SnapshotTargetRequest>,
) -> Result<Json<Value>, AppError> {
    let detail = serde_json::json!({ "snapshot": req.snapshot });
    let result = state.storage.destroy_snapshot(&req.snapshot, session.subject_id).await;
    audited(&state, "zfs.destroy-snapshot", Some(session.subject_id), detail, result).await
}

pub async fn rollback_snapshot(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<SnapshotTargetRequest>,
) -> Result<Json<Value>, AppError> {
    let detail = serde_json::json!({ "snapshot": req.snapshot });
    let result = state.storage.rollback(&req.snapshot, session.subject_id).await;
    audited(&state, "zfs.rollback", Some(session.subject_id), detail, result).await
}

#[derive(Debug, Deserialize)]
pub struct ScrubRequest {
    pub pool: String,
}

#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub job_id: Uuid,
}

/// Starts a scrub and registers a job so progress can be polled
/// independently of this request, per `spec.md` §4.7.
pub async fn start_scrub(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<ScrubRequest>,
) -> Result<Json<JobAccepted>, AppError> {
    let detail = serde_json::json!({ "pool": req.pool });
    let result = state.storage.scrub_start(&req.pool, session.subject_id).await;
    let outcome = outcome_of(&result);
    state
        .persistence
        .append_audit(Some(session.subject_id), "zpool.scrub-start", outcome, Uuid::now_v7(), Some(&detail))
        .await?;
    result?;
    let job = state.jobs.create(naos_core::jobs::JobKind::Scrub, req.pool);
    Ok(Json(JobAccepted { job_id: job.id }))
}

#[derive(Debug, Deserialize)]
pub struct ReplaceDeviceRequest {
    pub pool: String,
    pub old_device: String,
    pub new_device: String,
}

pub async fn replace_device(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<ReplaceDeviceRequest>,
) -> Result<Json<JobAccepted>, AppError> {
    let detail = serde_json::json!({
        "pool": req.pool, "old_device": req.old_device, "new_device": req.new_device,
    });
    let result = state.storage.replace_device(&req.pool, &req.old_device, &req.new_device, session.subject_id).await;
    let outcome = outcome_of(&result);
    state
        .persistence
        .append_audit(Some(session.subject_id), "zpool.replace-device", outcome, Uuid::now_v7(), Some(&detail))
        .await?;
    result?;
    let job = state.jobs.create(naos_core::jobs::JobKind::Replace, req.pool);
    Ok(Json(JobAccepted { job_id: job.id }))
}

#[derive(Debug, Deserialize)]
pub struct SetPropertyRequest {
    pub dataset: String,
    pub key: String,
    pub value: String,
}

pub async fn set_property(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<SetPropertyRequest>,
) -> Result<Json<Value>, AppError> {
    let detail = serde_json::json!({ "dataset": req.dataset, "key": req.key, "value": req.value });
    let result = state.storage.set_property(&req.dataset, &req.key, &req.value, session.subject_id).await;
    audited(&state, "zfs.set-property", Some(session.subject_id), detail, result).await
}

#[derive(Debug, Deserialize)]
pub struct PoolQuery {
    pub pool: String,
}

pub async fn scrub_status(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(q): Query<PoolQuery>,
) -> Result<Json<Value>, AppError> {
    exec_response(state.storage.scrub_status(&q.pool, session.subject_id).await?)
}

/// Reports the raw `zpool` resilver-progress read alongside the replace job
/// tracked for that pool, if any — the only place a client can see the
/// `offlining`/`awaiting-new-device`/`replacing`/`resilvering` state
/// alongside the engine's own progress text.
pub async fn resilver_progress(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(q): Query<PoolQuery>,
) -> Result<Json<Value>, AppError> {
    let Json(mut body) = exec_response(state.storage.resilver_progress(&q.pool, session.subject_id).await?)?;
    if let Some(job) = state.storage.replace_job(&q.pool) {
        if let Value::Object(map) = &mut body {
            map.insert("replace_job".to_string(), serde_json::to_value(&job).unwrap_or(Value::Null));
        }
    }
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct ReplaceCancelRequest {
    pub pool: String,
}

/// Honored only in `offlining`/`awaiting-new-device`; rejected with a
/// conflict once the replace command has actually been issued.
pub async fn cancel_replace(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<ReplaceCancelRequest>,
) -> Result<Json<ReplaceJob>, AppError> {
    let detail = serde_json::json!({ "pool": req.pool });
    let outcome_result = state.storage.cancel_replace(&req.pool);
    let outcome = match &outcome_result {
        Ok(_) => "cancelled",
        Err(_) => "rejected",
    };
    state
        .persistence
        .append_audit(Some(session.subject_id), "zpool.replace-cancel", outcome, Uuid::now_v7(), Some(&detail))
        .await?;
    Ok(Json(outcome_result?))
}
