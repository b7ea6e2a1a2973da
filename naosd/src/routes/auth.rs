//! Login, logout, session check, and password change. Grounded on the
//! teacher's `users/auth/handlers.rs` (`register`/`login`/`logout` shape),
//! ported from JWT issuance onto `naos_core::auth`'s session-row model.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::{Extension, Json};
use naos_core::auth::{self, Role, Session};
use naos_core::persistence::SessionRow;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::errors::{AppError, ErrorKind};
use crate::middleware::auth::SESSION_HEADER;

fn role_from_str(raw: &str) -> Role {
    match raw {
        "admin" => Role::Admin,
        "user" => Role::User,
        _ => Role::Reader,
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub session_id: String,
    pub must_change_password: bool,
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    if req.username.trim().is_empty() || req.password.is_empty() {
        return Err(AppError::bad_request("username and password are required"));
    }

    let user = state
        .persistence
        .find_user_by_username(req.username.trim())
        .await?
        .ok_or_else(|| AppError::new(ErrorKind::Unauthenticated, "incorrect credentials"))?;

    auth::verify_password(&req.password, &user.password_hash)
        .map_err(|_| AppError::new(ErrorKind::Unauthenticated, "incorrect credentials"))?;

    let role = role_from_str(&user.role);
    let session = Session::new(user.id, role, user.must_change_password);
    let csrf_token = auth::generate_csrf_token();

    state
        .persistence
        .insert_session(&SessionRow {
            token: session.token.clone(),
            user_id: user.id,
            role: user.role.clone(),
            csrf_token,
            must_change_password: user.must_change_password,
            created_at: session.created_at,
            expires_at: session.expires_at,
        })
        .await?;

    Ok(Json(LoginResponse {
        success: true,
        session_id: session.token,
        must_change_password: user.must_change_password,
    }))
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>, AppError> {
    if let Some(token) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
        state.persistence.delete_session(token).await?;
    }
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<CheckUser>,
}

#[derive(Debug, Serialize)]
pub struct CheckUser {
    pub subject_id: Uuid,
    pub role: Role,
    pub must_change_password: bool,
}

/// Never authenticated (no session header, unknown token, expired token)
/// returns `200` with `authenticated: false` rather than an error; a bare
/// identity probe isn't itself subject to the auth guard.
pub async fn check(State(state): State<AppState>, headers: HeaderMap) -> Json<CheckResponse> {
    let absent = Json(CheckResponse { authenticated: false, user: None });

    let Some(token) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) else {
        return absent;
    };
    let Ok(Some(row)) = state.persistence.find_session(token).await else {
        return absent;
    };
    if row.expires_at <= chrono::Utc::now() {
        let _ = state.persistence.delete_session(token).await;
        return absent;
    }

    Json(CheckResponse {
        authenticated: true,
        user: Some(CheckUser {
            subject_id: row.user_id,
            role: role_from_str(&row.role),
            must_change_password: row.must_change_password,
        }),
    })
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<Value>, AppError> {
    let user = state
        .persistence
        .find_user_by_id(session.subject_id)
        .await?
        .ok_or_else(AppError::unauthenticated)?;

    auth::verify_password(&req.current_password, &user.password_hash)
        .map_err(|_| AppError::bad_request("incorrect current password"))?;
    auth::validate_password_policy(&req.new_password)?;

    let hash = auth::hash_password(&req.new_password)?;
    state.persistence.set_password_hash(user.id, &hash).await?;
    state.persistence.clear_must_change_password(user.id).await?;

    Ok(Json(json!({ "success": true })))
}
