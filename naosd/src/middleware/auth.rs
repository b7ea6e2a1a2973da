//! Session lookup, the must-change-password gate, role checks, and CSRF
//! verification, composed as axum middleware layered onto route groups the
//! way the teacher stacks `auth_middleware` / `admin_middleware` in
//! `users/auth/middleware.rs`. `spec.md` §4.8 takes `X-Session-ID` as
//! canonical.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use futures::future::BoxFuture;
use naos_core::auth::{csrf_tokens_match, Role, Session};
use tracing::warn;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::errors::AppError;

pub const SESSION_HEADER: &str = "x-session-id";
pub const CSRF_HEADER: &str = "x-csrf-token";

fn session_token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()).map(|s| s.to_string())
}

/// Looks the session up, deletes it if expired (Testable Property 9), and
/// inserts a [`Session`] plus its CSRF token into request extensions for
/// downstream middleware and handlers.
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = session_token_from_headers(request.headers()).ok_or_else(AppError::unauthenticated)?;

    let row = state.persistence.find_session(&token).await?.ok_or_else(AppError::unauthenticated)?;

    let role = parse_role(&row.role);
    let session = Session {
        token: row.token.clone(),
        subject_id: row.user_id,
        role,
        created_at: row.created_at,
        expires_at: row.expires_at,
        must_change_password: row.must_change_password,
    };

    if session.is_expired(chrono::Utc::now()) {
        state.persistence.delete_session(&token).await?;
        return Err(AppError::unauthenticated());
    }

    request.extensions_mut().insert(session);
    request.extensions_mut().insert(CsrfToken(row.csrf_token));
    Ok(next.run(request).await)
}

#[derive(Debug, Clone)]
pub struct CsrfToken(pub String);

fn parse_role(raw: &str) -> Role {
    match raw {
        "admin" => Role::Admin,
        "user" => Role::User,
        _ => Role::Reader,
    }
}

/// Blocks every route but `change-password` and `logout` while the
/// session's must-change-password bit is set. Apply only to route groups
/// that are not one of those two exempt routes.
pub async fn enforce_password_change_gate(request: Request, next: Next) -> Result<Response, AppError> {
    let session = request.extensions().get::<Session>().cloned();
    if let Some(session) = session {
        if session.must_change_password {
            return Err(AppError::password_change_required());
        }
    }
    Ok(next.run(request).await)
}

/// Applied to route groups requiring at least `required`. Must run after
/// [`require_session`].
pub fn require_role(required: Role) -> impl Fn(Request, Next) -> BoxFuture<'static, Result<Response, AppError>> + Clone {
    move |request: Request, next: Next| {
        Box::pin(async move {
            let session = request.extensions().get::<Session>().cloned().ok_or_else(AppError::unauthenticated)?;
            if !session.role.satisfies(required) {
                return Err(AppError::forbidden(format!("role `{required:?}` required")));
            }
            Ok(next.run(request).await)
        })
    }
}

/// Applied to mutating route groups (POST/PUT/DELETE). Compares
/// `X-CSRF-Token` against the value bound to the session at login, in
/// constant time.
pub async fn require_csrf(request: Request, next: Next) -> Result<Response, AppError> {
    let expected = request.extensions().get::<CsrfToken>().cloned();
    let provided = request.headers().get(CSRF_HEADER).and_then(|v| v.to_str().ok()).map(|s| s.to_string());

    match (expected, provided) {
        (Some(expected), Some(provided)) if csrf_tokens_match(&expected.0, &provided) => Ok(next.run(request).await),
        _ => {
            warn!("csrf token missing or mismatched");
            Err(AppError::forbidden("csrf token missing or mismatched"))
        }
    }
}

/// Extracts the authenticated subject id for rate limiting / audit rows
/// once [`require_session`] has run.
pub fn subject_id(request: &Request) -> Option<Uuid> {
    request.extensions().get::<Session>().map(|s| s.subject_id)
}
