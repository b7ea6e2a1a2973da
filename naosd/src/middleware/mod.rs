pub mod auth;
pub mod rate_limit;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use naos_core::auth::Role;

use crate::app_state::AppState;
use crate::errors::AppError;

/// Convenience re-exports for route composition.
pub use auth::{enforce_password_change_gate, require_csrf, require_role, require_session};

/// Applies the token bucket keyed by (subject, route). Must run after
/// [`require_session`] so a `Session` extension is present; `route` is a
/// `&'static str` baked in at route-registration time via
/// [`crate::middleware::for_route`].
pub async fn enforce_rate_limit(
    State(state): State<AppState>,
    route: &'static str,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let subject = auth::subject_id(&request).unwrap_or_default();
    let key = rate_limit::RateLimitKey { subject, route };
    if !state.rate_limiter.check(key) {
        return Err(AppError::rate_limited());
    }
    Ok(next.run(request).await)
}

/// Binds a route name to [`enforce_rate_limit`] so each protected route can
/// carry its own bucket key without threading the name through extensions.
pub fn for_route(
    route: &'static str,
) -> impl Fn(
    State<AppState>,
    Request,
    Next,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, AppError>> + Send>>
       + Clone {
    move |state, request, next| Box::pin(enforce_rate_limit(state, route, request, next))
}

pub fn reader() -> Role {
    Role::Reader
}

pub fn user() -> Role {
    Role::User
}

pub fn admin() -> Role {
    Role::Admin
}
