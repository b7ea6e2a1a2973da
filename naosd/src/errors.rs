//! The HTTP-facing error envelope: `{"success":false,"error":"…","kind":"…"}`
//! for every non-2xx response, per `spec.md` §7's error taxonomy. Domain
//! errors from `naos-core` are mapped onto one of these kinds at the edge;
//! nothing below the router needs to know about HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use naos_core::error::{AlertError, AuthError, CatalogError, ExecError, JobError, PersistenceError, StorageError};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadRequest,
    Unauthenticated,
    Forbidden,
    NotFound,
    Conflict,
    PasswordChangeRequired,
    RateLimited,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::PasswordChangeRequired => StatusCode::CONFLICT,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub correlation_id: Option<Uuid>,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), correlation_id: None }
    }

    pub fn with_correlation(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn unauthenticated() -> Self {
        Self::new(ErrorKind::Unauthenticated, "no, invalid, or expired session")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn password_change_required() -> Self {
        Self::new(ErrorKind::PasswordChangeRequired, "password change required before continuing")
    }

    pub fn rate_limited() -> Self {
        Self::new(ErrorKind::RateLimited, "rate limit exceeded")
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    kind: ErrorKind,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.kind == ErrorKind::Internal {
            error!(correlation_id = ?self.correlation_id, message = %self.message, "internal error");
        }
        let status = self.kind.status();
        let body = ErrorBody { success: false, error: self.message, kind: self.kind };
        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthenticated => AppError::unauthenticated(),
            AuthError::Forbidden { required } => AppError::forbidden(format!("role `{required}` required")),
            AuthError::WeakPassword(detail) => AppError::bad_request(detail),
            AuthError::BadCredentials => AppError::new(ErrorKind::Unauthenticated, "incorrect credentials"),
        }
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(op) => AppError::new(ErrorKind::NotFound, format!("unknown operation `{op}`")),
            CatalogError::Violation(detail) => AppError::forbidden(detail),
        }
    }
}

impl From<ExecError> for AppError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Forbidden(detail) => AppError::forbidden(detail),
            ExecError::Timeout => AppError::new(ErrorKind::Timeout, "executor exceeded its time budget"),
            ExecError::SpawnFail(detail) => AppError::new(ErrorKind::Internal, detail),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::UnknownPool(pool) => {
                AppError::new(ErrorKind::NotFound, format!("pool `{pool}` is not configured"))
            }
            StorageError::InvalidDatasetName(name) => AppError::bad_request(format!("invalid dataset name `{name}`")),
            StorageError::InvalidSnapshotName(name) => {
                AppError::bad_request(format!("invalid snapshot name `{name}`"))
            }
            StorageError::ReplaceInProgress(pool) => {
                AppError::new(ErrorKind::Conflict, format!("pool `{pool}` already has a replace job in flight"))
            }
            StorageError::NoReplaceInProgress(pool) => {
                AppError::new(ErrorKind::NotFound, format!("pool `{pool}` has no replace job in flight"))
            }
            StorageError::ReplaceNotCancellable(pool) => AppError::new(
                ErrorKind::Conflict,
                format!("pool `{pool}`'s replace job can no longer be cancelled"),
            ),
            StorageError::Catalog(inner) => inner.into(),
            StorageError::Exec(inner) => inner.into(),
        }
    }
}

impl From<AlertError> for AppError {
    fn from(err: AlertError) -> Self {
        match err {
            AlertError::NotFound(id) => AppError::new(ErrorKind::NotFound, format!("alert group `{id}` not found")),
        }
    }
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(id) => AppError::new(ErrorKind::NotFound, format!("job `{id}` not found")),
            JobError::AlreadyTerminal(id) => {
                AppError::new(ErrorKind::Conflict, format!("job `{id}` is already in a terminal state"))
            }
        }
    }
}

impl From<PersistenceError> for AppError {
    fn from(err: PersistenceError) -> Self {
        AppError::new(ErrorKind::Internal, err.to_string())
    }
}
