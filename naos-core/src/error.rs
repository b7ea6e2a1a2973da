//! Domain error types shared by every subsystem in this crate.
//!
//! Each subsystem gets its own `thiserror`-derived enum rather than one
//! grab-bag error, the same split the teacher keeps between `MediaError`
//! and the repository-specific error types under `database/ports`. The HTTP
//! layer in `naosd` maps these onto the error kinds from the API contract.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown operation `{0}`")]
    NotFound(String),
    #[error("argument validation failed: {0}")]
    Violation(String),
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("catalog rejected request: {0}")]
    Forbidden(String),
    #[error("execution exceeded its time budget")]
    Timeout,
    #[error("failed to spawn child process: {0}")]
    SpawnFail(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("pool `{0}` is not configured")]
    UnknownPool(String),
    #[error("dataset name `{0}` does not belong to a known pool")]
    InvalidDatasetName(String),
    #[error("snapshot name `{0}` does not match the required pattern")]
    InvalidSnapshotName(String),
    #[error("pool `{0}` already has a replace/resilver job in flight")]
    ReplaceInProgress(String),
    #[error("pool `{0}` has no replace/resilver job in flight")]
    NoReplaceInProgress(String),
    #[error("pool `{0}`'s replace job can no longer be cancelled")]
    ReplaceNotCancellable(String),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Exec(#[from] ExecError),
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert group `{0}` not found")]
    NotFound(uuid::Uuid),
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job `{0}` not found")]
    NotFound(uuid::Uuid),
    #[error("job `{0}` is already in a terminal state")]
    AlreadyTerminal(uuid::Uuid),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("session not found or expired")]
    Unauthenticated,
    #[error("role `{required}` required")]
    Forbidden { required: &'static str },
    #[error("password does not meet policy: {0}")]
    WeakPassword(String),
    #[error("incorrect current password")]
    BadCredentials,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("on-disk schema version {on_disk} is newer than the version this daemon knows ({known})")]
    SchemaTooNew { on_disk: i64, known: i64 },
}
