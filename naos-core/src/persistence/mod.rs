//! Persistence facade: a thin typed accessor over the embedded relational
//! store. Grounded on the teacher's `PostgresDatabase::new` pool-construction
//! idiom (`ferrex-core/src/database/postgres.rs`), ported from
//! `PgPoolOptions`/`PgPool` onto `SqlitePoolOptions`/`SqlitePool` since the
//! store here is a single file plus its WAL sidecar, not a server. See
//! `spec.md` §4.9.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;
use uuid::Uuid;

use crate::error::PersistenceError;

/// The schema version this binary understands. The daemon refuses to start
/// if the on-disk `schema_version` row exceeds this.
pub const KNOWN_SCHEMA_VERSION: i64 = 1;

#[derive(Clone)]
pub struct PersistenceFacade {
    pool: SqlitePool,
    /// Serializes writes to the hot tables (alerts, sessions, audit) so a
    /// single writer holds the WAL at a time, per `spec.md` §4.9 and §5's
    /// "single writer per connection" requirement. Reads bypass this and
    /// run concurrently against the pool directly.
    writer: std::sync::Arc<AsyncMutex<()>>,
}

impl fmt::Debug for PersistenceFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceFacade")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

impl PersistenceFacade {
    /// Opens (creating if absent) the database at `path`, applies
    /// migrations, and refuses to proceed if the on-disk schema is newer
    /// than [`KNOWN_SCHEMA_VERSION`].
    pub async fn open(path: &Path) -> Result<Self, PersistenceError> {
        let connect_options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(PersistenceError::Sqlx)?
            .create_if_missing(true)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(connect_options)
            .await
            .map_err(PersistenceError::Sqlx)?;

        sqlx::migrate!("./migrations").run(&pool).await.map_err(PersistenceError::Migrate)?;

        let on_disk: i64 = sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_one(&pool)
            .await
            .map_err(PersistenceError::Sqlx)?;
        if on_disk > KNOWN_SCHEMA_VERSION {
            return Err(PersistenceError::SchemaTooNew { on_disk, known: KNOWN_SCHEMA_VERSION });
        }

        info!(schema_version = on_disk, "persistence facade opened");

        Ok(Self { pool, writer: std::sync::Arc::new(AsyncMutex::new(())) })
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, PersistenceError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(PersistenceError::Sqlx)?;
        sqlx::migrate!("./migrations").run(&pool).await.map_err(PersistenceError::Migrate)?;
        Ok(Self { pool, writer: std::sync::Arc::new(AsyncMutex::new(())) })
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRow>, PersistenceError> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(PersistenceError::Sqlx)
    }

    pub async fn find_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>, PersistenceError> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(PersistenceError::Sqlx)
    }

    pub async fn insert_user(&self, user: &UserRow) -> Result<(), PersistenceError> {
        let _guard = self.writer.lock().await;
        sqlx::query(
            "INSERT INTO users (id, username, password_hash, role, must_change_password, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(user.id.to_string())
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.role)
        .bind(user.must_change_password)
        .bind(user.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::Sqlx)?;
        Ok(())
    }

    pub async fn set_must_change_password(&self, user_id: Uuid, value: bool) -> Result<(), PersistenceError> {
        let _guard = self.writer.lock().await;
        sqlx::query("UPDATE users SET must_change_password = ? WHERE id = ?")
            .bind(value)
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(PersistenceError::Sqlx)?;
        Ok(())
    }

    pub async fn set_password_hash(&self, user_id: Uuid, hash: &str) -> Result<(), PersistenceError> {
        let _guard = self.writer.lock().await;
        sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(hash)
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(PersistenceError::Sqlx)?;
        Ok(())
    }

    /// Clears the must-change-password bit on the user row and on every
    /// session currently open for them, so the gate in `naosd`'s auth
    /// middleware (which reads the bit off the session row, not the user
    /// row) drops immediately rather than on next login.
    pub async fn clear_must_change_password(&self, user_id: Uuid) -> Result<(), PersistenceError> {
        let _guard = self.writer.lock().await;
        sqlx::query("UPDATE users SET must_change_password = 0 WHERE id = ?")
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(PersistenceError::Sqlx)?;
        sqlx::query("UPDATE sessions SET must_change_password = 0 WHERE user_id = ?")
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(PersistenceError::Sqlx)?;
        Ok(())
    }

    pub async fn insert_session(&self, session: &SessionRow) -> Result<(), PersistenceError> {
        let _guard = self.writer.lock().await;
        sqlx::query(
            "INSERT INTO sessions (token, user_id, role, csrf_token, must_change_password, created_at, expires_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.token)
        .bind(session.user_id.to_string())
        .bind(&session.role)
        .bind(&session.csrf_token)
        .bind(session.must_change_password)
        .bind(session.created_at.to_rfc3339())
        .bind(session.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::Sqlx)?;
        Ok(())
    }

    pub async fn find_session(&self, token: &str) -> Result<Option<SessionRow>, PersistenceError> {
        sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(PersistenceError::Sqlx)
    }

    /// Deletes `token` outright. Called both on explicit logout and when a
    /// lookup finds the session already expired (`spec.md` Testable
    /// Property 9).
    pub async fn delete_session(&self, token: &str) -> Result<(), PersistenceError> {
        let _guard = self.writer.lock().await;
        sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(PersistenceError::Sqlx)?;
        Ok(())
    }

    pub async fn upsert_alert(&self, alert: &AlertRow) -> Result<(), PersistenceError> {
        let _guard = self.writer.lock().await;
        sqlx::query(
            "INSERT INTO alerts (id, group_key, category, priority, title, first_seen, last_seen, \
             occurrence_count, acknowledged, acknowledged_by, dismissed, latest_details) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(group_key) DO UPDATE SET \
             priority = excluded.priority, last_seen = excluded.last_seen, \
             occurrence_count = excluded.occurrence_count, acknowledged = excluded.acknowledged, \
             acknowledged_by = excluded.acknowledged_by, dismissed = excluded.dismissed, \
             latest_details = excluded.latest_details",
        )
        .bind(alert.id.to_string())
        .bind(&alert.group_key)
        .bind(&alert.category)
        .bind(&alert.priority)
        .bind(&alert.title)
        .bind(alert.first_seen.to_rfc3339())
        .bind(alert.last_seen.to_rfc3339())
        .bind(alert.occurrence_count)
        .bind(alert.acknowledged)
        .bind(alert.acknowledged_by.map(|id| id.to_string()))
        .bind(alert.dismissed)
        .bind(alert.latest_details.as_ref().map(|v| v.to_string()))
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::Sqlx)?;
        Ok(())
    }

    pub async fn list_alerts(&self, include_dismissed: bool) -> Result<Vec<AlertRow>, PersistenceError> {
        let query = if include_dismissed {
            "SELECT * FROM alerts ORDER BY last_seen DESC"
        } else {
            "SELECT * FROM alerts WHERE dismissed = 0 ORDER BY last_seen DESC"
        };
        sqlx::query_as::<_, AlertRow>(query).fetch_all(&self.pool).await.map_err(PersistenceError::Sqlx)
    }

    /// Purges acknowledged-and-dismissed alerts older than `cutoff`. Backs
    /// the daily retention sweep described in `spec.md` §4.5.
    pub async fn sweep_alerts_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, PersistenceError> {
        let _guard = self.writer.lock().await;
        let result = sqlx::query(
            "DELETE FROM alerts WHERE acknowledged = 1 AND dismissed = 1 AND last_seen < ?",
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::Sqlx)?;
        Ok(result.rows_affected())
    }

    pub async fn record_metric(
        &self,
        pool: &str,
        health: &str,
        read_errors: i64,
        write_errors: i64,
        checksum_errors: i64,
    ) -> Result<(), PersistenceError> {
        let _guard = self.writer.lock().await;
        sqlx::query(
            "INSERT INTO metrics_history (pool, recorded_at, health, read_errors, write_errors, checksum_errors) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(pool)
        .bind(Utc::now().to_rfc3339())
        .bind(health)
        .bind(read_errors)
        .bind(write_errors)
        .bind(checksum_errors)
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::Sqlx)?;
        Ok(())
    }

    /// Append-only; order under the writer mutex is the audit log's
    /// ordering guarantee (`spec.md` §5).
    pub async fn append_audit(
        &self,
        subject_id: Option<Uuid>,
        route: &str,
        outcome: &str,
        correlation_id: Uuid,
        detail: Option<&Value>,
    ) -> Result<(), PersistenceError> {
        let _guard = self.writer.lock().await;
        sqlx::query(
            "INSERT INTO audit_log (occurred_at, subject_id, route, outcome, correlation_id, detail) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(subject_id.map(|id| id.to_string()))
        .bind(route)
        .bind(outcome)
        .bind(correlation_id.to_string())
        .bind(detail.map(|v| v.to_string()))
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::Sqlx)?;
        Ok(())
    }

    /// Most recent `limit` audit rows, newest first. Used by tests asserting
    /// Testable Property 10 (audit completeness); the daemon itself has no
    /// HTTP surface for reading this back, per `spec.md` §9's scoping of the
    /// audit log to an internal record.
    pub async fn recent_audit(&self, limit: i64) -> Result<Vec<AuditRow>, PersistenceError> {
        sqlx::query_as::<_, AuditRow>("SELECT * FROM audit_log ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(PersistenceError::Sqlx)
    }

    /// Reclaims free pages incrementally. Run hourly by a background task
    /// in the daemon binary, never inline on a request path.
    pub async fn incremental_vacuum(&self) -> Result<(), PersistenceError> {
        let _guard = self.writer.lock().await;
        sqlx::query("PRAGMA incremental_vacuum").execute(&self.pool).await.map_err(PersistenceError::Sqlx)?;
        Ok(())
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub must_change_password: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    pub token: String,
    pub user_id: Uuid,
    pub role: String,
    pub csrf_token: String,
    pub must_change_password: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AlertRow {
    pub id: Uuid,
    pub group_key: String,
    pub category: String,
    pub priority: String,
    pub title: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrence_count: i64,
    pub acknowledged: bool,
    pub acknowledged_by: Option<Uuid>,
    pub dismissed: bool,
    pub latest_details: Option<Value>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditRow {
    pub id: i64,
    pub occurred_at: DateTime<Utc>,
    pub subject_id: Option<Uuid>,
    pub route: String,
    pub outcome: String,
    pub correlation_id: Uuid,
    pub detail: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> UserRow {
        UserRow {
            id: Uuid::now_v7(),
            username: "admin".to_string(),
            password_hash: "argon2-hash-placeholder".to_string(),
            role: "admin".to_string(),
            must_change_password: true,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn user_round_trips_through_insert_and_find() {
        let facade = PersistenceFacade::open_in_memory().await.unwrap();
        let user = sample_user();
        facade.insert_user(&user).await.unwrap();
        let found = facade.find_user_by_username("admin").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(found.must_change_password);
    }

    #[tokio::test]
    async fn clearing_must_change_password_persists() {
        let facade = PersistenceFacade::open_in_memory().await.unwrap();
        let user = sample_user();
        facade.insert_user(&user).await.unwrap();
        facade.set_must_change_password(user.id, false).await.unwrap();
        let found = facade.find_user_by_username("admin").await.unwrap().unwrap();
        assert!(!found.must_change_password);
    }

    #[tokio::test]
    async fn clearing_must_change_password_also_clears_open_sessions() {
        let facade = PersistenceFacade::open_in_memory().await.unwrap();
        let user = sample_user();
        facade.insert_user(&user).await.unwrap();
        let session = SessionRow {
            token: "tok-gate".to_string(),
            user_id: user.id,
            role: "admin".to_string(),
            csrf_token: "csrf-gate".to_string(),
            must_change_password: true,
            created_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        };
        facade.insert_session(&session).await.unwrap();
        facade.clear_must_change_password(user.id).await.unwrap();
        let found = facade.find_session("tok-gate").await.unwrap().unwrap();
        assert!(!found.must_change_password);
    }

    #[tokio::test]
    async fn deleted_session_is_no_longer_found() {
        let facade = PersistenceFacade::open_in_memory().await.unwrap();
        let user = sample_user();
        facade.insert_user(&user).await.unwrap();
        let session = SessionRow {
            token: "tok123".to_string(),
            user_id: user.id,
            role: "admin".to_string(),
            csrf_token: "csrf123".to_string(),
            must_change_password: true,
            created_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        };
        facade.insert_session(&session).await.unwrap();
        assert!(facade.find_session("tok123").await.unwrap().is_some());
        facade.delete_session("tok123").await.unwrap();
        assert!(facade.find_session("tok123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn alert_upsert_is_idempotent_on_group_key() {
        let facade = PersistenceFacade::open_in_memory().await.unwrap();
        let mut alert = AlertRow {
            id: Uuid::now_v7(),
            group_key: "zfs_checksum::tank".to_string(),
            category: "zfs".to_string(),
            priority: "warning".to_string(),
            title: "checksum errors".to_string(),
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            occurrence_count: 1,
            acknowledged: false,
            acknowledged_by: None,
            dismissed: false,
            latest_details: None,
        };
        facade.upsert_alert(&alert).await.unwrap();
        alert.occurrence_count = 2;
        facade.upsert_alert(&alert).await.unwrap();
        let all = facade.list_alerts(true).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].occurrence_count, 2);
    }

    #[tokio::test]
    async fn retention_sweep_only_removes_ack_and_dismissed() {
        let facade = PersistenceFacade::open_in_memory().await.unwrap();
        let old = Utc::now() - chrono::Duration::days(40);
        let alert = AlertRow {
            id: Uuid::now_v7(),
            group_key: "old".to_string(),
            category: "zfs".to_string(),
            priority: "info".to_string(),
            title: "stale".to_string(),
            first_seen: old,
            last_seen: old,
            occurrence_count: 1,
            acknowledged: true,
            acknowledged_by: None,
            dismissed: true,
            latest_details: None,
        };
        facade.upsert_alert(&alert).await.unwrap();
        let removed = facade.sweep_alerts_older_than(Utc::now() - chrono::Duration::days(30)).await.unwrap();
        assert_eq!(removed, 1);
    }
}
