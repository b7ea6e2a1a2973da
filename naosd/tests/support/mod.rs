//! Shared integration-test scaffolding. Builds a full [`AppState`] and
//! router against a temporary, file-backed SQLite database, mirroring the
//! shape of the teacher's `tests/support/mod.rs` `build_test_app` helper —
//! adapted from a Postgres pool handed in by `#[sqlx::test]` to a
//! `tempfile`-backed SQLite file, since `PersistenceFacade::open_in_memory`
//! is only reachable from naos-core's own unit tests, not from here.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use dashmap::DashMap;
use naos_config::resolve_defaults_for_dir;
use naos_core::alerts::AlertEngine;
use naos_core::auth::{self, Role, Session};
use naos_core::catalog::{ArgSlot, Catalog, CatalogEntry, ConcurrencyClass};
use naos_core::events;
use naos_core::executor::Executor;
use naos_core::jobs::JobRegistry;
use naos_core::persistence::{PersistenceFacade, SessionRow, UserRow};
use naos_core::storage::heartbeat::Heartbeat;
use naos_core::storage::{PoolProbe, ReadinessGate, StorageOps};
use naosd::app_state::AppState;
use naosd::middleware::rate_limit::RateLimiter;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;
use uuid::Uuid;

/// One entry per production operation id, each backed by `/bin/echo` rather
/// than a real `zpool`/`zfs`/`lsblk` binary — the same substitution
/// naos-core's own executor tests make for `zfs`/`zpool` (`ECHO_ENTRY`/
/// `SLEEP_ENTRY`), so the exec path runs for real without depending on host
/// storage tooling being present wherever these tests run.
static TEST_CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        id: "zpool.list",
        program: "/bin/echo",
        args_schema: &[],
        timeout: Duration::from_secs(5),
        concurrency_class: ConcurrencyClass::ZfsRead,
        json_output: false,
    },
    CatalogEntry {
        id: "zfs.list-datasets",
        program: "/bin/echo",
        args_schema: &[ArgSlot::OpaquePassthrough],
        timeout: Duration::from_secs(5),
        concurrency_class: ConcurrencyClass::ZfsRead,
        json_output: false,
    },
    CatalogEntry {
        id: "zfs.list-snapshots",
        program: "/bin/echo",
        args_schema: &[ArgSlot::OpaquePassthrough],
        timeout: Duration::from_secs(5),
        concurrency_class: ConcurrencyClass::ZfsRead,
        json_output: false,
    },
    CatalogEntry {
        id: "zfs.create-dataset",
        program: "/bin/echo",
        args_schema: &[ArgSlot::OpaquePassthrough, ArgSlot::OpaquePassthrough],
        timeout: Duration::from_secs(5),
        concurrency_class: ConcurrencyClass::ZfsWrite,
        json_output: false,
    },
    CatalogEntry {
        id: "zfs.set-property",
        program: "/bin/echo",
        args_schema: &[ArgSlot::OpaquePassthrough, ArgSlot::OpaquePassthrough],
        timeout: Duration::from_secs(5),
        concurrency_class: ConcurrencyClass::ZfsWrite,
        json_output: false,
    },
    CatalogEntry {
        id: "zfs.snapshot",
        program: "/bin/echo",
        args_schema: &[ArgSlot::OpaquePassthrough],
        timeout: Duration::from_secs(5),
        concurrency_class: ConcurrencyClass::ZfsWrite,
        json_output: false,
    },
    CatalogEntry {
        id: "zfs.rollback",
        program: "/bin/echo",
        args_schema: &[ArgSlot::OpaquePassthrough],
        timeout: Duration::from_secs(5),
        concurrency_class: ConcurrencyClass::ZfsWrite,
        json_output: false,
    },
    CatalogEntry {
        id: "zfs.destroy-snapshot",
        program: "/bin/echo",
        args_schema: &[ArgSlot::OpaquePassthrough],
        timeout: Duration::from_secs(5),
        concurrency_class: ConcurrencyClass::ZfsWrite,
        json_output: false,
    },
    CatalogEntry {
        id: "zpool.scrub-start",
        program: "/bin/echo",
        args_schema: &[ArgSlot::OpaquePassthrough],
        timeout: Duration::from_secs(5),
        concurrency_class: ConcurrencyClass::ZfsWrite,
        json_output: false,
    },
    CatalogEntry {
        id: "zpool.scrub-status",
        program: "/bin/echo",
        args_schema: &[ArgSlot::OpaquePassthrough],
        timeout: Duration::from_secs(5),
        concurrency_class: ConcurrencyClass::ZfsRead,
        json_output: false,
    },
    CatalogEntry {
        id: "zpool.resilver-progress",
        program: "/bin/echo",
        args_schema: &[ArgSlot::OpaquePassthrough],
        timeout: Duration::from_secs(5),
        concurrency_class: ConcurrencyClass::ZfsRead,
        json_output: false,
    },
    CatalogEntry {
        id: "zpool.offline-device",
        program: "/bin/echo",
        args_schema: &[ArgSlot::OpaquePassthrough, ArgSlot::OpaquePassthrough],
        timeout: Duration::from_secs(5),
        concurrency_class: ConcurrencyClass::ZfsWrite,
        json_output: false,
    },
    CatalogEntry {
        id: "zpool.replace-device",
        program: "/bin/echo",
        args_schema: &[ArgSlot::OpaquePassthrough, ArgSlot::OpaquePassthrough, ArgSlot::OpaquePassthrough],
        timeout: Duration::from_secs(5),
        concurrency_class: ConcurrencyClass::ZfsWrite,
        json_output: false,
    },
    CatalogEntry {
        id: "disk.list",
        program: "/bin/echo",
        args_schema: &[],
        timeout: Duration::from_secs(5),
        concurrency_class: ConcurrencyClass::Probe,
        json_output: false,
    },
];

/// Reports every configured pool as imported, mounted, and writable. Tests
/// exercising the gate's blocked state drive [`AppState::readiness`]'s
/// token directly rather than depending on real `zpool`/`zfs` availability.
struct AlwaysReadyProbe;

impl PoolProbe for AlwaysReadyProbe {
    fn is_imported_and_mounted(&self, _pool: &str) -> bool {
        true
    }

    fn mount_point(&self, _pool: &str) -> Option<String> {
        Some("/tmp".to_string())
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    _tempdir: TempDir,
}

#[derive(Clone)]
pub struct SeededUser {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::Admin => "admin",
        Role::User => "user",
        Role::Reader => "reader",
    }
}

impl TestApp {
    /// Mints a session + CSRF token pair for `user` directly against the
    /// persistence layer, standing in for a prior `/api/auth/login` call so
    /// route tests don't have to round-trip through it every time.
    pub async fn login_as(&self, user: &SeededUser) -> Result<(String, String)> {
        let row = self
            .state
            .persistence
            .find_user_by_id(user.id)
            .await?
            .context("seeded user not found")?;
        let session = Session::new(row.id, user.role, row.must_change_password);
        let csrf_token = auth::generate_csrf_token();
        self.state
            .persistence
            .insert_session(&SessionRow {
                token: session.token.clone(),
                user_id: row.id,
                role: role_str(user.role).to_string(),
                csrf_token: csrf_token.clone(),
                must_change_password: row.must_change_password,
                created_at: session.created_at,
                expires_at: session.expires_at,
            })
            .await?;
        Ok((session.token, csrf_token))
    }

    /// Inserts a user with a freshly hashed password for tests to log in as.
    pub async fn seed_user(&self, username: &str, password: &str, role: Role, must_change_password: bool) -> Result<SeededUser> {
        let id = Uuid::now_v7();
        let hash = auth::hash_password(password).map_err(|err| anyhow::anyhow!("failed to hash password: {err}"))?;
        self.state
            .persistence
            .insert_user(&UserRow {
                id,
                username: username.to_string(),
                password_hash: hash,
                role: role_str(role).to_string(),
                must_change_password,
                created_at: chrono::Utc::now(),
            })
            .await?;
        Ok(SeededUser { id, username: username.to_string(), role })
    }
}

async fn build(config_dir: &std::path::Path, known_pools: &[&str], tempdir: TempDir) -> Result<TestApp> {
    if !known_pools.is_empty() {
        let list = known_pools.iter().map(|p| format!("\"{p}\"")).collect::<Vec<_>>().join(", ");
        std::fs::write(config_dir.join("naos.toml"), format!("known_pools = [{list}]\n"))
            .context("failed to write test naos.toml")?;
    }
    let config = Arc::new(resolve_defaults_for_dir(config_dir).context("failed to resolve default daemon configuration")?);

    let db_path = config_dir.join("naosd-test.db");
    let persistence = PersistenceFacade::open(&db_path).await.context("failed to open test database")?;

    let catalog = Catalog::from_entries(TEST_CATALOG);
    let executor = Arc::new(Executor::new(catalog));
    let storage = Arc::new(StorageOps::new(catalog, executor.clone(), config.known_pools.clone()));

    let event_bus = events::shared(256);
    let live_feed = events::shared(256);
    let alerts = Arc::new(AlertEngine::new(config.alert_throttle_window));
    let jobs = Arc::new(JobRegistry::new());
    let heartbeat = Arc::new(Heartbeat::new(event_bus.clone(), config.heartbeat_failure_threshold));
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_rps, config.rate_limit_burst));

    let readiness_gate = ReadinessGate::new(AlwaysReadyProbe, config.known_pools.clone(), config_dir.join(".naos-ready"));
    let readiness = readiness_gate.token();
    readiness_gate.reevaluate();

    let state = AppState {
        config,
        persistence,
        catalog,
        executor,
        storage,
        readiness,
        heartbeat,
        events: event_bus,
        live_feed,
        alerts,
        jobs,
        rate_limiter,
        started_at: chrono::Utc::now(),
        subscribers: Arc::new(DashMap::new()),
    };

    let router = naosd::routes::create_app(state.clone());

    Ok(TestApp { router, state, _tempdir: tempdir })
}

pub async fn build_test_app() -> Result<TestApp> {
    let tempdir = tempfile::tempdir().context("failed to create temporary directory")?;
    let config_dir = tempdir.path().to_path_buf();
    build(&config_dir, &[], tempdir).await
}

/// As [`build_test_app`], but with `known_pools` configured, for tests that
/// need `dataset_belongs_to_known_pool`/`is_well_formed_snapshot_name` to
/// actually accept a name.
pub async fn build_test_app_with_pools(known_pools: &[&str]) -> Result<TestApp> {
    let tempdir = tempfile::tempdir().context("failed to create temporary directory")?;
    let config_dir = tempdir.path().to_path_buf();
    build(&config_dir, known_pools, tempdir).await
}

/// A [`PoolProbe`] a test can flip from unmounted to mounted mid-run, for
/// exercising the readiness gate's transition (Scenario C) rather than just
/// its always-ready steady state.
#[derive(Clone)]
pub struct ToggleProbe {
    mounted: Arc<AtomicBool>,
    mount_dir: std::path::PathBuf,
}

impl ToggleProbe {
    pub fn set_mounted(&self, mounted: bool) {
        self.mounted.store(mounted, Ordering::SeqCst);
    }
}

impl PoolProbe for ToggleProbe {
    fn is_imported_and_mounted(&self, _pool: &str) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    fn mount_point(&self, _pool: &str) -> Option<String> {
        Some(self.mount_dir.to_string_lossy().to_string())
    }
}

/// As [`build_test_app_with_pools`], but wires the readiness gate to a
/// [`ToggleProbe`] the test drives directly, and hands back the gate so the
/// test can call `reevaluate()` after flipping it — mirroring how `main.rs`
/// re-checks readiness "on every pool event" rather than only at startup.
pub async fn build_test_app_with_toggle_probe(
    known_pools: &[&str],
) -> Result<(TestApp, ReadinessGate<ToggleProbe>, ToggleProbe)> {
    let tempdir = tempfile::tempdir().context("failed to create temporary directory")?;
    let config_dir = tempdir.path().to_path_buf();
    if !known_pools.is_empty() {
        let list = known_pools.iter().map(|p| format!("\"{p}\"")).collect::<Vec<_>>().join(", ");
        std::fs::write(config_dir.join("naos.toml"), format!("known_pools = [{list}]\n"))
            .context("failed to write test naos.toml")?;
    }
    let config = Arc::new(resolve_defaults_for_dir(&config_dir).context("failed to resolve default daemon configuration")?);

    let db_path = config_dir.join("naosd-test.db");
    let persistence = PersistenceFacade::open(&db_path).await.context("failed to open test database")?;

    let catalog = Catalog::from_entries(TEST_CATALOG);
    let executor = Arc::new(Executor::new(catalog));
    let storage = Arc::new(StorageOps::new(catalog, executor.clone(), config.known_pools.clone()));

    let event_bus = events::shared(256);
    let live_feed = events::shared(256);
    let alerts = Arc::new(AlertEngine::new(config.alert_throttle_window));
    let jobs = Arc::new(JobRegistry::new());
    let heartbeat = Arc::new(Heartbeat::new(event_bus.clone(), config.heartbeat_failure_threshold));
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_rps, config.rate_limit_burst));

    let probe = ToggleProbe { mounted: Arc::new(AtomicBool::new(false)), mount_dir: config_dir.clone() };
    let readiness_gate = ReadinessGate::new(probe.clone(), config.known_pools.clone(), config_dir.join(".naos-ready"));
    let readiness = readiness_gate.token();
    readiness_gate.reevaluate();

    let state = AppState {
        config,
        persistence,
        catalog,
        executor,
        storage,
        readiness,
        heartbeat,
        events: event_bus,
        live_feed,
        alerts,
        jobs,
        rate_limiter,
        started_at: chrono::Utc::now(),
        subscribers: Arc::new(DashMap::new()),
    };

    let router = naosd::routes::create_app(state.clone());
    let app = TestApp { router, state, _tempdir: tempdir };

    Ok((app, readiness_gate, probe))
}
