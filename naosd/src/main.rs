//! The NAS control-plane daemon binary: resolves configuration, opens the
//! SQLite store, bootstraps the storage/auth/alert/job subsystems, and
//! serves the HTTP API. Structured the way the teacher's `main.rs` does —
//! one `main`, a `create_app` builder, a handful of spawned background
//! loops — adapted from a media server's scan/transcode workers to this
//! daemon's readiness, heartbeat, alert-feed, and retention loops.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dashmap::DashMap;
use naos_config::{Args, DaemonConfig};
use naos_core::alerts::AlertEngine;
use naos_core::catalog::Catalog;
use naos_core::events;
use naos_core::executor::Executor;
use naos_core::jobs::JobRegistry;
use naos_core::persistence::PersistenceFacade;
use naos_core::storage::heartbeat::Heartbeat;
use naos_core::storage::{ReadinessGate, StorageOps};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use naosd::app_state::AppState;
use naosd::middleware::rate_limit::RateLimiter;
use naosd::system_probe::SystemPoolProbe;
use naosd::routes;

const READY_MARKER_FILE: &str = ".naos-ready";

/// Process exit codes, per the daemon's documented contract: 0 normal
/// exit, 1 configuration error, 2 persistence-layer error, 3 listener
/// bind failure.
#[repr(u8)]
enum ExitReason {
    Ok = 0,
    Config = 1,
    Persistence = 2,
    BindFailure = 3,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match DaemonConfig::resolve(args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(ExitReason::Config as u8);
        }
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_filter.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(listen = %config.listen_addr, db = %config.db_path.display(), "naosd configuration resolved");

    let persistence = match PersistenceFacade::open(&config.db_path).await {
        Ok(facade) => facade,
        Err(err) => {
            error!(%err, "failed to open persistence layer");
            return ExitCode::from(ExitReason::Persistence as u8);
        }
    };

    let config = Arc::new(config);
    let catalog = Catalog::production();
    let executor = Arc::new(Executor::new(catalog));
    let storage = Arc::new(StorageOps::new(catalog, executor.clone(), config.known_pools.clone()));
    // Capacity sized well above the per-subscriber queue cap so a lagging
    // alert-feed or live-push subscriber never forces the bus itself to
    // drop events other subscribers would still want.
    let event_bus = events::shared(1024);
    // Capacity matches the subscriber queue default; this bus only ever
    // carries events the alert engine has already cleared for push.
    let live_feed = events::shared(1024);
    let alerts = Arc::new(AlertEngine::new(config.alert_throttle_window));
    let jobs = Arc::new(JobRegistry::new());
    let heartbeat = Arc::new(Heartbeat::new(event_bus.clone(), config.heartbeat_failure_threshold));
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_rps, config.rate_limit_burst));

    let readiness_gate = ReadinessGate::new(
        SystemPoolProbe,
        config.known_pools.clone(),
        config.config_dir.join(READY_MARKER_FILE),
    );
    let readiness = readiness_gate.token();
    tokio::spawn(async move {
        readiness_gate.run_until_ready_or_timeout().await;
    });

    naosd::live_push::spawn_alert_feed(event_bus.clone(), live_feed.clone(), alerts.clone());
    spawn_heartbeat_loop(heartbeat.clone(), readiness.clone(), config.clone());
    spawn_retention_sweep(persistence.clone(), alerts.clone(), config.alert_retention);
    spawn_replace_job_sweep(storage.clone());
    spawn_vacuum_loop(persistence.clone());

    let state = AppState {
        config: config.clone(),
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

    let app = routes::create_app(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(tower::timeout::TimeoutLayer::new(config.route_timeout));

    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(addr = %config.listen_addr, %err, "failed to bind listen address");
            return ExitCode::from(ExitReason::BindFailure as u8);
        }
    };
    info!(addr = %config.listen_addr, "naosd listening");

    let result = axum::serve(listener, app.into_make_service()).with_graceful_shutdown(shutdown_signal()).await;

    if let Err(err) = result {
        error!(%err, "server exited with an error");
        return ExitCode::FAILURE;
    }

    ExitCode::from(ExitReason::Ok as u8)
}

/// Waits for Ctrl-C or SIGTERM. `axum::serve`'s graceful shutdown stops
/// accepting new connections on return and waits for in-flight requests to
/// drain before this function's caller observes `serve` completing.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining in-flight requests");
}

/// Polls every configured pool's health and mount-point writability once
/// the readiness gate has cleared it, per `spec.md` §4.3.4.
fn spawn_heartbeat_loop(heartbeat: Arc<Heartbeat>, readiness: naos_core::storage::ReadinessToken, config: Arc<DaemonConfig>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.heartbeat_interval);
        let probe = SystemPoolProbe;
        loop {
            interval.tick().await;
            if !readiness.is_ready() {
                continue;
            }
            for pool in &config.known_pools {
                let Some(mount_point) = probe.mount_point(pool) else {
                    heartbeat.probe_once(pool, "", false, "UNKNOWN").await;
                    continue;
                };
                let health_ok = probe.is_imported_and_mounted(pool);
                let last_health = probe.raw_health(pool);
                heartbeat.probe_once(pool, &mount_point, health_ok, &last_health).await;
            }
        }
    });
}

/// Daily alert retention sweep against both the in-memory index and the
/// durable `alerts` table, per `spec.md` §4.5/§4.9.
fn spawn_retention_sweep(persistence: PersistenceFacade, alerts: Arc<AlertEngine>, retention: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(86_400));
        loop {
            interval.tick().await;
            let removed_in_memory = alerts.sweep_retention();
            let cutoff = chrono::Utc::now() - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::days(30));
            match persistence.sweep_alerts_older_than(cutoff).await {
                Ok(removed) => info!(removed_in_memory, removed, "alert retention sweep completed"),
                Err(err) => warn!(%err, "alert retention sweep against the durable store failed"),
            }
        }
    });
}

/// Sweeps terminal replace/resilver jobs older than
/// [`naos_core::storage::ops::REPLACE_JOB_RETENTION`], per `spec.md`
/// §4.3.3's "terminal states persist for 24 hours then are
/// garbage-collected" — same daily cadence as `spawn_retention_sweep`.
fn spawn_replace_job_sweep(storage: Arc<StorageOps>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(86_400));
        loop {
            interval.tick().await;
            let removed = storage.sweep_replace_jobs();
            info!(removed, "replace job retention sweep completed");
        }
    });
}

/// Hourly incremental vacuum, keeping the SQLite file from growing
/// unbounded as sessions, audit rows, and alert history churn.
fn spawn_vacuum_loop(persistence: PersistenceFacade) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3_600));
        loop {
            interval.tick().await;
            if let Err(err) = persistence.incremental_vacuum().await {
                warn!(%err, "incremental vacuum failed");
            }
        }
    });
}
