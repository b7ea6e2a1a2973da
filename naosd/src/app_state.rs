//! Shared application state threaded through every axum handler, mirroring
//! the teacher's `AppState` (`ferrex-server/src/main.rs`): one `Clone`-able
//! struct of `Arc`-wrapped subsystems, built once in `main` and handed to
//! `Router::with_state`.

use std::sync::Arc;

use dashmap::DashMap;
use naos_config::DaemonConfig;
use naos_core::alerts::AlertEngine;
use naos_core::catalog::Catalog;
use naos_core::events::EventBus;
use naos_core::executor::Executor;
use naos_core::jobs::JobRegistry;
use naos_core::persistence::PersistenceFacade;
use naos_core::storage::heartbeat::Heartbeat;
use naos_core::storage::{ReadinessToken, StorageOps};
use uuid::Uuid;

use crate::middleware::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<DaemonConfig>,
    pub persistence: PersistenceFacade,
    pub catalog: Catalog,
    pub executor: Arc<Executor>,
    pub storage: Arc<StorageOps>,
    pub readiness: ReadinessToken,
    pub heartbeat: Arc<Heartbeat>,
    pub events: Arc<EventBus>,
    /// Fed exclusively by the alert-feed task with events the alert engine
    /// has decided are push-worthy (`spec.md` §4.5's throttle/priority
    /// decision) — `/api/events` and `/ws/monitor` subscribe here, never to
    /// `events` directly, so a flood that collapses into one alert group
    /// also collapses into one live notification.
    pub live_feed: Arc<EventBus>,
    pub alerts: Arc<AlertEngine>,
    pub jobs: Arc<JobRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// Subscriber queues for `/api/events` and `/ws/monitor`, keyed by a
    /// per-connection id so the fan-out task can target one without
    /// iterating all of them.
    pub subscribers: Arc<DashMap<Uuid, Arc<naos_core::events::BoundedSubscriber>>>,
}

impl AppState {
    pub fn uptime_seconds(&self) -> i64 {
        (chrono::Utc::now() - self.started_at).num_seconds().max(0)
    }
}
