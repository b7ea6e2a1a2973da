//! Per-pool liveness probe: a timer fires every 10 seconds, runs a quick
//! health read plus an atomic create-truncate-fsync-delete against a
//! designated probe file, and emits `pool_health_critical` after a
//! consecutive-failure threshold.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::warn;

use crate::events::{Event, EventBus, Severity as EventSeverity};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
const PROBE_FILE_NAME: &str = ".naos-heartbeat-probe";

#[derive(Debug, Clone, Default)]
pub struct HeartbeatState {
    pub consecutive_failures: u32,
    pub last_success: Option<chrono::DateTime<chrono::Utc>>,
}

/// Tracks heartbeat state for every pool the gate considers ready, and
/// raises a `pool_health_critical` event once a pool's failure streak
/// crosses the configured threshold.
pub struct Heartbeat {
    state: RwLock<HashMap<String, HeartbeatState>>,
    threshold: u32,
    events: Arc<EventBus>,
}

impl Heartbeat {
    pub fn new(events: Arc<EventBus>, threshold: u32) -> Self {
        Self { state: RwLock::new(HashMap::new()), threshold, events }
    }

    fn probe_write(mount_point: &str) -> bool {
        let path = Path::new(mount_point).join(PROBE_FILE_NAME);
        let result = (|| -> std::io::Result<()> {
            let mut f = OpenOptions::new().create(true).write(true).truncate(true).open(&path)?;
            f.sync_all()?;
            Ok(())
        })();
        let _ = std::fs::remove_file(&path);
        result.is_ok()
    }

    /// Runs one probe cycle for `pool` whose mount point is `mount_point`,
    /// and whose quick health read reported `health_ok`. Resets the failure
    /// count on success; increments and possibly alerts on failure.
    pub async fn probe_once(&self, pool: &str, mount_point: &str, health_ok: bool, last_health: &str) {
        let write_ok = Self::probe_write(mount_point);
        let ok = health_ok && write_ok;

        let mut state = self.state.write();
        let entry = state.entry(pool.to_string()).or_default();

        if ok {
            entry.consecutive_failures = 0;
            entry.last_success = Some(chrono::Utc::now());
            return;
        }

        entry.consecutive_failures += 1;
        let failures = entry.consecutive_failures;
        drop(state);

        if failures >= self.threshold {
            warn!(pool, failures, "pool heartbeat crossed failure threshold");
            self.events
                .publish(Event::new(
                    "pool_health_critical",
                    EventSeverity::Critical,
                    format!("pool {pool} failed {failures} consecutive heartbeats"),
                )
                .with_details(serde_json::json!({ "pool": pool, "last_health": last_health }))
                .with_group_key(format!("pool_health_critical_{pool}")))
                .await;
        }
    }

    pub fn snapshot(&self, pool: &str) -> HeartbeatState {
        self.state.read().get(pool).cloned().unwrap_or_default()
    }
}
