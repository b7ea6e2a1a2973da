//! The production [`PoolProbe`] the readiness gate polls at startup:
//! shells out to `zpool`/`zfs` directly rather than going through
//! [`naos_core::executor::Executor`], since the gate runs before the
//! catalog's concurrency bookkeeping has anywhere to report to and needs
//! an answer even if a pool's own dataset listing is what's hanging.

use std::process::Command;

use naos_core::storage::PoolProbe;
use tracing::warn;

pub struct SystemPoolProbe;

impl SystemPoolProbe {
    /// The raw `zpool list` health token, for heartbeat logging. `"UNKNOWN"`
    /// covers both a spawn failure and a nonexistent pool — the heartbeat
    /// loop only uses this for the event detail blob, never a decision.
    pub fn raw_health(&self, pool: &str) -> String {
        Command::new("/usr/sbin/zpool")
            .args(["list", "-H", "-o", "health", pool])
            .output()
            .ok()
            .filter(|output| output.status.success())
            .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_ascii_uppercase())
            .unwrap_or_else(|| "UNKNOWN".to_string())
    }
}

impl PoolProbe for SystemPoolProbe {
    fn is_imported_and_mounted(&self, pool: &str) -> bool {
        let output = match Command::new("/usr/sbin/zpool").args(["list", "-H", "-o", "health", pool]).output() {
            Ok(output) => output,
            Err(err) => {
                warn!(pool, %err, "failed to spawn zpool list while probing readiness");
                return false;
            }
        };
        if !output.status.success() {
            return false;
        }
        let health = String::from_utf8_lossy(&output.stdout).trim().to_ascii_uppercase();
        matches!(health.as_str(), "ONLINE" | "DEGRADED")
    }

    fn mount_point(&self, pool: &str) -> Option<String> {
        let output = Command::new("/usr/sbin/zfs").args(["list", "-H", "-o", "mountpoint", pool]).output().ok()?;
        if !output.status.success() {
            return None;
        }
        let mountpoint = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if mountpoint.is_empty() || mountpoint == "none" || mountpoint == "-" {
            None
        } else {
            Some(mountpoint)
        }
    }
}
