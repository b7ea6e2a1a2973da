//! Pool/device health taxonomy: projects an engine's free-form status text
//! onto the canonical set the rest of the daemon reasons about.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolHealth {
    Online,
    Degraded,
    Faulted,
    Unavail,
    Unknown,
}

impl PoolHealth {
    /// Maps the engine's raw health token (`ONLINE`, `DEGRADED`, ...) onto
    /// the canonical taxonomy. Anything unrecognized is `Unknown` rather
    /// than an error — an engine we don't fully understand yet should never
    /// crash the daemon, only surface as a cautious state.
    pub fn from_engine_token(token: &str) -> Self {
        match token.trim().to_ascii_uppercase().as_str() {
            "ONLINE" => PoolHealth::Online,
            "DEGRADED" => PoolHealth::Degraded,
            "FAULTED" => PoolHealth::Faulted,
            "UNAVAIL" | "REMOVED" | "OFFLINE" => PoolHealth::Unavail,
            _ => PoolHealth::Unknown,
        }
    }

    pub fn is_usable(self) -> bool {
        matches!(self, PoolHealth::Online | PoolHealth::Degraded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Device-level error counters, surfaced verbatim but classified per
/// `spec.md` §4.3.4: any non-zero checksum counter is at least `warning`;
/// any faulted device is `critical`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceHealth {
    pub device_path: String,
    pub read_errors: u64,
    pub write_errors: u64,
    pub checksum_errors: u64,
    pub faulted: bool,
}

impl DeviceHealth {
    pub fn classify(&self) -> Severity {
        if self.faulted {
            Severity::Critical
        } else if self.checksum_errors > 0 {
            Severity::Warning
        } else {
            Severity::Info
        }
    }
}
