//! The optional `naos.toml` layer. Every field is optional so a file that
//! sets only one value leaves every other key to fall through to its
//! default, per the precedence order `lib.rs` resolves.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::ConfigError;

#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub db_path: Option<PathBuf>,
    pub listen_addr: Option<String>,
    pub smb_conf_path: Option<PathBuf>,
    pub log_filter: Option<String>,
    pub known_pools: Option<Vec<String>>,
    pub readiness_poll_interval_secs: Option<u64>,
    pub readiness_budget_secs: Option<u64>,
    pub heartbeat_interval_secs: Option<u64>,
    pub heartbeat_failure_threshold: Option<u32>,
    pub alert_throttle_window_secs: Option<u64>,
    pub alert_retention_days: Option<u64>,
    pub subscriber_queue_capacity: Option<usize>,
    pub rate_limit_rps: Option<u32>,
    pub rate_limit_burst: Option<u32>,
    pub route_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Returns defaults (all `None`) if `path` does not exist; otherwise
    /// parses it and surfaces read/parse errors.
    pub fn load_if_present(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                toml::from_str(&contents).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
            }
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read { path: path.to_path_buf(), source }),
        }
    }
}
