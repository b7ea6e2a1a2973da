//! Layered configuration for the NAS control-plane daemon: CLI flags (each
//! with an `env` fallback, mirroring the teacher's `ferrex-server::Args`)
//! override an optional `<config-dir>/naos.toml`, which overrides
//! hard-coded defaults. The result is one immutable [`DaemonConfig`] built
//! once at startup and threaded through every constructor — there is no
//! process-wide mutable configuration state.

mod defaults;
mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

pub use defaults::*;
pub use file::FileConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, #[source] source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, #[source] source: toml::de::Error },
}

/// Command-line flags, each of which can also be supplied via its `env`
/// variable. Grounded on `ferrex-server::Args`' flat `clap::Parser` shape.
#[derive(Debug, Parser)]
#[command(name = "naosd", about = "NAS control-plane daemon")]
pub struct Args {
    /// Path to the SQLite database file.
    #[arg(long = "db", env = "NAOSD_DB")]
    pub db: Option<PathBuf>,

    /// Loopback address and port to listen on, e.g. 127.0.0.1:8443.
    #[arg(long = "listen", env = "NAOSD_LISTEN")]
    pub listen: Option<String>,

    /// Directory containing naos.toml and related configuration files.
    #[arg(long = "config-dir", env = "NAOSD_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Path to the Samba configuration file this daemon manages reloads for.
    #[arg(long = "smb-conf", env = "NAOSD_SMB_CONF")]
    pub smb_conf: Option<PathBuf>,

    /// Log level filter, e.g. info, naosd=debug,tower_http=info.
    #[arg(long = "log-level", env = "NAOSD_LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// The fully resolved, immutable configuration the daemon binary threads
/// through every constructor. See `naos-config`'s module docs for the
/// layering order.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub db_path: PathBuf,
    pub listen_addr: String,
    pub config_dir: PathBuf,
    pub smb_conf_path: PathBuf,
    pub log_filter: String,
    pub known_pools: Vec<String>,
    pub readiness_poll_interval: Duration,
    pub readiness_budget: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_failure_threshold: u32,
    pub alert_throttle_window: Duration,
    pub alert_retention: Duration,
    pub subscriber_queue_capacity: usize,
    pub rate_limit_rps: u32,
    pub rate_limit_burst: u32,
    pub route_timeout: Duration,
}

impl DaemonConfig {
    /// Resolves CLI flags, an optional `naos.toml` in `args.config_dir`
    /// (defaulting to [`DEFAULT_CONFIG_DIR`]), and hard-coded defaults into
    /// one value.
    pub fn resolve(args: Args) -> Result<Self, ConfigError> {
        let config_dir = args.config_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR));
        let file_path = config_dir.join("naos.toml");
        let file = FileConfig::load_if_present(&file_path)?;

        Ok(Self {
            db_path: args.db.or(file.db_path).unwrap_or_else(|| config_dir.join(DEFAULT_DB_FILE_NAME)),
            listen_addr: args.listen.or(file.listen_addr).unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            smb_conf_path: args
                .smb_conf
                .or(file.smb_conf_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SMB_CONF_PATH)),
            log_filter: args.log_level.or(file.log_filter).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            known_pools: file.known_pools.unwrap_or_default(),
            readiness_poll_interval: file
                .readiness_poll_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_READINESS_POLL_INTERVAL),
            readiness_budget: file
                .readiness_budget_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_READINESS_BUDGET),
            heartbeat_interval: file
                .heartbeat_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL),
            heartbeat_failure_threshold: file
                .heartbeat_failure_threshold
                .unwrap_or(DEFAULT_HEARTBEAT_FAILURE_THRESHOLD),
            alert_throttle_window: file
                .alert_throttle_window_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_ALERT_THROTTLE_WINDOW),
            alert_retention: file
                .alert_retention_days
                .map(|d| Duration::from_secs(d * 86_400))
                .unwrap_or(DEFAULT_ALERT_RETENTION),
            subscriber_queue_capacity: file
                .subscriber_queue_capacity
                .unwrap_or(DEFAULT_SUBSCRIBER_QUEUE_CAPACITY),
            rate_limit_rps: file.rate_limit_rps.unwrap_or(DEFAULT_RATE_LIMIT_RPS),
            rate_limit_burst: file.rate_limit_burst.unwrap_or(DEFAULT_RATE_LIMIT_BURST),
            route_timeout: file.route_timeout_secs.map(Duration::from_secs).unwrap_or(DEFAULT_ROUTE_TIMEOUT),
            config_dir,
        })
    }
}

/// Test-only convenience: resolve defaults with no CLI flags and no file.
pub fn resolve_defaults_for_dir(config_dir: &Path) -> Result<DaemonConfig, ConfigError> {
    DaemonConfig::resolve(Args {
        db: None,
        listen: None,
        config_dir: Some(config_dir.to_path_buf()),
        smb_conf: None,
        log_level: None,
    })
}
