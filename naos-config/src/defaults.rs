//! Hard-coded defaults, the lowest-precedence layer. Values match the
//! figures spec.md states explicitly rather than ones picked here.

use std::time::Duration;

pub const DEFAULT_CONFIG_DIR: &str = "/etc/naos";
pub const DEFAULT_DB_FILE_NAME: &str = "naos.db";
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8443";
pub const DEFAULT_SMB_CONF_PATH: &str = "/etc/samba/smb.conf";
pub const DEFAULT_LOG_FILTER: &str = "info";

pub const DEFAULT_READINESS_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_READINESS_BUDGET: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_HEARTBEAT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_ALERT_THROTTLE_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_ALERT_RETENTION: Duration = Duration::from_secs(30 * 86_400);
pub const DEFAULT_SUBSCRIBER_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_RATE_LIMIT_RPS: u32 = 10;
pub const DEFAULT_RATE_LIMIT_BURST: u32 = 20;
pub const DEFAULT_ROUTE_TIMEOUT: Duration = Duration::from_secs(30);
