//! Small bootstrapper binary: writes a default `naos.toml` into a config
//! directory if one does not already exist. Mirrors `ferrex-config`'s
//! `ferrex-init` role, scaled down — packaging, TLS provisioning, and
//! container orchestration are explicitly out of scope here (spec.md's
//! Non-goals exclude the installer).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const TEMPLATE: &str = r#"# naos.toml — generated by naos-init.
# Every key is optional; omitted keys fall back to compiled-in defaults.

known_pools = []

# readiness_poll_interval_secs = 2
# readiness_budget_secs = 300
# heartbeat_interval_secs = 10
# heartbeat_failure_threshold = 3
# alert_throttle_window_secs = 60
# alert_retention_days = 30
# subscriber_queue_capacity = 256
# rate_limit_rps = 10
# rate_limit_burst = 20
# route_timeout_secs = 30
"#;

#[derive(Parser)]
#[command(name = "naos-init", about = "Write a default naos.toml")]
struct Cli {
    /// Directory to write naos.toml into.
    #[arg(long, default_value = "/etc/naos")]
    config_dir: PathBuf,

    /// Overwrite an existing naos.toml.
    #[arg(long)]
    force: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new("info"))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let path = cli.config_dir.join("naos.toml");

    if path.exists() && !cli.force {
        tracing::info!(path = %path.display(), "naos.toml already exists, leaving it in place (pass --force to overwrite)");
        return Ok(());
    }

    std::fs::create_dir_all(&cli.config_dir)
        .with_context(|| format!("failed to create config directory {}", cli.config_dir.display()))?;
    std::fs::write(&path, TEMPLATE).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "wrote default configuration");
    Ok(())
}
