//! Pool, dataset and snapshot entities. See `spec.md` §3 for the invariants
//! these carry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::health::PoolHealth;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub name: String,
    pub health: PoolHealth,
    pub mount_points: Vec<String>,
    pub last_probe: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub pool_name: String,
    pub path: String,
    pub mount_point: Option<String>,
    pub quota_bytes: Option<u64>,
    pub properties: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub dataset_path: String,
    pub short_name: String,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn fully_qualified_name(&self) -> String {
        format!("{}@{}", self.dataset_path, self.short_name)
    }
}

/// Validates that `name` begins with one of the configured pool prefixes,
/// per `spec.md` §4.3.3's `create-dataset` refusal rule.
pub fn dataset_belongs_to_known_pool(name: &str, known_pools: &[String]) -> bool {
    known_pools
        .iter()
        .any(|pool| name == pool || name.starts_with(&format!("{pool}/")))
}

/// The conservative `pool-prefix@short-name` pattern required for
/// `rollback`/`destroy-snapshot` targets (`spec.md` §4.3.3).
pub fn is_well_formed_snapshot_name(name: &str, known_pools: &[String]) -> bool {
    let Some((dataset, short)) = name.split_once('@') else {
        return false;
    };
    if short.is_empty() || !short.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-') {
        return false;
    }
    dataset_belongs_to_known_pool(dataset, known_pools)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_must_begin_with_known_pool() {
        let pools = vec!["tank".to_string()];
        assert!(dataset_belongs_to_known_pool("tank/data", &pools));
        assert!(!dataset_belongs_to_known_pool("evil/data", &pools));
        assert!(!dataset_belongs_to_known_pool("tankish/data", &pools));
    }

    #[test]
    fn snapshot_name_pattern_is_conservative() {
        let pools = vec!["tank".to_string()];
        assert!(is_well_formed_snapshot_name("tank/data@s1", &pools));
        assert!(!is_well_formed_snapshot_name("tank/data@s1; rm -rf /", &pools));
        assert!(!is_well_formed_snapshot_name("tank/data", &pools));
    }
}
