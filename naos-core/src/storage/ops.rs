//! Pool and dataset operations exposed to the HTTP layer, each mapping to
//! one or more catalog entries, plus the replace/resilver state machine
//! from `spec.md` §4.3.3.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::{ArgValue, Catalog};
use crate::error::StorageError;
use crate::executor::{ExecRequest, ExecResult, Executor};

use super::pool::{dataset_belongs_to_known_pool, is_well_formed_snapshot_name};

/// `idle -> offlining -> awaiting-new-device -> replacing -> resilvering ->
/// complete | failed | cancelled`, per `spec.md` §4.3.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceState {
    Idle,
    Offlining,
    AwaitingNewDevice,
    Replacing,
    Resilvering,
    Complete,
    Failed,
    Cancelled,
}

impl ReplaceState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ReplaceState::Complete | ReplaceState::Failed | ReplaceState::Cancelled)
    }

    /// A cancel request is only honored in `offlining` and
    /// `awaiting-new-device`.
    pub fn can_cancel(self) -> bool {
        matches!(self, ReplaceState::Offlining | ReplaceState::AwaitingNewDevice)
    }

    /// `idle -> offlining`, issued the moment the offline command is sent.
    fn begin_offline(self) -> Self {
        match self {
            ReplaceState::Idle => ReplaceState::Offlining,
            other => other,
        }
    }

    /// `offlining -> awaiting-new-device`, once the offline command reports
    /// success.
    fn confirm_offline(self) -> Self {
        match self {
            ReplaceState::Offlining => ReplaceState::AwaitingNewDevice,
            other => other,
        }
    }

    /// `awaiting-new-device -> replacing`, once a replacement device is
    /// selected and the replace command is issued.
    fn begin_replace(self) -> Self {
        match self {
            ReplaceState::AwaitingNewDevice => ReplaceState::Replacing,
            other => other,
        }
    }

    /// `replacing -> resilvering`, once the replace command succeeds and the
    /// host engine starts reporting resilver progress.
    fn begin_resilver(self) -> Self {
        match self {
            ReplaceState::Replacing => ReplaceState::Resilvering,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceJob {
    pub pool: String,
    pub old_device: String,
    pub new_device: Option<String>,
    pub state: ReplaceState,
    pub updated_at: DateTime<Utc>,
}

/// Executes the pool/dataset operations from `spec.md` §4.3.3 against the
/// executor + catalog, enforcing the name-pattern guards the spec requires
/// independent of catalog validation (catalog validation is about argv
/// safety; these checks are about domain-level intent, e.g. "does this
/// dataset actually belong to a pool we manage").
pub struct StorageOps {
    catalog: Catalog,
    executor: Arc<Executor>,
    known_pools: Vec<String>,
    /// One active-or-most-recent replace/resilver job per pool, keyed by
    /// pool name — a real zpool only runs one replace at a time per pool.
    /// Same `DashMap`-behind-a-narrow-API shape as [`crate::jobs::JobRegistry`].
    replace_jobs: Arc<DashMap<String, ReplaceJob>>,
}

impl StorageOps {
    pub fn new(catalog: Catalog, executor: Arc<Executor>, known_pools: Vec<String>) -> Self {
        Self { catalog, executor, known_pools, replace_jobs: Arc::new(DashMap::new()) }
    }

    fn transition_replace(&self, pool: &str, next: impl FnOnce(ReplaceState) -> ReplaceState) {
        if let Some(mut job) = self.replace_jobs.get_mut(pool) {
            job.state = next(job.state);
            job.updated_at = Utc::now();
        }
    }

    fn fail_replace(&self, pool: &str) {
        self.transition_replace(pool, |_| ReplaceState::Failed);
    }

    /// The current replace/resilver job for `pool`, if one has ever been
    /// started.
    pub fn replace_job(&self, pool: &str) -> Option<ReplaceJob> {
        self.replace_jobs.get(pool).map(|job| job.clone())
    }

    /// Honors a cancel request only in `offlining`/`awaiting-new-device`,
    /// per `spec.md` §4.3.3 — once the replace command has actually been
    /// issued there is a real zpool operation in flight that cancelling
    /// locally cannot undo.
    pub fn cancel_replace(&self, pool: &str) -> Result<ReplaceJob, StorageError> {
        let mut job = self
            .replace_jobs
            .get_mut(pool)
            .ok_or_else(|| StorageError::NoReplaceInProgress(pool.to_string()))?;
        if !job.state.can_cancel() {
            return Err(StorageError::ReplaceNotCancellable(pool.to_string()));
        }
        job.state = ReplaceState::Cancelled;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    /// Evicts terminal replace/resilver records older than
    /// [`REPLACE_JOB_RETENTION`], mirroring `AlertEngine::sweep_retention`'s
    /// shape. Returns the number of records removed.
    pub fn sweep_replace_jobs(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(REPLACE_JOB_RETENTION).unwrap_or(chrono::Duration::hours(24));
        let stale: Vec<String> = self
            .replace_jobs
            .iter()
            .filter(|entry| entry.value().state.is_terminal() && entry.value().updated_at < cutoff)
            .map(|entry| entry.key().clone())
            .collect();
        for pool in &stale {
            self.replace_jobs.remove(pool);
        }
        stale.len()
    }

    async fn run(&self, catalog_id: &str, args: Vec<ArgValue>, caller: Uuid) -> Result<ExecResult, StorageError> {
        let entry = self.catalog.resolve(catalog_id)?;
        let request = ExecRequest {
            catalog_id: catalog_id.to_string(),
            args,
            caller_subject: caller,
            correlation_id: Uuid::now_v7(),
        };
        Ok(self.executor.execute(entry, &request).await)
    }

    pub async fn list_pools(&self, caller: Uuid) -> Result<ExecResult, StorageError> {
        self.run("zpool.list", vec![], caller).await
    }

    pub async fn list_datasets(&self, pool: &str, caller: Uuid) -> Result<ExecResult, StorageError> {
        self.run("zfs.list-datasets", vec![ArgValue::Text(pool.to_string())], caller).await
    }

    pub async fn list_snapshots(&self, dataset: Option<&str>, caller: Uuid) -> Result<ExecResult, StorageError> {
        self.run(
            "zfs.list-snapshots",
            vec![ArgValue::Text(dataset.unwrap_or("").to_string())],
            caller,
        )
        .await
    }

    pub async fn create_dataset(&self, name: &str, props: &str, caller: Uuid) -> Result<ExecResult, StorageError> {
        if !dataset_belongs_to_known_pool(name, &self.known_pools) {
            return Err(StorageError::InvalidDatasetName(name.to_string()));
        }
        self.run(
            "zfs.create-dataset",
            vec![ArgValue::Text(name.to_string()), ArgValue::Text(props.to_string())],
            caller,
        )
        .await
    }

    pub async fn set_property(&self, dataset: &str, key: &str, value: &str, caller: Uuid) -> Result<ExecResult, StorageError> {
        if !dataset_belongs_to_known_pool(dataset, &self.known_pools) {
            return Err(StorageError::InvalidDatasetName(dataset.to_string()));
        }
        let prop = format!("{key}={value}");
        self.run(
            "zfs.set-property",
            vec![ArgValue::Text(dataset.to_string()), ArgValue::Text(prop)],
            caller,
        )
        .await
    }

    pub async fn snapshot(&self, dataset: &str, name: &str, caller: Uuid) -> Result<ExecResult, StorageError> {
        if !dataset_belongs_to_known_pool(dataset, &self.known_pools) {
            return Err(StorageError::InvalidDatasetName(dataset.to_string()));
        }
        let full = format!("{dataset}@{name}");
        self.run("zfs.snapshot", vec![ArgValue::Text(full)], caller).await
    }

    pub async fn rollback(&self, snapshot: &str, caller: Uuid) -> Result<ExecResult, StorageError> {
        if !is_well_formed_snapshot_name(snapshot, &self.known_pools) {
            return Err(StorageError::InvalidSnapshotName(snapshot.to_string()));
        }
        self.run("zfs.rollback", vec![ArgValue::Text(snapshot.to_string())], caller).await
    }

    pub async fn destroy_snapshot(&self, snapshot: &str, caller: Uuid) -> Result<ExecResult, StorageError> {
        if !is_well_formed_snapshot_name(snapshot, &self.known_pools) {
            return Err(StorageError::InvalidSnapshotName(snapshot.to_string()));
        }
        self.run("zfs.destroy-snapshot", vec![ArgValue::Text(snapshot.to_string())], caller).await
    }

    pub async fn scrub_start(&self, pool: &str, caller: Uuid) -> Result<ExecResult, StorageError> {
        self.run("zpool.scrub-start", vec![ArgValue::Text(pool.to_string())], caller).await
    }

    pub async fn scrub_status(&self, pool: &str, caller: Uuid) -> Result<ExecResult, StorageError> {
        self.run("zpool.scrub-status", vec![ArgValue::Text(pool.to_string())], caller).await
    }

    pub async fn resilver_progress(&self, pool: &str, caller: Uuid) -> Result<ExecResult, StorageError> {
        self.run("zpool.resilver-progress", vec![ArgValue::Text(pool.to_string())], caller).await
    }

    pub async fn offline_device(&self, pool: &str, device: &str, caller: Uuid) -> Result<ExecResult, StorageError> {
        self.run(
            "zpool.offline-device",
            vec![ArgValue::Text(pool.to_string()), ArgValue::Text(device.to_string())],
            caller,
        )
        .await
    }

    pub async fn list_disks(&self, caller: Uuid) -> Result<ExecResult, StorageError> {
        self.run("disk.list", vec![], caller).await
    }

    /// Drives the full replace/resilver state machine for one pool: offlines
    /// the old device, then — once that succeeds — issues the replace
    /// command with the new device and leaves the job in `resilvering`.
    /// Refuses to start a second replace against a pool that already has one
    /// in flight.
    pub async fn replace_device(
        &self,
        pool: &str,
        old: &str,
        new: &str,
        caller: Uuid,
    ) -> Result<ExecResult, StorageError> {
        if let Some(existing) = self.replace_jobs.get(pool) {
            if !existing.state.is_terminal() {
                return Err(StorageError::ReplaceInProgress(pool.to_string()));
            }
        }
        self.replace_jobs.insert(
            pool.to_string(),
            ReplaceJob {
                pool: pool.to_string(),
                old_device: old.to_string(),
                new_device: None,
                state: ReplaceState::Idle,
                updated_at: Utc::now(),
            },
        );
        self.transition_replace(pool, ReplaceState::begin_offline);

        let offline = self
            .run(
                "zpool.offline-device",
                vec![ArgValue::Text(pool.to_string()), ArgValue::Text(old.to_string())],
                caller,
            )
            .await?;
        if !matches!(offline, ExecResult::Exit { code: 0, .. }) {
            self.fail_replace(pool);
            return Ok(offline);
        }
        self.transition_replace(pool, ReplaceState::confirm_offline);

        self.transition_replace(pool, ReplaceState::begin_replace);
        if let Some(mut job) = self.replace_jobs.get_mut(pool) {
            job.new_device = Some(new.to_string());
        }

        let replaced = self
            .run(
                "zpool.replace-device",
                vec![
                    ArgValue::Text(pool.to_string()),
                    ArgValue::Text(old.to_string()),
                    ArgValue::Text(new.to_string()),
                ],
                caller,
            )
            .await?;
        if matches!(replaced, ExecResult::Exit { code: 0, .. }) {
            self.transition_replace(pool, ReplaceState::begin_resilver);
        } else {
            self.fail_replace(pool);
        }
        Ok(replaced)
    }
}

/// Terminal replace/resilver records are retained for 24 hours then
/// garbage-collected; this bound is used by the periodic sweep in the
/// daemon binary.
pub const REPLACE_JOB_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ArgSlot, CatalogEntry, ConcurrencyClass};

    #[test]
    fn cancel_only_honored_before_replacing() {
        assert!(ReplaceState::Offlining.can_cancel());
        assert!(ReplaceState::AwaitingNewDevice.can_cancel());
        assert!(!ReplaceState::Replacing.can_cancel());
        assert!(!ReplaceState::Resilvering.can_cancel());
    }

    #[test]
    fn state_chain_advances_one_step_at_a_time() {
        let mut state = ReplaceState::Idle;
        state = state.begin_offline();
        assert_eq!(state, ReplaceState::Offlining);
        state = state.confirm_offline();
        assert_eq!(state, ReplaceState::AwaitingNewDevice);
        state = state.begin_replace();
        assert_eq!(state, ReplaceState::Replacing);
        state = state.begin_resilver();
        assert_eq!(state, ReplaceState::Resilvering);
    }

    #[test]
    fn out_of_order_transitions_are_no_ops() {
        assert_eq!(ReplaceState::Idle.confirm_offline(), ReplaceState::Idle);
        assert_eq!(ReplaceState::Resilvering.begin_replace(), ReplaceState::Resilvering);
    }

    static TEST_CATALOG: &[CatalogEntry] = &[
        CatalogEntry {
            id: "zpool.offline-device",
            program: "/bin/echo",
            args_schema: &[ArgSlot::OpaquePassthrough, ArgSlot::OpaquePassthrough],
            timeout: Duration::from_secs(2),
            concurrency_class: ConcurrencyClass::ZfsWrite,
            json_output: false,
        },
        CatalogEntry {
            id: "zpool.replace-device",
            program: "/bin/echo",
            args_schema: &[ArgSlot::OpaquePassthrough, ArgSlot::OpaquePassthrough, ArgSlot::OpaquePassthrough],
            timeout: Duration::from_secs(2),
            concurrency_class: ConcurrencyClass::ZfsWrite,
            json_output: false,
        },
        CatalogEntry {
            id: "zfs.set-property",
            program: "/bin/echo",
            args_schema: &[ArgSlot::OpaquePassthrough, ArgSlot::OpaquePassthrough],
            timeout: Duration::from_secs(2),
            concurrency_class: ConcurrencyClass::ZfsWrite,
            json_output: false,
        },
    ];

    fn ops() -> StorageOps {
        let catalog = Catalog::from_entries(TEST_CATALOG);
        let executor = Arc::new(Executor::new(catalog));
        StorageOps::new(catalog, executor, vec!["tank".to_string()])
    }

    #[tokio::test]
    async fn replace_device_drives_the_job_to_resilvering() {
        let ops = ops();
        ops.replace_device("tank", "sda", "sdb", Uuid::nil()).await.unwrap();
        let job = ops.replace_job("tank").expect("job recorded");
        assert_eq!(job.state, ReplaceState::Resilvering);
        assert_eq!(job.new_device.as_deref(), Some("sdb"));
    }

    #[tokio::test]
    async fn second_replace_against_the_same_pool_is_rejected_while_one_is_in_flight() {
        let ops = ops();
        ops.replace_device("tank", "sda", "sdb", Uuid::nil()).await.unwrap();
        let second = ops.replace_device("tank", "sdc", "sdd", Uuid::nil()).await;
        assert!(matches!(second, Err(StorageError::ReplaceInProgress(_))));
    }

    #[tokio::test]
    async fn cancel_is_honored_only_before_replacing_starts() {
        let ops = ops();
        // No job yet — cancel on an unknown pool is rejected.
        assert!(matches!(ops.cancel_replace("tank"), Err(StorageError::NoReplaceInProgress(_))));

        ops.replace_jobs.insert(
            "tank".to_string(),
            ReplaceJob {
                pool: "tank".to_string(),
                old_device: "sda".to_string(),
                new_device: None,
                state: ReplaceState::AwaitingNewDevice,
                updated_at: Utc::now(),
            },
        );
        let cancelled = ops.cancel_replace("tank").unwrap();
        assert_eq!(cancelled.state, ReplaceState::Cancelled);

        ops.replace_jobs.insert(
            "tank".to_string(),
            ReplaceJob {
                pool: "tank".to_string(),
                old_device: "sda".to_string(),
                new_device: Some("sdb".to_string()),
                state: ReplaceState::Resilvering,
                updated_at: Utc::now(),
            },
        );
        assert!(matches!(ops.cancel_replace("tank"), Err(StorageError::ReplaceNotCancellable(_))));
    }

    #[tokio::test]
    async fn sweep_removes_only_stale_terminal_jobs() {
        let ops = ops();
        ops.replace_jobs.insert(
            "tank".to_string(),
            ReplaceJob {
                pool: "tank".to_string(),
                old_device: "sda".to_string(),
                new_device: Some("sdb".to_string()),
                state: ReplaceState::Complete,
                updated_at: Utc::now() - chrono::Duration::hours(25),
            },
        );
        ops.replace_jobs.insert(
            "backup".to_string(),
            ReplaceJob {
                pool: "backup".to_string(),
                old_device: "sde".to_string(),
                new_device: Some("sdf".to_string()),
                state: ReplaceState::Resilvering,
                updated_at: Utc::now() - chrono::Duration::hours(25),
            },
        );
        let removed = ops.sweep_replace_jobs();
        assert_eq!(removed, 1);
        assert!(ops.replace_job("tank").is_none());
        assert!(ops.replace_job("backup").is_some());
    }

    #[tokio::test]
    async fn set_property_formats_key_value_pair() {
        let ops = ops();
        let result = ops.set_property("tank/data", "compression", "lz4", Uuid::nil()).await.unwrap();
        match result {
            ExecResult::Exit { stdout, .. } => {
                assert!(String::from_utf8_lossy(&stdout).contains("compression=lz4"));
            }
            other => panic!("expected a successful exit, got {other:?}"),
        }
    }
}
