//! The static catalog table. This is the sole source of truth for what the
//! daemon may execute — every operation in [`crate::storage::ops`] and every
//! job kind in [`crate::jobs`] must resolve to an entry declared here.

use std::sync::OnceLock;
use std::time::Duration;

use super::{ArgSlot, CatalogEntry, ConcurrencyClass};

/// Root directory under which dataset/mount-point path arguments must
/// resolve. Overridable in tests; production wiring comes from
/// `naos-config::DaemonConfig::pool_root`.
pub const POOL_ROOT: &str = "/";

pub fn catalog() -> &'static [CatalogEntry] {
    static TABLE: OnceLock<Vec<CatalogEntry>> = OnceLock::new();
    TABLE
        .get_or_init(|| {
            vec![
                CatalogEntry {
                    id: "zpool.list",
                    program: "/usr/sbin/zpool",
                    args_schema: &[],
                    timeout: Duration::from_secs(10),
                    concurrency_class: ConcurrencyClass::ZfsRead,
                    json_output: true,
                },
                CatalogEntry {
                    id: "zfs.list-datasets",
                    program: "/usr/sbin/zfs",
                    args_schema: &[ArgSlot::Identifier { pattern: None }],
                    timeout: Duration::from_secs(10),
                    concurrency_class: ConcurrencyClass::ZfsRead,
                    json_output: true,
                },
                CatalogEntry {
                    id: "zfs.list-snapshots",
                    program: "/usr/sbin/zfs",
                    args_schema: &[ArgSlot::Identifier { pattern: None }],
                    timeout: Duration::from_secs(10),
                    concurrency_class: ConcurrencyClass::ZfsRead,
                    json_output: true,
                },
                CatalogEntry {
                    id: "zfs.create-dataset",
                    program: "/usr/sbin/zfs",
                    args_schema: &[
                        ArgSlot::Identifier {
                            pattern: Some(r"^[a-z][a-z0-9_-]{0,63}(/[a-z][a-z0-9_-]{0,63})*$"),
                        },
                        ArgSlot::OpaquePassthrough,
                    ],
                    timeout: Duration::from_secs(30),
                    concurrency_class: ConcurrencyClass::ZfsWrite,
                    json_output: false,
                },
                CatalogEntry {
                    id: "zfs.set-property",
                    program: "/usr/sbin/zfs",
                    args_schema: &[
                        ArgSlot::Identifier {
                            pattern: Some(r"^[a-z][a-z0-9_-]{0,63}(/[a-z][a-z0-9_-]{0,63})*$"),
                        },
                        ArgSlot::OpaquePassthrough,
                    ],
                    timeout: Duration::from_secs(15),
                    concurrency_class: ConcurrencyClass::ZfsWrite,
                    json_output: false,
                },
                CatalogEntry {
                    id: "zfs.snapshot",
                    program: "/usr/sbin/zfs",
                    args_schema: &[ArgSlot::Identifier {
                        pattern: Some(r"^[a-z][a-z0-9_-]{0,63}(/[a-z][a-z0-9_-]{0,63})*@[a-z0-9][a-z0-9_.-]{0,63}$"),
                    }],
                    timeout: Duration::from_secs(30),
                    concurrency_class: ConcurrencyClass::ZfsWrite,
                    json_output: false,
                },
                CatalogEntry {
                    id: "zfs.rollback",
                    program: "/usr/sbin/zfs",
                    args_schema: &[ArgSlot::Identifier {
                        pattern: Some(r"^[a-z][a-z0-9_-]{0,63}(/[a-z][a-z0-9_-]{0,63})*@[a-z0-9][a-z0-9_.-]{0,63}$"),
                    }],
                    timeout: Duration::from_secs(60),
                    concurrency_class: ConcurrencyClass::ZfsWrite,
                    json_output: false,
                },
                CatalogEntry {
                    id: "zfs.destroy-snapshot",
                    program: "/usr/sbin/zfs",
                    args_schema: &[ArgSlot::Identifier {
                        pattern: Some(r"^[a-z][a-z0-9_-]{0,63}(/[a-z][a-z0-9_-]{0,63})*@[a-z0-9][a-z0-9_.-]{0,63}$"),
                    }],
                    timeout: Duration::from_secs(30),
                    concurrency_class: ConcurrencyClass::ZfsWrite,
                    json_output: false,
                },
                CatalogEntry {
                    id: "zpool.scrub-start",
                    program: "/usr/sbin/zpool",
                    args_schema: &[ArgSlot::Identifier { pattern: None }],
                    timeout: Duration::from_secs(15),
                    concurrency_class: ConcurrencyClass::ZfsWrite,
                    json_output: false,
                },
                CatalogEntry {
                    id: "zpool.scrub-status",
                    program: "/usr/sbin/zpool",
                    args_schema: &[ArgSlot::Identifier { pattern: None }],
                    timeout: Duration::from_secs(10),
                    concurrency_class: ConcurrencyClass::ZfsRead,
                    json_output: true,
                },
                CatalogEntry {
                    id: "zpool.replace-device",
                    program: "/usr/sbin/zpool",
                    args_schema: &[
                        ArgSlot::Identifier { pattern: None },
                        ArgSlot::PathUnderRoot { root: "/dev" },
                        ArgSlot::PathUnderRoot { root: "/dev" },
                    ],
                    timeout: Duration::from_secs(30),
                    concurrency_class: ConcurrencyClass::ZfsWrite,
                    json_output: false,
                },
                CatalogEntry {
                    id: "zpool.resilver-progress",
                    program: "/usr/sbin/zpool",
                    args_schema: &[ArgSlot::Identifier { pattern: None }],
                    timeout: Duration::from_secs(10),
                    concurrency_class: ConcurrencyClass::ZfsRead,
                    json_output: true,
                },
                CatalogEntry {
                    id: "zpool.offline-device",
                    program: "/usr/sbin/zpool",
                    args_schema: &[
                        ArgSlot::Identifier { pattern: None },
                        ArgSlot::PathUnderRoot { root: "/dev" },
                    ],
                    timeout: Duration::from_secs(15),
                    concurrency_class: ConcurrencyClass::ZfsWrite,
                    json_output: false,
                },
                CatalogEntry {
                    id: "probe.write-test",
                    program: "/usr/bin/touch",
                    args_schema: &[ArgSlot::PathUnderRoot { root: "/" }],
                    timeout: Duration::from_secs(5),
                    concurrency_class: ConcurrencyClass::Probe,
                    json_output: false,
                },
                CatalogEntry {
                    id: "docker.ps",
                    program: "/usr/bin/docker",
                    args_schema: &[],
                    timeout: Duration::from_secs(10),
                    concurrency_class: ConcurrencyClass::ContainerRead,
                    json_output: true,
                },
                CatalogEntry {
                    id: "docker.restart",
                    program: "/usr/bin/docker",
                    args_schema: &[ArgSlot::Identifier { pattern: None }],
                    timeout: Duration::from_secs(30),
                    concurrency_class: ConcurrencyClass::ContainerWrite,
                    json_output: false,
                },
                CatalogEntry {
                    id: "smb.reload",
                    program: "/usr/bin/smbcontrol",
                    args_schema: &[ArgSlot::Enum(&["smbd", "nmbd"])],
                    timeout: Duration::from_secs(10),
                    concurrency_class: ConcurrencyClass::ShareWrite,
                    json_output: false,
                },
                CatalogEntry {
                    id: "smb.status",
                    program: "/usr/bin/smbstatus",
                    args_schema: &[],
                    timeout: Duration::from_secs(10),
                    concurrency_class: ConcurrencyClass::ShareRead,
                    json_output: true,
                },
                CatalogEntry {
                    id: "disk.smart-health",
                    program: "/usr/sbin/smartctl",
                    args_schema: &[ArgSlot::PathUnderRoot { root: "/dev" }],
                    timeout: Duration::from_secs(10),
                    concurrency_class: ConcurrencyClass::Probe,
                    json_output: true,
                },
                CatalogEntry {
                    id: "disk.list",
                    program: "/usr/bin/lsblk",
                    args_schema: &[],
                    timeout: Duration::from_secs(10),
                    concurrency_class: ConcurrencyClass::Probe,
                    json_output: true,
                },
            ]
        })
        .as_slice()
}
