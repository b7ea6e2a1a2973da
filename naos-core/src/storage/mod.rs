//! The storage subsystem: pool/dataset/snapshot operations, the readiness
//! gate, the heartbeat prober, and the health taxonomy. See `spec.md` §4.3.

pub mod health;
pub mod heartbeat;
pub mod ops;
pub mod pool;
pub mod readiness;

pub use health::{DeviceHealth, PoolHealth, Severity};
pub use ops::{ReplaceJob, ReplaceState, StorageOps};
pub use pool::{Dataset, Pool, Snapshot};
pub use readiness::{PoolProbe, ReadinessGate, ReadinessStatus, ReadinessToken};
