//! Core domain crate for the NAS control-plane daemon: the command
//! catalog, the sandboxed executor, storage subsystem (pools, datasets,
//! snapshots, readiness, heartbeat), the internal event bus, the alert
//! engine, the job registry, session/auth domain types, and the SQLite
//! persistence facade. `naosd` composes these into an HTTP service;
//! `naos-config` resolves the configuration that wires them together.

pub mod alerts;
pub mod auth;
pub mod catalog;
pub mod error;
pub mod events;
pub mod executor;
pub mod jobs;
pub mod persistence;
pub mod storage;
