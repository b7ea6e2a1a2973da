//! Route composition, mirroring the teacher's `routes/mod.rs` +
//! `routes/v1.rs` split: `create_app` merges a handful of fully-built
//! sub-routers, each carrying its OWN complete `route_layer` stack applied
//! before it is merged — same shape as the teacher's `create_protected_routes`
//! / `create_admin_routes`, which are each self-contained and only merged
//! (never re-layered) into `create_v1_router`. `route_layer` calls run in
//! the order they are chained against an incoming request — first-added
//! runs first — confirmed by the teacher's own doc comment on
//! `admin_middleware`: "This middleware must be run AFTER auth_middleware
//! in the layer stack", and indeed `auth_middleware`'s `route_layer` call
//! precedes `admin_middleware`'s in `create_admin_routes`. Every stack built
//! here follows the same rule: `require_session` is always the first
//! `route_layer` call, since everything after it reads extensions it sets.

pub mod alerts;
pub mod auth;
pub mod events;
pub mod health;
pub mod jobs;
pub mod system;
pub mod ws;
pub mod zfs;

use axum::routing::{delete, get, post};
use axum::{middleware, Router};
use naos_core::auth::Role;

use crate::app_state::AppState;
use crate::middleware as mw;

/// Public endpoints: no session required. `check` is deliberately public —
/// it reports `authenticated: false` rather than erroring so a client can
/// probe for a live session without first holding one (`spec.md` §4.8).
fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/check", get(auth::check))
}

/// Session required but not yet gated on the must-change-password bit —
/// the two routes a user needs to be able to reach while carrying that bit
/// (`spec.md` §4.8: "every route except `change-password` and `logout`").
fn session_exempt_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/change-password", post(auth::change_password))
        .route_layer(middleware::from_fn_with_state(state, mw::require_session))
        .route_layer(middleware::from_fn(mw::require_csrf))
}

/// Applies the full stack a protected read route needs, in the order each
/// layer must run: session lookup, the password-change block, then the
/// role floor.
fn protected_read(router: Router<AppState>, state: AppState, role: Role) -> Router<AppState> {
    router
        .route_layer(middleware::from_fn_with_state(state, mw::require_session))
        .route_layer(middleware::from_fn(mw::enforce_password_change_gate))
        .route_layer(middleware::from_fn(mw::require_role(role)))
}

/// As [`protected_read`], plus CSRF verification and a per-route rate
/// limit bucket on top, for routes that mutate state.
fn protected_write(router: Router<AppState>, state: AppState, role: Role, route_name: &'static str) -> Router<AppState> {
    protected_read(router, state.clone(), role)
        .route_layer(middleware::from_fn(mw::require_csrf))
        .route_layer(middleware::from_fn_with_state(state, mw::for_route(route_name)))
}

fn zfs_routes(state: AppState) -> Router<AppState> {
    let reads = protected_read(
        Router::new()
            .route("/api/zfs/pools", get(zfs::list_pools))
            .route("/api/zfs/datasets", get(zfs::list_datasets))
            .route("/api/zfs/snapshots", get(zfs::list_snapshots))
            .route("/api/zfs/scrub-status", get(zfs::scrub_status))
            .route("/api/zfs/resilver-progress", get(zfs::resilver_progress)),
        state.clone(),
        Role::Reader,
    );

    let writes = protected_write(
        Router::new()
            .route("/api/zfs/datasets", post(zfs::create_dataset))
            .route("/api/zfs/datasets/property", post(zfs::set_property))
            .route("/api/zfs/snapshots", post(zfs::create_snapshot))
            .route("/api/zfs/snapshots", delete(zfs::destroy_snapshot))
            .route("/api/zfs/snapshots/rollback", post(zfs::rollback_snapshot))
            .route("/api/zfs/scrub", post(zfs::start_scrub))
            .route("/api/zfs/replace-device", post(zfs::replace_device))
            .route("/api/zfs/replace-cancel", post(zfs::cancel_replace)),
        state,
        Role::Admin,
        "zfs.write",
    );

    reads.merge(writes)
}

fn system_routes(state: AppState) -> Router<AppState> {
    let reads = protected_read(
        Router::new()
            .route("/api/system/status", get(system::status))
            .route("/api/system/zfs-gate-status", get(system::zfs_gate_status))
            .route("/api/system/disks", get(system::disks)),
        state.clone(),
        Role::Reader,
    );

    // Internal, authenticated callback surface used by host hot-plug
    // scripts; not reachable from the browser UI.
    let callbacks = protected_write(
        Router::new().route("/api/system/device-event", post(system::device_event)),
        state,
        Role::Admin,
        "system.device-event",
    );

    reads.merge(callbacks)
}

fn alerts_routes(state: AppState) -> Router<AppState> {
    let reads = protected_read(Router::new().route("/api/alerts", get(alerts::list)), state.clone(), Role::Reader);

    let writes = protected_write(
        Router::new()
            .route("/api/alerts/{id}/ack", post(alerts::ack))
            .route("/api/alerts/{id}/dismiss", post(alerts::dismiss)),
        state,
        Role::User,
        "alerts.write",
    );

    reads.merge(writes)
}

fn jobs_routes(state: AppState) -> Router<AppState> {
    protected_read(
        Router::new().route("/api/jobs", get(jobs::list)).route("/api/jobs/{id}", get(jobs::get)),
        state,
        Role::Reader,
    )
}

fn live_push_routes(state: AppState) -> Router<AppState> {
    protected_read(
        Router::new().route("/api/events", get(events::stream_events)).route("/ws/monitor", get(ws::upgrade)),
        state,
        Role::Reader,
    )
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(public_routes())
        .merge(session_exempt_routes(state.clone()))
        .merge(zfs_routes(state.clone()))
        .merge(system_routes(state.clone()))
        .merge(alerts_routes(state.clone()))
        .merge(jobs_routes(state.clone()))
        .merge(live_push_routes(state.clone()))
        .with_state(state)
}
