//! Library surface behind the `naosd` binary: state, routes, middleware,
//! and error plumbing, split out of `main.rs` so integration tests in
//! `tests/` can build a real router against a temporary database, the way
//! the teacher's own `tests/support/mod.rs` builds a `TestApp` over
//! `ferrex_server::routes::create_api_router`.

pub mod app_state;
pub mod errors;
pub mod live_push;
pub mod middleware;
pub mod routes;
pub mod system_probe;
