//! Unauthenticated liveness probe, mirroring the teacher's `AUTH_EXCEPTIONS`
//! carve-out for `/health` (SPEC_FULL.md §10.5).

use axum::routing::get;
use axum::Router;

use crate::DgwState;

pub fn make_router<S>(state: DgwState) -> Router<S> {
    Router::new().route("/healthz", get(healthz)).with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}
