//! Router composition, following the teacher's `make_router<S>` convention:
//! each module owns its own sub-router, composed here with `.nest`.

pub mod health;
pub mod login;
pub mod logout;
pub mod oidc;

use axum::Router;

use crate::DgwState;

pub fn make_router<S>(state: DgwState) -> Router<S> {
    Router::new()
        .merge(health::make_router(state.clone()))
        .merge(login::make_router(state.clone()))
        .merge(logout::make_router(state.clone()))
        .nest("/oidc", oidc::make_router(state))
}
