//! `POST /logout` (spec §4.3): clears the session cookie unconditionally,
//! whether or not one was actually present.

use axum::extract::State;
use axum::routing::post;
use axum::Router;
use axum_extra::extract::SignedCookieJar;

use crate::DgwState;

pub fn make_router<S>(state: DgwState) -> Router<S> {
    Router::new().route("/logout", post(logout)).with_state(state)
}

async fn logout(State(state): State<DgwState>, jar: SignedCookieJar) -> SignedCookieJar {
    state.auth_service.logout(jar)
}
