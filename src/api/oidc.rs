//! `/oidc/login` and `/oidc/callback` (spec §4.10). The pending `state`,
//! `nonce`, and PKCE verifier are each carried in their own short-lived
//! cookie rather than server-side storage, keeping this component as
//! stateless as the rest of the session model (spec §4.3 design notes).

use axum::extract::{Query, State};
use axum::response::Redirect;
use axum::routing::get;
use axum::Router;
use axum_extra::extract::cookie::{Cookie, SameSite};
use axum_extra::extract::SignedCookieJar;
use serde::Deserialize;

use crate::http::HttpError;
use crate::providers::oidc::PendingAuthorization;
use crate::DgwState;

const STATE_COOKIE_NAME: &str = "oidc-state";
const VERIFIER_COOKIE_NAME: &str = "oidc-verifier";
const NONCE_COOKIE_NAME: &str = "oidc-nonce";

pub fn make_router<S>(state: DgwState) -> Router<S> {
    Router::new()
        .route("/login", get(start))
        .route("/callback", get(callback))
        .with_state(state)
}

fn pending_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::new(name, value);
    cookie.set_http_only(true);
    cookie.set_path("/oidc");
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(secure);
    cookie.set_max_age(Some(time::Duration::hours(1)));
    cookie
}

fn cleared_cookie(name: &'static str) -> Cookie<'static> {
    let mut cookie = Cookie::new(name, "");
    cookie.set_path("/oidc");
    cookie
}

async fn start(State(state): State<DgwState>, jar: SignedCookieJar) -> Result<(SignedCookieJar, Redirect), HttpError> {
    let Some(oidc) = &state.oidc_provider else {
        return Err(HttpError::bad_request().msg("OIDC is not configured"));
    };

    let (pending, url) = oidc.begin();
    let secure = state.conf_handle.get_conf().cookie_secure;

    let jar = jar
        .add(pending_cookie(STATE_COOKIE_NAME, pending.state, secure))
        .add(pending_cookie(VERIFIER_COOKIE_NAME, pending.code_verifier, secure))
        .add(pending_cookie(NONCE_COOKIE_NAME, pending.nonce, secure));

    Ok((jar, Redirect::to(url.as_str())))
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    state: String,
    code: String,
}

async fn callback(
    State(state): State<DgwState>,
    Query(params): Query<CallbackParams>,
    jar: SignedCookieJar,
) -> Result<(SignedCookieJar, Redirect), HttpError> {
    let Some(oidc) = &state.oidc_provider else {
        return Err(HttpError::bad_request().msg("OIDC is not configured"));
    };

    let pending_state = jar
        .get(STATE_COOKIE_NAME)
        .map(|c| c.value().to_owned())
        .ok_or_else(|| HttpError::bad_request().msg("no pending OIDC login"))?;
    let code_verifier = jar
        .get(VERIFIER_COOKIE_NAME)
        .map(|c| c.value().to_owned())
        .ok_or_else(|| HttpError::bad_request().msg("no pending OIDC login"))?;
    let nonce = jar
        .get(NONCE_COOKIE_NAME)
        .map(|c| c.value().to_owned())
        .ok_or_else(|| HttpError::bad_request().msg("no pending OIDC login"))?;

    let pending = PendingAuthorization {
        state: pending_state,
        nonce,
        code_verifier,
    };

    let user = oidc
        .complete(&pending, &params.state, &params.code)
        .await
        .map_err(HttpError::from)?;

    let jar = state
        .session_store
        .save(jar, &user)
        .map_err(|e| HttpError::internal().err()(e))?;

    let jar = jar
        .remove(cleared_cookie(STATE_COOKIE_NAME))
        .remove(cleared_cookie(VERIFIER_COOKIE_NAME))
        .remove(cleared_cookie(NONCE_COOKIE_NAME));

    Ok((jar, Redirect::to("/")))
}
