//! `POST /login` (spec §4.1, §6): builds a `LoginContext` from whichever
//! credential the request actually carries — form fields for username/
//! password, a bearer login token (`Authorization` header or `?login-token=`
//! query string) for the one-shot JWT exchange, a `cross-login` cookie for a
//! cross-deployment JWT — and runs it through `AuthService::login`, then
//! redirects the browser to `redirect` (or `/`) on success.

use axum::extract::{Form, Query, State};
use axum::response::Redirect;
use axum::routing::post;
use axum::Router;
use axum_extra::extract::SignedCookieJar;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use serde::Deserialize;

use crate::http::HttpError;
use crate::providers::LoginContext;
use crate::DgwState;

const CROSS_LOGIN_COOKIE_NAME: &str = "cross-login";

pub fn make_router<S>(state: DgwState) -> Router<S> {
    Router::new().route("/login", post(login)).with_state(state)
}

#[derive(Debug, Deserialize, Default)]
pub struct LoginRequest {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    redirect: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LoginQuery {
    #[serde(default, rename = "login-token")]
    login_token: Option<String>,
}

/// Only accepts same-origin, path-absolute redirects, guarding against an
/// open redirect through a crafted `redirect` field.
fn safe_redirect_target(redirect: Option<String>) -> String {
    redirect.filter(|r| r.starts_with('/') && !r.starts_with("//")).unwrap_or_else(|| "/".to_owned())
}

async fn login(
    State(state): State<DgwState>,
    connect_info: Option<axum::extract::ConnectInfo<std::net::SocketAddr>>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    Query(query): Query<LoginQuery>,
    jar: SignedCookieJar,
    Form(body): Form<LoginRequest>,
) -> Result<(SignedCookieJar, Redirect), HttpError> {
    let source_ip = connect_info.map(|c| c.0.to_string()).unwrap_or_else(|| "unknown".to_owned());
    let cookie_token = jar.get(CROSS_LOGIN_COOKIE_NAME).map(|c| c.value().to_owned());

    let bearer_token = bearer
        .as_ref()
        .map(|TypedHeader(auth)| auth.token().to_owned())
        .or(query.login_token);

    let ctx = LoginContext {
        username: body.username.as_deref(),
        password: body.password.as_deref(),
        bearer_token: bearer_token.as_deref(),
        cookie_token: cookie_token.as_deref(),
        source_ip: &source_ip,
    };

    let (user, jar) = state.auth_service.login(&ctx, jar).await.map_err(HttpError::from)?;

    // A JWTCookieSession login is one-shot: the inbound cookie is deleted so
    // the same token cannot be replayed (spec §4.4, P4).
    let jar = if cookie_token.is_some() {
        let mut cookie = axum_extra::extract::cookie::Cookie::new(CROSS_LOGIN_COOKIE_NAME, "");
        cookie.set_path("/");
        jar.remove(cookie)
    } else {
        jar
    };

    tracing::debug!(username = %user.username, "login redirecting");

    Ok((jar, Redirect::to(&safe_redirect_target(body.redirect))))
}
