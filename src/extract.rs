//! `FromRequestParts` extractors mirroring the teacher's `AccessToken`/
//! `AssociationToken` pattern: handlers declare the surface they need
//! (`AuthUser`, `FrontendUser`, `ConfigUser`, `ManagedUser`, `MachineUser`)
//! and the extractor runs the matching `AuthService` gate, rejecting with
//! `HttpError` before the handler body ever runs.

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum_extra::extract::cookie::CookieJar;
use axum_extra::extract::SignedCookieJar;

use crate::http::HttpError;
use crate::user::User;
use crate::DgwState;

async fn extract_signed_jar(parts: &mut Parts, state: &DgwState) -> Result<SignedCookieJar, HttpError> {
    SignedCookieJar::from_request_parts(parts, state)
        .await
        .map_err(|never: std::convert::Infallible| match never {})
}

async fn extract_cookie_jar(parts: &mut Parts, state: &DgwState) -> Result<CookieJar, HttpError> {
    CookieJar::from_request_parts(parts, state)
        .await
        .map_err(|never: std::convert::Infallible| match never {})
}

/// Any authenticated user, JWT-first with a session-cookie fallback (spec
/// §4.1 `Auth`/`AuthUI`).
pub struct AuthUser(pub User);

impl FromRequestParts<DgwState> for AuthUser {
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, state: &DgwState) -> Result<Self, Self::Rejection> {
        let cookies = extract_cookie_jar(parts, state).await?;
        let jar = extract_signed_jar(parts, state).await?;
        let user = state.auth_service.auth(&parts.headers, &cookies, &jar).await?;
        Ok(AuthUser(user))
    }
}

/// Any authenticated user (spec §4.1 `AuthFrontendAPI`, session-only).
pub struct FrontendUser(pub User);

impl FromRequestParts<DgwState> for FrontendUser {
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, state: &DgwState) -> Result<Self, Self::Rejection> {
        let jar = extract_signed_jar(parts, state).await?;
        Ok(FrontendUser(state.auth_service.auth_frontend_api(&jar)?))
    }
}

/// Admin-only (spec §4.1 `AuthConfigAPI`, session-only).
pub struct ConfigUser(pub User);

impl FromRequestParts<DgwState> for ConfigUser {
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, state: &DgwState) -> Result<Self, Self::Rejection> {
        let jar = extract_signed_jar(parts, state).await?;
        Ok(ConfigUser(state.auth_service.auth_config_api(&jar)?))
    }
}

/// `api`, or any of `user`/`manager`/`admin` (spec §4.1 `AuthUserAPI`,
/// JWT-only).
pub struct ManagedUser(pub User);

impl FromRequestParts<DgwState> for ManagedUser {
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, state: &DgwState) -> Result<Self, Self::Rejection> {
        let cookies = extract_cookie_jar(parts, state).await?;
        let user = state.auth_service.auth_user_api(&parts.headers, &cookies).await?;
        Ok(ManagedUser(user))
    }
}

/// `api`, or `admin` together with `api`, plus source-IP allow-list (spec
/// §4.1 `AuthMachineAPI`, JWT-only).
pub struct MachineUser(pub User);

impl FromRequestParts<DgwState> for MachineUser {
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, state: &DgwState) -> Result<Self, Self::Rejection> {
        let ConnectInfo(remote_addr) = ConnectInfo::<std::net::SocketAddr>::from_request_parts(parts, state)
            .await
            .map_err(|_| HttpError::internal().msg("missing connection info"))?;

        let cookies = extract_cookie_jar(parts, state).await?;
        let user = state
            .auth_service
            .auth_machine_api(&parts.headers, &cookies, &remote_addr.to_string())
            .await?;
        Ok(MachineUser(user))
    }
}
