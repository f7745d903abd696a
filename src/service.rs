//! `AuthService` (spec §4.1): the fixed-priority provider pipeline, rate
//! limiting, session issuance, and the per-surface role gates
//! (`AuthFrontendAPI`/`AuthConfigAPI`/`AuthUserAPI`/`AuthMachineAPI`).

use std::sync::Arc;

use axum::http::HeaderMap;
use axum_extra::extract::cookie::CookieJar;
use axum_extra::extract::SignedCookieJar;

use crate::error::AuthError;
use crate::providers::{LoginContext, Provider};
use crate::rate_limiter::RateLimiter;
use crate::repository::UserRepository;
use crate::session::SessionStore;
use crate::token::JwtVerifier;
use crate::user::{Role, User};

const X_AUTH_TOKEN_HEADER: &str = "x-auth-token";

/// Machine-API callers are allow-listed by source IP rather than by role
/// (spec §4.1, L3): loopback and any address explicitly configured.
pub struct MachineAllowList {
    allowed: Vec<String>,
}

impl MachineAllowList {
    pub fn new(allowed: Vec<String>) -> Self {
        Self { allowed }
    }

    /// Strips a `:port` suffix if present (spec L3) before comparing.
    pub fn allows(&self, remote: &str) -> bool {
        let ip = remote.rsplit_once(':').map(|(ip, _)| ip).unwrap_or(remote);
        ip == "127.0.0.1" || ip == "::1" || self.allowed.iter().any(|a| a == ip)
    }
}

pub struct AuthService {
    providers: Vec<Arc<dyn Provider>>,
    rate_limiter: RateLimiter,
    session_store: Arc<SessionStore>,
    repository: Arc<dyn UserRepository>,
    machine_allow_list: MachineAllowList,
    jwt_verifier: Option<Arc<JwtVerifier>>,
    jwt_cookie_name: Option<String>,
}

/// Reads `X-Auth-Token`, then `Authorization: Bearer`, in that order
/// (spec §4.4 step 1) — whichever is found first wins.
fn bearer_token_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(X_AUTH_TOKEN_HEADER) {
        return value.to_str().ok().map(str::to_owned);
    }

    let auth = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    auth.strip_prefix("Bearer ").map(str::to_owned)
}

impl AuthService {
    /// `providers` must already be in the spec's fixed priority order:
    /// LDAP, JWTSession, JWTCookieSession, Local.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        rate_limiter: RateLimiter,
        session_store: Arc<SessionStore>,
        repository: Arc<dyn UserRepository>,
        machine_allow_list: MachineAllowList,
        jwt_verifier: Option<Arc<JwtVerifier>>,
        jwt_cookie_name: Option<String>,
    ) -> Self {
        Self {
            providers,
            rate_limiter,
            session_store,
            repository,
            machine_allow_list,
            jwt_verifier,
            jwt_cookie_name,
        }
    }

    pub fn repository(&self) -> &Arc<dyn UserRepository> {
        &self.repository
    }

    /// Runs the rate limiter then the provider chain (spec §4.1, §4.2): the
    /// repository is consulted exactly once per attempt, and the first
    /// provider to claim it gets to call `login` — whose error, if any, is
    /// returned immediately rather than falling through to the next
    /// provider (P3).
    pub async fn login(
        &self,
        ctx: &LoginContext<'_>,
        jar: SignedCookieJar,
    ) -> Result<(User, SignedCookieJar), AuthError> {
        if let Some(username) = ctx.username {
            if !self.rate_limiter.allow(ctx.source_ip, username) {
                return Err(AuthError::RateLimited);
            }
        }

        let looked_up = if let Some(username) = ctx.username {
            self.repository
                .find_by_username(username)
                .await
                .map_err(|e| AuthError::SessionIo(e.into()))?
        } else {
            None
        };

        for provider in &self.providers {
            let Some(candidate) = provider.can_login(looked_up.as_ref(), ctx).await else {
                continue;
            };

            let user = provider.login(&candidate, ctx).await.map_err(AuthError::Provider)?;

            let jar = self.session_store.save(jar, &user).map_err(|e| AuthError::SessionIo(e.into()))?;
            tracing::info!(username = %user.username, provider = provider.name(), "login succeeded");
            return Ok((user, jar));
        }

        Err(AuthError::NoProviderApplicable)
    }

    /// Resolves the identity of the current request from its session cookie
    /// (spec §4.3). Used directly by the session-only gates; the generic
    /// `Auth`/`AuthUI` gate tries `auth_jwt` first and falls back to this.
    pub fn auth_session(&self, jar: &SignedCookieJar) -> Result<User, AuthError> {
        self.session_store
            .load(jar)
            .map_err(|e| AuthError::SessionIo(e.into()))?
            .ok_or(AuthError::Unauthenticated)
    }

    /// Locates a bearer JWT for this request: `X-Auth-Token` header, then
    /// `Authorization: Bearer`, then the configured named cookie (spec
    /// §4.4 step 1). Returns `None` if no verifier is configured at all or
    /// no token was found by any of those means.
    fn jwt_token_from_request(&self, headers: &HeaderMap, cookies: &CookieJar) -> Option<String> {
        self.jwt_verifier.as_ref()?;

        if let Some(token) = bearer_token_from_headers(headers) {
            return Some(token);
        }

        let cookie_name = self.jwt_cookie_name.as_deref()?;
        cookies.get(cookie_name).map(|c| c.value().to_owned())
    }

    /// Verifies a bearer/cookie JWT for this request, if one is configured
    /// and present. `None` means "no JWT to check" (the generic gate should
    /// fall back to the session); `Some(Err(_))` means a JWT was presented
    /// but failed verification.
    async fn auth_jwt(&self, headers: &HeaderMap, cookies: &CookieJar) -> Option<Result<User, AuthError>> {
        let verifier = self.jwt_verifier.as_ref()?;
        let token = self.jwt_token_from_request(headers, cookies)?;

        let result = verifier
            .verify(&token)
            .await
            .map(|claims| crate::token::jwt::user_from_verified(claims, crate::user::AuthSource::Token))
            .map_err(|e| AuthError::Provider(crate::error::ProviderError::TokenInvalid(e)));

        Some(result)
    }

    /// JWT-only gate: errors with `Unauthenticated` rather than falling
    /// back to the session, per spec §4.1's `AuthUserAPI`/`AuthMachineAPI`.
    async fn auth_jwt_required(&self, headers: &HeaderMap, cookies: &CookieJar) -> Result<User, AuthError> {
        self.auth_jwt(headers, cookies).await.ok_or(AuthError::Unauthenticated)?
    }

    /// Generic `Auth`/`AuthUI` gate (spec §4.1): any authenticated user,
    /// JWT first, session cookie as fallback.
    pub async fn auth(&self, headers: &HeaderMap, cookies: &CookieJar, jar: &SignedCookieJar) -> Result<User, AuthError> {
        if let Some(result) = self.auth_jwt(headers, cookies).await {
            return result;
        }

        self.auth_session(jar)
    }

    /// Clears the session (spec §4.3 logout, and the one-shot cookie-session
    /// cleanup required by P4).
    pub fn logout(&self, jar: SignedCookieJar) -> SignedCookieJar {
        self.session_store.clear(jar)
    }

    /// Any authenticated user may reach frontend-facing read endpoints
    /// (spec §4.1 `AuthFrontendAPI`, session-only).
    pub fn auth_frontend_api(&self, jar: &SignedCookieJar) -> Result<User, AuthError> {
        self.auth_session(jar)
    }

    /// Configuration endpoints are admin-only (spec §4.1 `AuthConfigAPI`,
    /// session-only).
    pub fn auth_config_api(&self, jar: &SignedCookieJar) -> Result<User, AuthError> {
        let user = self.auth_session(jar)?;
        if user.has_role(Role::Admin) {
            Ok(user)
        } else {
            Err(AuthError::Forbidden)
        }
    }

    /// User-management endpoints (spec §4.1 `AuthUserAPI`, JWT-only): the
    /// `api` role on its own, or any of `user`/`manager`/`admin`.
    pub async fn auth_user_api(&self, headers: &HeaderMap, cookies: &CookieJar) -> Result<User, AuthError> {
        let user = self.auth_jwt_required(headers, cookies).await?;
        if user.has_role(Role::Api) || user.has_any_role(&[Role::User, Role::Manager, Role::Admin]) {
            Ok(user)
        } else {
            Err(AuthError::Forbidden)
        }
    }

    /// Machine-to-machine ingestion endpoints (spec §4.1 `AuthMachineAPI`,
    /// JWT-only): source-IP allow-list plus the `api` role on its own, or
    /// `admin` together with `api`.
    pub async fn auth_machine_api(
        &self,
        headers: &HeaderMap,
        cookies: &CookieJar,
        remote_addr: &str,
    ) -> Result<User, AuthError> {
        if !self.machine_allow_list.allows(remote_addr) {
            return Err(AuthError::Forbidden);
        }

        let user = self.auth_jwt_required(headers, cookies).await?;
        if user.has_role(Role::Api) || user.has_all_roles(&[Role::Admin, Role::Api]) {
            Ok(user)
        } else {
            Err(AuthError::Forbidden)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_allow_list_accepts_loopback_and_strips_port() {
        let allow_list = MachineAllowList::new(vec!["10.0.0.5".to_owned()]);
        assert!(allow_list.allows("127.0.0.1:54321"));
        assert!(allow_list.allows("10.0.0.5:443"));
        assert!(!allow_list.allows("8.8.8.8:80"));
    }

    #[test]
    fn bearer_token_prefers_x_auth_token_header() {
        let mut headers = HeaderMap::new();
        headers.insert(X_AUTH_TOKEN_HEADER, "from-x-auth-token".parse().unwrap());
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer from-authorization".parse().unwrap());

        assert_eq!(bearer_token_from_headers(&headers).as_deref(), Some("from-x-auth-token"));
    }

    #[test]
    fn bearer_token_falls_back_to_authorization_header() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer from-authorization".parse().unwrap());

        assert_eq!(bearer_token_from_headers(&headers).as_deref(), Some("from-authorization"));
    }
}
