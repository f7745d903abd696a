//! Pluggable authentication providers (spec §4.6–§4.10) dispatched in a
//! fixed priority order by `AuthService` (spec §4.1): LDAP, JWTSession,
//! JWTCookieSession, Local. OIDC is invoked out of band, from its own
//! redirect/callback routes rather than the login dispatch chain.

pub mod jwt_cookie;
pub mod jwt_session;
pub mod ldap;
pub mod local;
pub mod oidc;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::user::User;

/// Credentials and request metadata a provider needs to decide whether it
/// applies, and to attempt a login (spec §9's two-method design note).
pub struct LoginContext<'a> {
    pub username: Option<&'a str>,
    pub password: Option<&'a str>,
    pub bearer_token: Option<&'a str>,
    pub cookie_token: Option<&'a str>,
    pub source_ip: &'a str,
}

/// One entry in the fixed-priority provider chain (spec §9's two-method
/// design note). `AuthService::login` resolves the candidate `User` row
/// (if any) exactly once per attempt and hands it to every provider's
/// `can_login`, so no provider repeats the lookup; a provider that claims
/// the attempt returns the identity it wants `login` to act on (which may
/// be a freshly-constructed, not-yet-persisted row for just-in-time
/// creation). Only the first provider to claim the attempt gets `login`
/// called, and its error — if any — is returned immediately (P3): there is
/// no falling through to the next provider on a claimed attempt.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn can_login(&self, user: Option<&User>, ctx: &LoginContext<'_>) -> Option<User>;

    async fn login(&self, user: &User, ctx: &LoginContext<'_>) -> Result<User, ProviderError>;
}
