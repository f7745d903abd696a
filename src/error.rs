//! Component-level error enums and their mapping onto the single HTTP
//! response each is allowed to produce (spec §7). Mirrors the teacher's
//! `token::TokenError` style: one `thiserror::Error` enum per failure
//! surface, `#[from]` conversions where a lower layer's error is wrapped
//! verbatim.

use thiserror::Error;

use crate::http::HttpError;

/// Errors a `Provider::login` implementation can return (spec §4.1, §7).
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Generic "authentication failed" — never discloses whether the account
    /// exists or which verification step failed (spec §4.8, §4.9).
    #[error("authentication failed")]
    BadCredentials,

    /// `validate-user=true` and `sub`/`username` is not in the repository.
    #[error("unknown user")]
    UnknownUser,

    #[error("token invalid: {0}")]
    TokenInvalid(#[from] crate::token::TokenError),

    /// LDAP or OIDC or DB I/O failure.
    #[error("upstream provider error: {0}")]
    Io(#[from] anyhow::Error),
}

impl From<ProviderError> for HttpError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::BadCredentials | ProviderError::UnknownUser => {
                HttpError::unauthorized().msg("authentication failed")
            }
            ProviderError::TokenInvalid(token_err) => token_err.into(),
            ProviderError::Io(source) => HttpError::internal().err()(source),
        }
    }
}

/// Top-level error surfaced by `AuthService::login`/`auth` (spec §4.1).
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("too many login attempts")]
    RateLimited,

    #[error("no authenticator applied")]
    NoProviderApplicable,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("session store error: {0}")]
    SessionIo(anyhow::Error),

    /// Role check failed on an admin/machine endpoint. Deliberately
    /// indistinguishable from "not authenticated at all" (spec §7).
    #[error("unauthorized")]
    Forbidden,

    #[error("unauthorized")]
    Unauthenticated,
}

impl From<AuthError> for HttpError {
    fn from(err: AuthError) -> Self {
        match err {
            // Rate limiting observably returns 200 with an error body per spec §7,
            // to avoid giving a scripted client an HTTP-status-based oracle.
            AuthError::RateLimited => HttpError::ok_with_error().msg("too many login attempts"),
            AuthError::NoProviderApplicable => HttpError::unauthorized().msg("no authenticator applied"),
            AuthError::Provider(provider_err) => provider_err.into(),
            AuthError::SessionIo(source) => HttpError::internal().err()(source),
            AuthError::Forbidden | AuthError::Unauthenticated => HttpError::unauthorized().msg("unauthorized"),
        }
    }
}

/// Fatal at bootstrap only (spec §7, §4.11): the process exits rather than
/// starting in a half-configured state.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Invalid(#[from] anyhow::Error),
}
