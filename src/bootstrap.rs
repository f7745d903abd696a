//! Process-wide one-time construction of the `AuthService` (spec §4.11).
//! Providers are built here and injected into the service rather than the
//! other way around, so no component ever needs a cyclic reference back to
//! the service that owns it.

use std::sync::Arc;

use axum_extra::extract::cookie::Key;

use crate::config::Conf;
use crate::providers::jwt_cookie::JwtCookieSessionProvider;
use crate::providers::jwt_session::JwtSessionProvider;
use crate::providers::ldap::LdapProvider;
use crate::providers::local::LocalProvider;
use crate::providers::Provider;
use crate::rate_limiter::RateLimiter;
use crate::repository::UserRepository;
use crate::service::{AuthService, MachineAllowList};
use crate::session::SessionStore;
use crate::token::{JwtKeys, JwtVerifier, LoginTokenVerifier};

pub struct Bootstrapped {
    pub auth_service: Arc<AuthService>,
    pub session_key: Key,
    pub session_store: Arc<SessionStore>,
    pub oidc_provider: Option<Arc<crate::providers::oidc::OidcProvider>>,
    pub background_tasks: Vec<tokio::task::JoinHandle<()>>,
}

/// Builds the fixed-priority provider chain (LDAP, JWTSession,
/// JWTCookieSession, Local) and the `AuthService` that dispatches across it
/// (spec §4.1, §4.11). Runs exactly once at process startup.
pub fn bootstrap(conf: &Conf, repository: Arc<dyn UserRepository>) -> anyhow::Result<Bootstrapped> {
    let mut background_tasks = Vec::new();

    // The verifier itself only exists when the `jwts` section and
    // `JWT_PUBLIC_KEY` were both present (spec §4.11); it backs both the
    // shared bearer/cookie auth path and the JWTCookieSession provider.
    let jwt_verifier = conf.jwt_public_key.as_ref().map(|jwt_public_key| {
        Arc::new(JwtVerifier::new(
            JwtKeys {
                own_public: jwt_public_key.clone(),
                own_private: conf.jwt_private_key.clone(),
                trusted_external_public: conf.trusted_external_public_key.clone(),
                trusted_external_issuer: conf.jwt.as_ref().and_then(|j| j.trusted_issuer.clone()),
            },
            conf.jwt.as_ref().map(|j| j.validate_user).unwrap_or(false),
            repository.clone(),
            conf.jwt.as_ref().map(|j| j.max_age).unwrap_or(std::time::Duration::from_secs(300)),
        ))
    });

    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

    if let Some(ldap_conf) = &conf.ldap {
        let ldap_provider = Arc::new(LdapProvider::new(ldap_conf.settings.clone(), repository.clone()));
        background_tasks.push(ldap_provider.clone().spawn_periodic_sync());
        providers.push(ldap_provider);
    }

    if let Some(login_token_key) = &conf.login_token_key {
        let login_token_verifier = Arc::new(LoginTokenVerifier::new(login_token_key.clone()));
        let (validate_user, sync_user_on_login, update_user_on_login) = conf
            .jwt
            .as_ref()
            .map(|j| (j.validate_user, j.sync_user_on_login, j.update_user_on_login))
            .unwrap_or((false, false, false));
        providers.push(Arc::new(JwtSessionProvider::new(
            login_token_verifier,
            repository.clone(),
            validate_user,
            sync_user_on_login,
            update_user_on_login,
        )));
    }

    // Every one of these is required before the cookie-based cross-login
    // provider can run at all (spec §4.6); a deployment missing any of them
    // simply doesn't get this provider rather than failing to start.
    if let (Some(verifier), Some(jwt_conf)) = (&jwt_verifier, &conf.jwt) {
        let has_own_private = conf.jwt_private_key.is_some();
        let has_trusted_external_public = conf.trusted_external_public_key.is_some();
        let has_cookie_name = jwt_conf.cookie_name.is_some();
        let has_trusted_issuer = jwt_conf.trusted_issuer.is_some();

        if has_own_private && has_trusted_external_public && has_cookie_name && has_trusted_issuer {
            if !jwt_conf.validate_user {
                tracing::warn!("jwts.validate-user is false: JWTCookieSession roles come from the token, not the database");
            }
            providers.push(Arc::new(JwtCookieSessionProvider::new(
                verifier.clone(),
                repository.clone(),
                jwt_conf.sync_user_on_login,
                jwt_conf.update_user_on_login,
            )));
        } else {
            tracing::warn!(
                has_own_private,
                has_trusted_external_public,
                has_cookie_name,
                has_trusted_issuer,
                "JWTCookieSession provider not started: missing required keypair, trusted key, cookie-name, or trusted-issuer"
            );
        }
    }

    providers.push(Arc::new(LocalProvider::new(repository.clone())));

    let rate_limiter = RateLimiter::new();
    background_tasks.push(rate_limiter.clone().spawn_gc());

    let session_key = Key::generate();
    let session_store = Arc::new(SessionStore::new(session_key.clone(), conf.session_max_age, conf.cookie_secure));

    let machine_allow_list = MachineAllowList::new(Vec::new());

    let jwt_cookie_name = conf.jwt.as_ref().and_then(|j| j.cookie_name.clone());

    let auth_service = Arc::new(AuthService::new(
        providers,
        rate_limiter,
        session_store.clone(),
        repository,
        machine_allow_list,
        jwt_verifier,
        jwt_cookie_name,
    ));

    let oidc_provider = conf
        .oidc
        .as_ref()
        .map(|oidc_conf| Arc::new(crate::providers::oidc::OidcProvider::new(oidc_conf.settings.clone())));

    Ok(Bootstrapped {
        auth_service,
        session_key,
        session_store,
        oidc_provider,
        background_tasks,
    })
}
