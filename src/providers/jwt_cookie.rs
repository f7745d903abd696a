//! Cross-login via a one-shot Ed25519 cookie token (spec §4.4, P4): another
//! deployment mints a short-lived token and sets it as a cookie before
//! redirecting here; this provider verifies it and the caller is responsible
//! for deleting the cookie afterward so it cannot be replayed.

use std::sync::Arc;

use async_trait::async_trait;

use super::{LoginContext, Provider};
use crate::error::ProviderError;
use crate::repository::UserRepository;
use crate::token::JwtVerifier;
use crate::user::{AuthSource, AuthType, User};

pub struct JwtCookieSessionProvider {
    verifier: Arc<JwtVerifier>,
    repository: Arc<dyn UserRepository>,
    sync_user_on_login: bool,
    update_user_on_login: bool,
}

impl JwtCookieSessionProvider {
    pub fn new(
        verifier: Arc<JwtVerifier>,
        repository: Arc<dyn UserRepository>,
        sync_user_on_login: bool,
        update_user_on_login: bool,
    ) -> Self {
        Self {
            verifier,
            repository,
            sync_user_on_login,
            update_user_on_login,
        }
    }
}

#[async_trait]
impl Provider for JwtCookieSessionProvider {
    fn name(&self) -> &'static str {
        "jwt-cookie-session"
    }

    /// As with the bearer-token provider, the identity comes from the
    /// cookie's claims rather than `user`; this only checks presence.
    async fn can_login(&self, _user: Option<&User>, ctx: &LoginContext<'_>) -> Option<User> {
        ctx.cookie_token?;
        Some(User::new("", AuthSource::Token))
    }

    async fn login(&self, _user: &User, ctx: &LoginContext<'_>) -> Result<User, ProviderError> {
        let token = ctx.cookie_token.ok_or(ProviderError::BadCredentials)?;

        let claims = self.verifier.verify(token).await?;

        let mut user = crate::token::jwt::user_from_verified(claims, AuthSource::Token);
        user.auth_type = AuthType::Session;

        let existing = self
            .repository
            .find_by_username(&user.username)
            .await
            .map_err(|e| ProviderError::Io(e.into()))?;

        match existing {
            None if self.sync_user_on_login => {
                self.repository.upsert(user.clone()).await.map_err(|e| ProviderError::Io(e.into()))?;
            }
            Some(_) if self.update_user_on_login => {
                self.repository.upsert(user.clone()).await.map_err(|e| ProviderError::Io(e.into()))?;
            }
            Some(existing) => {
                user.roles = existing.roles;
                user.name = existing.name;
                user.email = existing.email;
            }
            None => {}
        }

        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryUserRepository;
    use crate::token::JwtKeys;
    use picky::key::PrivateKey;

    fn keypair() -> (picky::key::PublicKey, PrivateKey) {
        let private = PrivateKey::generate_ed25519().expect("ed25519 keygen");
        let public = private.to_public_key().expect("derive public key");
        (public, private)
    }

    #[tokio::test]
    async fn valid_cross_login_cookie_is_accepted() {
        let (own_public, own_private) = keypair();
        let repo = Arc::new(InMemoryUserRepository::new());
        let verifier = Arc::new(JwtVerifier::new(
            JwtKeys {
                own_public,
                own_private: Some(own_private),
                trusted_external_public: None,
                trusted_external_issuer: None,
            },
            false,
            repo.clone(),
            std::time::Duration::from_secs(300),
        ));

        let user = crate::user::User::new("alice", AuthSource::LocalPassword);
        let token = verifier.issue(&user).unwrap();

        let provider = JwtCookieSessionProvider::new(verifier, repo, false, false);
        let ctx = LoginContext {
            username: None,
            password: None,
            bearer_token: None,
            cookie_token: Some(&token),
            source_ip: "127.0.0.1",
        };

        let placeholder = provider.can_login(None, &ctx).await.expect("should claim");
        let logged_in = provider.login(&placeholder, &ctx).await.unwrap();
        assert_eq!(logged_in.username, "alice");
    }
}
