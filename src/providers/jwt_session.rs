//! One-shot login-token provider (spec §4.5, §9): a bearer `Authorization`
//! header carrying an HS256/HS512 token minted by a trusted upstream
//! (the job scheduler, a CI pipeline) is exchanged for a normal session.

use std::sync::Arc;

use async_trait::async_trait;

use super::{LoginContext, Provider};
use crate::error::ProviderError;
use crate::repository::UserRepository;
use crate::token::LoginTokenVerifier;
use crate::user::{AuthSource, AuthType, User};

pub struct JwtSessionProvider {
    verifier: Arc<LoginTokenVerifier>,
    repository: Arc<dyn UserRepository>,
    validate_user: bool,
    sync_user_on_login: bool,
    update_user_on_login: bool,
}

impl JwtSessionProvider {
    pub fn new(
        verifier: Arc<LoginTokenVerifier>,
        repository: Arc<dyn UserRepository>,
        validate_user: bool,
        sync_user_on_login: bool,
        update_user_on_login: bool,
    ) -> Self {
        Self {
            verifier,
            repository,
            validate_user,
            sync_user_on_login,
            update_user_on_login,
        }
    }
}

#[async_trait]
impl Provider for JwtSessionProvider {
    fn name(&self) -> &'static str {
        "jwt-session"
    }

    /// The actual identity comes from the bearer token's claims, verified
    /// inside `login`; this only checks that a token was presented at all,
    /// so `user` (the repository's pre-lookup, keyed by form username if
    /// any) is ignored.
    async fn can_login(&self, _user: Option<&User>, ctx: &LoginContext<'_>) -> Option<User> {
        ctx.bearer_token?;
        Some(User::new("", AuthSource::Token))
    }

    async fn login(&self, _user: &User, ctx: &LoginContext<'_>) -> Result<User, ProviderError> {
        let token = ctx.bearer_token.ok_or(ProviderError::BadCredentials)?;

        let (claims, roles) = self.verifier.verify(token).map_err(|_| ProviderError::BadCredentials)?;

        if self.validate_user {
            let mut user = self
                .repository
                .find_by_username(&claims.sub)
                .await
                .map_err(|e| ProviderError::Io(e.into()))?
                .ok_or(ProviderError::UnknownUser)?;
            user.auth_type = AuthType::Session;
            return Ok(user);
        }

        let existing = self
            .repository
            .find_by_username(&claims.sub)
            .await
            .map_err(|e| ProviderError::Io(e.into()))?;

        let mut user = User {
            username: claims.sub,
            name: String::new(),
            email: None,
            password: crate::user::PasswordHash::default(),
            roles,
            projects: Default::default(),
            auth_type: AuthType::Session,
            auth_source: AuthSource::Token,
        };

        if existing.is_none() {
            if self.sync_user_on_login {
                self.repository.upsert(user.clone()).await.map_err(|e| ProviderError::Io(e.into()))?;
            }
        } else if self.update_user_on_login {
            self.repository.upsert(user.clone()).await.map_err(|e| ProviderError::Io(e.into()))?;
        } else if let Some(existing) = existing {
            user.roles = existing.roles;
            user.name = existing.name;
            user.email = existing.email;
        }

        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryUserRepository;
    use crate::user::RoleSet;

    fn token_for(key: &[u8], sub: &str, roles: &[&str]) -> String {
        use base64::Engine as _;
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        let exp = time::OffsetDateTime::now_utc().unix_timestamp() + 3600;
        let b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let header = b64.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = b64.encode(format!(r#"{{"sub":"{sub}","roles":{:?},"exp":{exp}}}"#, roles));
        let signing_input = format!("{header}.{payload}");
        let mut mac = Hmac::<Sha256>::new_from_slice(key).unwrap();
        mac.update(signing_input.as_bytes());
        let sig = b64.encode(mac.finalize().into_bytes());
        format!("{signing_input}.{sig}")
    }

    fn ctx(token: &str) -> LoginContext<'_> {
        LoginContext {
            username: None,
            password: None,
            bearer_token: Some(token),
            cookie_token: None,
            source_ip: "127.0.0.1",
        }
    }

    #[tokio::test]
    async fn valid_token_without_validate_user_trusts_token_roles() {
        let key = b"shared-secret".to_vec();
        let verifier = Arc::new(LoginTokenVerifier::new(key.clone()));
        let repo = Arc::new(InMemoryUserRepository::new());
        let provider = JwtSessionProvider::new(verifier, repo, false, false, false);

        let token = token_for(&key, "alice", &["user"]);
        let ctx = ctx(&token);

        let placeholder = provider.can_login(None, &ctx).await.expect("should claim");
        let user = provider.login(&placeholder, &ctx).await.unwrap();
        assert_eq!(user.username, "alice");
        assert!(user.roles.contains(crate::user::Role::User));
        let _ = RoleSet::new();
    }

    #[tokio::test]
    async fn validate_user_requires_known_username() {
        let key = b"shared-secret".to_vec();
        let verifier = Arc::new(LoginTokenVerifier::new(key.clone()));
        let repo = Arc::new(InMemoryUserRepository::new());
        let provider = JwtSessionProvider::new(verifier, repo, true, false, false);

        let token = token_for(&key, "ghost", &[]);
        let ctx = ctx(&token);

        let placeholder = provider.can_login(None, &ctx).await.expect("should claim");
        assert!(matches!(provider.login(&placeholder, &ctx).await, Err(ProviderError::UnknownUser)));
    }

    #[tokio::test]
    async fn sync_user_on_login_persists_a_new_row() {
        let key = b"shared-secret".to_vec();
        let verifier = Arc::new(LoginTokenVerifier::new(key.clone()));
        let repo = Arc::new(InMemoryUserRepository::new());
        let provider = JwtSessionProvider::new(verifier, repo.clone(), false, true, false);

        let token = token_for(&key, "carol", &["user"]);
        let ctx = ctx(&token);
        let placeholder = provider.can_login(None, &ctx).await.unwrap();
        provider.login(&placeholder, &ctx).await.unwrap();

        assert!(repo.find_by_username("carol").await.unwrap().is_some());
    }
}
