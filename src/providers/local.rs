//! Username/bcrypt-password provider (spec §4.8). Closest teacher analogue is
//! `api/webapp.rs`'s `argon2::Argon2::verify_password` against a stored
//! `PasswordHash`; the spec mandates bcrypt so the verification call is
//! swapped accordingly (see DESIGN.md).

use std::sync::Arc;

use async_trait::async_trait;

use super::{LoginContext, Provider};
use crate::error::ProviderError;
use crate::repository::UserRepository;
use crate::user::{AuthSource, AuthType, User};

pub struct LocalProvider {
    repository: Arc<dyn UserRepository>,
}

impl LocalProvider {
    pub fn new(repository: Arc<dyn UserRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    /// Claims the attempt only when the resolved repository row exists and
    /// is itself a local-password account (spec §4.8) — an unknown username
    /// or an LDAP/OIDC-sourced row falls through to `NoProviderApplicable`
    /// rather than surfacing as `BadCredentials` here.
    async fn can_login(&self, user: Option<&User>, ctx: &LoginContext<'_>) -> Option<User> {
        ctx.username?;
        ctx.password?;
        let user = user?;
        matches!(user.auth_source, AuthSource::LocalPassword).then(|| user.clone())
    }

    async fn login(&self, user: &User, ctx: &LoginContext<'_>) -> Result<User, ProviderError> {
        let password = ctx.password.ok_or(ProviderError::BadCredentials)?;

        if user.password.is_empty() {
            // An LDAP- or OIDC-sourced account has no local password at all;
            // treat identically to a wrong password (spec §4.8, §4.9).
            return Err(ProviderError::BadCredentials);
        }

        let matches = bcrypt::verify(password, user.password.as_str()).map_err(|e| ProviderError::Io(e.into()))?;

        if !matches {
            return Err(ProviderError::BadCredentials);
        }

        let mut user = user.clone();
        user.auth_type = AuthType::Session;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryUserRepository;
    use crate::user::{AuthSource, PasswordHash};

    fn repo_with_user(username: &str, password: &str) -> Arc<InMemoryUserRepository> {
        let repo = Arc::new(InMemoryUserRepository::new());
        let hash = bcrypt::hash(password, bcrypt::DEFAULT_COST).unwrap();
        let mut user = User::new(username, AuthSource::LocalPassword);
        user.password = PasswordHash::new(hash);
        repo.seed(user);
        repo
    }

    fn ctx<'a>(username: &'a str, password: &'a str) -> LoginContext<'a> {
        LoginContext {
            username: Some(username),
            password: Some(password),
            bearer_token: None,
            cookie_token: None,
            source_ip: "127.0.0.1",
        }
    }

    #[tokio::test]
    async fn correct_password_logs_in() {
        let repo = repo_with_user("alice", "hunter2");
        let candidate = repo.find_by_username("alice").await.unwrap();
        let provider = LocalProvider::new(repo);
        let ctx = ctx("alice", "hunter2");

        let claimed = provider.can_login(candidate.as_ref(), &ctx).await.expect("should claim");
        let user = provider.login(&claimed, &ctx).await.unwrap();
        assert_eq!(user.username, "alice");
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let repo = repo_with_user("alice", "hunter2");
        let candidate = repo.find_by_username("alice").await.unwrap();
        let provider = LocalProvider::new(repo);
        let ctx = ctx("alice", "wrong");

        let claimed = provider.can_login(candidate.as_ref(), &ctx).await.expect("should claim");
        assert!(matches!(provider.login(&claimed, &ctx).await, Err(ProviderError::BadCredentials)));
    }

    #[tokio::test]
    async fn unknown_username_does_not_claim_the_attempt() {
        let repo = Arc::new(InMemoryUserRepository::new());
        let provider = LocalProvider::new(repo);
        let ctx = ctx("ghost", "whatever");

        assert!(provider.can_login(None, &ctx).await.is_none());
    }

    #[tokio::test]
    async fn ldap_sourced_account_does_not_claim_the_attempt() {
        let repo = Arc::new(InMemoryUserRepository::new());
        repo.seed(User::new("bob", AuthSource::Ldap));
        let candidate = repo.find_by_username("bob").await.unwrap();
        let provider = LocalProvider::new(repo);
        let ctx = ctx("bob", "anything");

        assert!(provider.can_login(candidate.as_ref(), &ctx).await.is_none());
    }
}
