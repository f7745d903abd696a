//! LDAP bind-based authentication, just-in-time user creation, and periodic
//! bulk directory sync (spec §4.7, §4.9). `ldap3` chosen on the strength of
//! its presence across the retrieved pack's Cargo.toml manifests (see
//! DESIGN.md) — no source-level ldap3 usage example was available, so the
//! bind/search calls below follow the crate's documented builder API.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{LdapConnAsync, Scope, SearchEntry};
use secrecy::{ExposeSecret, SecretString};

use super::{LoginContext, Provider};
use crate::error::ProviderError;
use crate::repository::UserRepository;
use crate::user::{AuthSource, AuthType, Role, RoleSet, User};

#[derive(Debug)]
pub struct LdapConfig {
    pub url: String,
    pub user_base: String,
    /// `{username}` is substituted with the shell-escaped-free username.
    pub user_bind_dn_template: String,
    pub search_filter_template: String,
    pub sync_admin_dn: Option<String>,
    pub sync_admin_password: Option<SecretString>,
    pub sync_interval: Duration,
    /// Admin-bound JIT creation on first login (spec §4.9 `CanLogin`).
    pub sync_user_on_login: bool,
    /// Refresh `roles` from the directory on every subsequent login, not
    /// just the first (spec §3 lifecycle).
    pub update_user_on_login: bool,
    /// Gate on the periodic sweep's `DB \ LDAP` deletion branch (spec §4.7).
    pub sync_del_old_users: bool,
}

impl Clone for LdapConfig {
    fn clone(&self) -> Self {
        Self {
            url: self.url.clone(),
            user_base: self.user_base.clone(),
            user_bind_dn_template: self.user_bind_dn_template.clone(),
            search_filter_template: self.search_filter_template.clone(),
            sync_admin_dn: self.sync_admin_dn.clone(),
            sync_admin_password: self
                .sync_admin_password
                .as_ref()
                .map(|s| SecretString::from(s.expose_secret().to_owned())),
            sync_interval: self.sync_interval,
            sync_user_on_login: self.sync_user_on_login,
            update_user_on_login: self.update_user_on_login,
            sync_del_old_users: self.sync_del_old_users,
        }
    }
}

pub struct LdapProvider {
    config: LdapConfig,
    repository: Arc<dyn UserRepository>,
}

impl LdapProvider {
    pub fn new(config: LdapConfig, repository: Arc<dyn UserRepository>) -> Self {
        Self { config, repository }
    }

    fn bind_dn(&self, username: &str) -> String {
        self.config.user_bind_dn_template.replace("{username}", username)
    }

    /// Binds as the user directly (password verification) and, on success,
    /// returns the directory's roles for JIT creation/update (spec §4.7).
    async fn bind_and_fetch_roles(&self, username: &str, password: &str) -> Result<RoleSet, ProviderError> {
        let (conn, mut ldap) = LdapConnAsync::new(&self.config.url)
            .await
            .map_err(|e| ProviderError::Io(e.into()))?;
        ldap3::drive!(conn);

        let bind_dn = self.bind_dn(username);
        ldap.simple_bind(&bind_dn, password)
            .await
            .map_err(|e| ProviderError::Io(e.into()))?
            .success()
            .map_err(|_| ProviderError::BadCredentials)?;

        let filter = self.config.search_filter_template.replace("{username}", username);
        let (entries, _res) = ldap
            .search(&self.config.user_base, Scope::Subtree, &filter, vec!["memberOf"])
            .await
            .map_err(|e| ProviderError::Io(e.into()))?
            .success()
            .map_err(|e| ProviderError::Io(e.into()))?;

        let roles = entries
            .into_iter()
            .next()
            .map(SearchEntry::construct)
            .map(|entry| entry.attrs.get("memberOf").cloned().unwrap_or_default())
            .map(RoleSet::from_raw)
            .unwrap_or_default();

        ldap.unbind().await.map_err(|e| ProviderError::Io(e.into()))?;

        Ok(roles)
    }

    /// Admin-bound connection for the bulk directory sweep and the
    /// login-time JIT existence check (spec §4.7, §4.9).
    async fn admin_connection(&self) -> Result<ldap3::Ldap, ProviderError> {
        let admin_dn = self.config.sync_admin_dn.as_deref().ok_or_else(|| {
            ProviderError::Io(anyhow::anyhow!("LDAP sync requires sync_admin_dn to be configured"))
        })?;
        let admin_password = self
            .config
            .sync_admin_password
            .as_ref()
            .map(ExposeSecret::expose_secret)
            .map(String::as_str)
            .unwrap_or_default();

        let (conn, mut ldap) = LdapConnAsync::new(&self.config.url)
            .await
            .map_err(|e| ProviderError::Io(e.into()))?;
        ldap3::drive!(conn);
        ldap.simple_bind(admin_dn, admin_password)
            .await
            .map_err(|e| ProviderError::Io(e.into()))?
            .success()
            .map_err(|e| ProviderError::Io(e.into()))?;

        Ok(ldap)
    }

    /// Admin-bound existence check used to decide whether a not-yet-known
    /// username may be JIT-created on login (spec §4.9 `CanLogin`), without
    /// spending the user's own bind attempt before the password has even
    /// been checked.
    async fn directory_entry_exists(&self, username: &str) -> Result<bool, ProviderError> {
        let mut ldap = self.admin_connection().await?;

        let filter = self.config.search_filter_template.replace("{username}", username);
        let (entries, _res) = ldap
            .search(&self.config.user_base, Scope::Subtree, &filter, vec!["uid"])
            .await
            .map_err(|e| ProviderError::Io(e.into()))?
            .success()
            .map_err(|e| ProviderError::Io(e.into()))?;

        ldap.unbind().await.map_err(|e| ProviderError::Io(e.into()))?;

        Ok(!entries.is_empty())
    }

    /// Lists every username currently present in the directory under
    /// `user_base` (spec §4.7, used to compute `LDAP \ DB` and `DB \ LDAP`).
    async fn list_directory_usernames(&self) -> Result<HashSet<String>, ProviderError> {
        let mut ldap = self.admin_connection().await?;

        let (entries, _res) = ldap
            .search(&self.config.user_base, Scope::Subtree, "(objectClass=*)", vec!["uid"])
            .await
            .map_err(|e| ProviderError::Io(e.into()))?
            .success()
            .map_err(|e| ProviderError::Io(e.into()))?;

        let usernames = entries
            .into_iter()
            .map(SearchEntry::construct)
            .filter_map(|entry| entry.attrs.get("uid").and_then(|v| v.first().cloned()))
            .collect();

        ldap.unbind().await.map_err(|e| ProviderError::Io(e.into()))?;

        Ok(usernames)
    }

    /// One sweep of the reconciliation (spec §4.7): `DB \ LDAP` rows are
    /// deleted only when `sync-del-old-users` is set; `LDAP \ DB` usernames
    /// are inserted with role `{user}` and `auth_source = ldap` so they
    /// exist ahead of their first login.
    pub async fn sync_once(&self) -> Result<LdapSyncReport, ProviderError> {
        let directory_usernames = self.list_directory_usernames().await?;
        let db_ldap_usernames: HashSet<String> = self
            .repository
            .list_ldap_usernames()
            .await
            .map_err(|e| ProviderError::Io(e.into()))?
            .into_iter()
            .collect();

        let deleted_stale_count = if self.config.sync_del_old_users {
            let stale: Vec<&String> = db_ldap_usernames.difference(&directory_usernames).collect();
            for username in &stale {
                self.repository.delete(username).await.map_err(|e| ProviderError::Io(e.into()))?;
            }
            stale.len()
        } else {
            0
        };

        let new_in_directory: Vec<&String> = directory_usernames.difference(&db_ldap_usernames).collect();
        for username in &new_in_directory {
            let mut user = User::new(username.as_str(), AuthSource::Ldap);
            user.roles = RoleSet::single(Role::User);
            self.repository.upsert(user).await.map_err(|e| ProviderError::Io(e.into()))?;
        }

        Ok(LdapSyncReport {
            directory_count: directory_usernames.len(),
            deleted_stale_count,
            inserted_new_count: new_in_directory.len(),
        })
    }

    pub fn spawn_periodic_sync(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = self.config.sync_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(err) = self.sync_once().await {
                    tracing::warn!(error = %err, "LDAP directory sync failed");
                }
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LdapSyncReport {
    pub directory_count: usize,
    pub deleted_stale_count: usize,
    pub inserted_new_count: usize,
}

#[async_trait]
impl Provider for LdapProvider {
    fn name(&self) -> &'static str {
        "ldap"
    }

    /// Claims the attempt when the resolved row is already `auth_source =
    /// ldap`, or — when `sync-user-on-login` is set — when the directory
    /// itself has a matching entry, in which case a not-yet-persisted `User`
    /// is returned for JIT creation (spec §4.9).
    async fn can_login(&self, user: Option<&User>, ctx: &LoginContext<'_>) -> Option<User> {
        let username = ctx.username?;
        ctx.password?;

        if let Some(existing) = user {
            if matches!(existing.auth_source, AuthSource::Ldap) {
                return Some(existing.clone());
            }
        }

        if !self.config.sync_user_on_login {
            return None;
        }

        match self.directory_entry_exists(username).await {
            Ok(true) => Some(User::new(username, AuthSource::Ldap)),
            Ok(false) => None,
            Err(err) => {
                tracing::debug!(error = %err, "LDAP JIT existence check failed");
                None
            }
        }
    }

    async fn login(&self, user: &User, ctx: &LoginContext<'_>) -> Result<User, ProviderError> {
        let username = ctx.username.ok_or(ProviderError::BadCredentials)?;
        let password = ctx.password.ok_or(ProviderError::BadCredentials)?;

        let directory_roles = self.bind_and_fetch_roles(username, password).await?;

        let existing = self
            .repository
            .find_by_username(username)
            .await
            .map_err(|e| ProviderError::Io(e.into()))?;

        let mut resolved = user.clone();
        resolved.auth_type = AuthType::Session;
        resolved.auth_source = AuthSource::Ldap;

        // New rows always take the directory's roles; existing rows only
        // refresh them when `update-user-on-login` is set (spec §3 lifecycle).
        if existing.is_none() || self.config.update_user_on_login {
            resolved.roles = directory_roles;
        }

        self.repository
            .upsert(resolved.clone())
            .await
            .map_err(|e| ProviderError::Io(e.into()))?;

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LdapConfig {
        LdapConfig {
            url: "ldap://localhost".into(),
            user_base: "ou=people,dc=example,dc=org".into(),
            user_bind_dn_template: "uid={username},ou=people,dc=example,dc=org".into(),
            search_filter_template: "(uid={username})".into(),
            sync_admin_dn: None,
            sync_admin_password: None,
            sync_interval: Duration::from_secs(3600),
            sync_user_on_login: false,
            update_user_on_login: false,
            sync_del_old_users: false,
        }
    }

    #[test]
    fn bind_dn_template_substitutes_username() {
        let repo = Arc::new(crate::repository::InMemoryUserRepository::new());
        let provider = LdapProvider::new(config(), repo);
        assert_eq!(provider.bind_dn("alice"), "uid=alice,ou=people,dc=example,dc=org");
    }

    #[tokio::test]
    async fn existing_ldap_user_is_claimed_without_consulting_the_sync_flag() {
        let repo = Arc::new(crate::repository::InMemoryUserRepository::new());
        let provider = LdapProvider::new(config(), repo);
        let existing = User::new("alice", AuthSource::Ldap);
        let ctx = LoginContext {
            username: Some("alice"),
            password: Some("hunter2"),
            bearer_token: None,
            cookie_token: None,
            source_ip: "127.0.0.1",
        };

        let claimed = provider.can_login(Some(&existing), &ctx).await;
        assert_eq!(claimed.map(|u| u.username), Some("alice".to_owned()));
    }

    #[tokio::test]
    async fn local_password_account_is_not_claimed_without_sync_user_on_login() {
        let repo = Arc::new(crate::repository::InMemoryUserRepository::new());
        let provider = LdapProvider::new(config(), repo);
        let existing = User::new("bob", AuthSource::LocalPassword);
        let ctx = LoginContext {
            username: Some("bob"),
            password: Some("hunter2"),
            bearer_token: None,
            cookie_token: None,
            source_ip: "127.0.0.1",
        };

        assert!(provider.can_login(Some(&existing), &ctx).await.is_none());
    }
}
