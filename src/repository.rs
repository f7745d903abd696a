//! `UserRepository` — the external collaborator this crate consumes but does
//! not own (spec §1, §2). Only the contract is specified here; a real
//! deployment backs this with the job-monitoring backend's SQL store.
//!
//! An in-memory implementation is provided for tests and for running the
//! auth core standalone.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::user::{AuthSource, User};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// CRUD of `User` rows, lookup by username, and bulk listing of LDAP-sourced
/// usernames (spec §2, used by LDAPProvider's sync state machine).
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError>;

    /// Insert or update a row, keyed by `username`.
    async fn upsert(&self, user: User) -> Result<(), RepositoryError>;

    async fn delete(&self, username: &str) -> Result<(), RepositoryError>;

    /// All usernames currently persisted with `auth_source = ldap` (used by
    /// the LDAP bulk sync to compute `DB \ LDAP` and `DB ∩ LDAP`).
    async fn list_ldap_usernames(&self) -> Result<Vec<String>, RepositoryError>;
}

/// Reference implementation backed by a `RwLock<HashMap>`. Adequate for
/// tests; a production deployment swaps this for a SQL-backed implementation
/// of the same trait without touching any provider code.
#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<String, User>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, user: User) {
        self.users.write().insert(user.username.clone(), user);
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.read().get(username).cloned())
    }

    async fn upsert(&self, user: User) -> Result<(), RepositoryError> {
        self.users.write().insert(user.username.clone(), user);
        Ok(())
    }

    async fn delete(&self, username: &str) -> Result<(), RepositoryError> {
        self.users.write().remove(username);
        Ok(())
    }

    async fn list_ldap_usernames(&self) -> Result<Vec<String>, RepositoryError> {
        Ok(self
            .users
            .read()
            .values()
            .filter(|u| matches!(u.auth_source, AuthSource::Ldap))
            .map(|u| u.username.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::RoleSet;

    #[tokio::test]
    async fn upsert_then_find_round_trips() {
        let repo = InMemoryUserRepository::new();
        let mut user = User::new("alice", AuthSource::LocalPassword);
        user.roles = RoleSet::from_raw(["user"]);
        repo.upsert(user.clone()).await.unwrap();

        let found = repo.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(found.username, "alice");
    }

    #[tokio::test]
    async fn list_ldap_usernames_filters_by_auth_source() {
        let repo = InMemoryUserRepository::new();
        repo.upsert(User::new("bob", AuthSource::Ldap)).await.unwrap();
        repo.upsert(User::new("carol", AuthSource::Ldap)).await.unwrap();
        repo.upsert(User::new("dave", AuthSource::LocalPassword)).await.unwrap();

        let mut ldap_users = repo.list_ldap_usernames().await.unwrap();
        ldap_users.sort();
        assert_eq!(ldap_users, vec!["bob".to_owned(), "carol".to_owned()]);
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let repo = InMemoryUserRepository::new();
        repo.upsert(User::new("carol", AuthSource::Ldap)).await.unwrap();
        repo.delete("carol").await.unwrap();
        assert!(repo.find_by_username("carol").await.unwrap().is_none());
    }
}
