//! Identity value type shared by every provider and the request context.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Closed role enumeration (spec §3, §6). Unknown strings are discarded at
/// ingress rather than rejected, so a legacy or foreign claim set degrades
/// gracefully instead of locking the caller out entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Anonymous,
    Api,
    User,
    Manager,
    Support,
    Admin,
}

impl Role {
    /// Precedence used by [`AuthLevel`] and display, highest first.
    const PRECEDENCE: [Role; 6] = [
        Role::Admin,
        Role::Support,
        Role::Manager,
        Role::User,
        Role::Api,
        Role::Anonymous,
    ];

    /// Parses a role string case-insensitively, returning `None` for anything
    /// outside the closed enumeration instead of erroring.
    pub fn parse(raw: &str) -> Option<Role> {
        match raw.to_ascii_lowercase().as_str() {
            "anonymous" => Some(Role::Anonymous),
            "api" => Some(Role::Api),
            "user" => Some(Role::User),
            "manager" => Some(Role::Manager),
            "support" => Some(Role::Support),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Anonymous => "anonymous",
            Role::Api => "api",
            Role::User => "user",
            Role::Manager => "manager",
            Role::Support => "support",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Highest-precedence role held by a user, used for display purposes only —
/// membership checks always go through `HasRole`/`HasAnyRole`/etc, never this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthLevel {
    Role(Role),
    /// Empty role set: boundary case called out in spec §8.
    Error,
}

impl fmt::Display for AuthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthLevel::Role(role) => role.fmt(f),
            AuthLevel::Error => f.write_str("error"),
        }
    }
}

/// A set of roles, filtering out anything outside the closed enumeration on
/// construction (spec invariant P1) and normalizing to canonical lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(role: Role) -> Self {
        let mut set = BTreeSet::new();
        set.insert(role);
        Self(set)
    }

    /// Builds a `RoleSet` from arbitrary strings, discarding unknown values
    /// per spec §3 invariants.
    pub fn from_raw<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(raw.into_iter().filter_map(|s| Role::parse(s.as_ref())).collect())
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    pub fn has_any(&self, roles: &[Role]) -> bool {
        roles.iter().any(|r| self.0.contains(r))
    }

    pub fn has_all(&self, roles: &[Role]) -> bool {
        roles.iter().all(|r| self.0.contains(r))
    }

    pub fn has_none(&self, roles: &[Role]) -> bool {
        !self.has_any(roles)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }

    /// Display/`AuthLevel` accessor: highest-precedence role present, or
    /// `AuthLevel::Error` for an empty set.
    pub fn auth_level(&self) -> AuthLevel {
        Role::PRECEDENCE
            .into_iter()
            .find(|role| self.0.contains(role))
            .map(AuthLevel::Role)
            .unwrap_or(AuthLevel::Error)
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<T: IntoIterator<Item = Role>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A set of HPC project identifiers the user owns or manages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectSet(BTreeSet<String>);

impl ProjectSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_raw<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(raw.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, project: &str) -> bool {
        self.0.contains(project)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// How the identity on the *current request* was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthType {
    Session,
    Token,
}

/// Where the persisted `User` row originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthSource {
    LocalPassword,
    Ldap,
    Token,
    Oidc,
    All,
    #[serde(rename = "none")]
    None,
}

/// bcrypt hash wrapper: never `Debug`/`Display`s its contents and zeroizes on
/// drop, following the teacher's `config::dto::Password` newtype.
#[derive(Clone, Default, Zeroize)]
#[zeroize(drop)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordHash").finish_non_exhaustive()
    }
}

impl PartialEq for PasswordHash {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for PasswordHash {}

/// Identity-carrying value, owned by the `UserRepository` for persistence and
/// copied freely into the request context (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub username: String,
    pub name: String,
    pub email: Option<String>,
    pub password: PasswordHash,
    pub roles: RoleSet,
    pub projects: ProjectSet,
    pub auth_type: AuthType,
    pub auth_source: AuthSource,
}

impl User {
    /// Bare user obtained from a repository lookup, with no auth established
    /// yet. Callers must set `auth_type` before attaching to a request.
    pub fn new(username: impl Into<String>, auth_source: AuthSource) -> Self {
        Self {
            username: username.into(),
            name: String::new(),
            email: None,
            password: PasswordHash::default(),
            roles: RoleSet::new(),
            projects: ProjectSet::new(),
            auth_type: AuthType::Session,
            auth_source,
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(role)
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        self.roles.has_any(roles)
    }

    pub fn has_all_roles(&self, roles: &[Role]) -> bool {
        self.roles.has_all(roles)
    }

    pub fn has_not_roles(&self, roles: &[Role]) -> bool {
        self.roles.has_none(roles)
    }

    pub fn has_project(&self, project: &str) -> bool {
        self.projects.contains(project)
    }

    pub fn auth_level(&self) -> AuthLevel {
        self.roles.auth_level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_role_strings_are_discarded() {
        let roles = RoleSet::from_raw(["user", "wizard", "ADMIN"]);
        assert!(roles.contains(Role::User));
        assert!(roles.contains(Role::Admin));
        assert_eq!(roles.iter().count(), 2);
    }

    #[test]
    fn has_all_any_not_roles_agree_with_set_semantics() {
        let roles = RoleSet::from_raw(["user", "manager"]);
        assert!(roles.has_all(&[Role::User, Role::Manager]));
        assert!(!roles.has_all(&[Role::User, Role::Admin]));
        assert!(roles.has_any(&[Role::Admin, Role::Manager]));
        assert!(!roles.has_any(&[Role::Admin, Role::Support]));
        assert!(roles.has_none(&[Role::Admin, Role::Support]));
        assert!(!roles.has_none(&[Role::User]));
    }

    #[test]
    fn empty_role_set_has_error_auth_level_and_has_not_roles_anonymous() {
        let roles = RoleSet::new();
        assert_eq!(roles.auth_level(), AuthLevel::Error);
        assert!(roles.has_none(&[Role::Anonymous]));
    }

    #[test]
    fn auth_level_picks_highest_precedence_role() {
        let roles = RoleSet::from_raw(["user", "admin", "api"]);
        assert_eq!(roles.auth_level(), AuthLevel::Role(Role::Admin));
    }
}
