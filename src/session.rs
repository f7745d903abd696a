//! Cookie-backed `SessionStore` (spec §4.3). No server-side session table:
//! the cookie itself carries the payload, signed by axum-extra's
//! `SignedCookieJar` so tampering is detectable without a lookup.

use axum_extra::extract::cookie::{Cookie, Key, SameSite};
use axum_extra::extract::SignedCookieJar;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::Duration as TimeDuration;

use crate::user::{AuthSource, AuthType, ProjectSet, RoleSet, User};

pub const SESSION_COOKIE_NAME: &str = "session";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session cookie present but malformed")]
    Malformed(#[from] serde_json::Error),
}

/// What a session cookie carries: enough to reconstruct a `User` without a
/// repository round trip on every request (spec §4.3 design notes — roles
/// are snapshotted at login time, see DESIGN.md open-question resolution).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionPayload {
    username: String,
    name: String,
    roles: RoleSet,
    projects: ProjectSet,
}

impl From<&User> for SessionPayload {
    fn from(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            name: user.name.clone(),
            roles: user.roles.clone(),
            projects: user.projects.clone(),
        }
    }
}

pub struct SessionStore {
    key: Key,
    max_age: Option<std::time::Duration>,
    secure: bool,
}

impl SessionStore {
    pub fn new(key: Key, max_age: Option<std::time::Duration>, secure: bool) -> Self {
        Self { key, max_age, secure }
    }

    pub fn key(&self) -> Key {
        self.key.clone()
    }

    /// Distinguishes "no session cookie at all" from "a cookie is present but
    /// fails to verify or deserialize" (spec §4.3 edge cases) — callers treat
    /// both as anonymous, but the distinction matters for logging.
    pub fn load(&self, jar: &SignedCookieJar) -> Result<Option<User>, SessionError> {
        let Some(cookie) = jar.get(SESSION_COOKIE_NAME) else {
            return Ok(None);
        };

        let payload: SessionPayload = serde_json::from_str(cookie.value())?;

        Ok(Some(User {
            username: payload.username,
            name: payload.name,
            email: None,
            password: crate::user::PasswordHash::default(),
            roles: payload.roles,
            projects: payload.projects,
            auth_type: AuthType::Session,
            auth_source: AuthSource::All,
        }))
    }

    /// Sets the signed session cookie, `HttpOnly` and `SameSite=Strict`,
    /// `Secure` when the service is reachable over TLS (spec §4.3).
    pub fn save(&self, jar: SignedCookieJar, user: &User) -> Result<SignedCookieJar, SessionError> {
        let payload = SessionPayload::from(user);
        let value = serde_json::to_string(&payload)?;

        let mut cookie = Cookie::new(SESSION_COOKIE_NAME, value);
        cookie.set_http_only(true);
        cookie.set_same_site(SameSite::Strict);
        cookie.set_secure(self.secure);
        cookie.set_path("/");
        if let Some(max_age) = self.max_age {
            cookie.set_max_age(Some(TimeDuration::seconds(max_age.as_secs() as i64)));
        }

        Ok(jar.add(cookie))
    }

    /// Clears the session cookie on logout, or after a one-shot
    /// JWTCookieSession login (spec §4.3, P4).
    pub fn clear(&self, jar: SignedCookieJar) -> SignedCookieJar {
        let mut cookie = Cookie::new(SESSION_COOKIE_NAME, "");
        cookie.set_path("/");
        jar.remove(cookie)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(Key::generate(), Some(std::time::Duration::from_secs(3600)), false)
    }

    fn empty_jar(store: &SessionStore) -> SignedCookieJar {
        SignedCookieJar::new(store.key())
    }

    #[test]
    fn missing_cookie_loads_as_none() {
        let store = store();
        let jar = empty_jar(&store);
        assert!(store.load(&jar).unwrap().is_none());
    }

    #[test]
    fn save_then_load_round_trips_identity() {
        let store = store();
        let mut user = User::new("alice", AuthSource::LocalPassword);
        user.roles = RoleSet::from_raw(["user", "manager"]);
        user.projects = ProjectSet::from_raw(["proj-a"]);

        let jar = empty_jar(&store);
        let jar = store.save(jar, &user).unwrap();

        let loaded = store.load(&jar).unwrap().unwrap();
        assert_eq!(loaded.username, "alice");
        assert!(loaded.has_role(crate::user::Role::Manager));
        assert!(loaded.has_project("proj-a"));
        assert_eq!(loaded.auth_type, AuthType::Session);
    }

    #[test]
    fn clear_removes_the_cookie() {
        let store = store();
        let user = User::new("alice", AuthSource::LocalPassword);
        let jar = empty_jar(&store);
        let jar = store.save(jar, &user).unwrap();
        assert!(store.load(&jar).unwrap().is_some());

        let jar = store.clear(jar);
        assert!(store.load(&jar).unwrap().is_none());
    }

}
