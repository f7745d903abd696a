//! Authentication and session core for the job-monitoring web backend.
//! See `SPEC_FULL.md` for the full requirements; `DESIGN.md` for how each
//! module is grounded.

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod extract;
pub mod http;
pub mod providers;
pub mod rate_limiter;
pub mod repository;
pub mod service;
pub mod session;
pub mod token;
pub mod user;

use std::sync::Arc;

use axum_extra::extract::cookie::Key;

use crate::config::ConfHandle;
use crate::providers::oidc::OidcProvider;
use crate::repository::UserRepository;
use crate::service::AuthService;
use crate::session::SessionStore;

/// Shared application state threaded through every handler via `State`.
#[derive(Clone)]
pub struct DgwState {
    pub conf_handle: ConfHandle,
    pub auth_service: Arc<AuthService>,
    pub session_key: Key,
    pub session_store: Arc<SessionStore>,
    pub oidc_provider: Option<Arc<OidcProvider>>,
    pub repository: Arc<dyn UserRepository>,
}

impl axum::extract::FromRef<DgwState> for Key {
    fn from_ref(state: &DgwState) -> Self {
        state.session_key.clone()
    }
}
