//! OIDC Authorization Code + PKCE (S256) + nonce (spec §4.10). Invoked from
//! its own `/oidc-login` / `/oidc-callback` routes rather than the
//! `AuthService` login dispatch chain, since it's a two-step redirect flow
//! rather than a single request. Claim extraction follows the
//! Keycloak-style `realm_access`/`resource_access` role merging pattern
//! (other_examples `kregerl-Water-Of-Life` `services/oidc.rs`).

use std::collections::HashMap;

use picky::jose::jwk::JwkSet;
use picky::jose::jws::{JwsAlg, RawJws};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::user::{AuthSource, AuthType, Role, RoleSet, User};

#[derive(Debug, Error)]
pub enum OidcError {
    #[error("state parameter mismatch")]
    StateMismatch,
    #[error("nonce claim mismatch")]
    NonceMismatch,
    #[error("code exchange failed: {0}")]
    Exchange(#[from] reqwest::Error),
    #[error("malformed id_token")]
    MalformedIdToken,
    #[error("id_token signature or claims invalid")]
    InvalidIdToken,
    #[error("id_token audience does not match this client")]
    AudienceMismatch,
    #[error("id_token issuer does not match the configured provider")]
    IssuerMismatch,
}

impl From<OidcError> for crate::http::HttpError {
    fn from(_: OidcError) -> Self {
        crate::http::HttpError::unauthorized().msg("oidc login failed")
    }
}

#[derive(Debug)]
pub struct OidcConfig {
    pub issuer: String,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub jwks_uri: Url,
    pub userinfo_endpoint: Option<Url>,
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: Url,
}

impl Clone for OidcConfig {
    fn clone(&self) -> Self {
        Self {
            issuer: self.issuer.clone(),
            authorization_endpoint: self.authorization_endpoint.clone(),
            token_endpoint: self.token_endpoint.clone(),
            jwks_uri: self.jwks_uri.clone(),
            userinfo_endpoint: self.userinfo_endpoint.clone(),
            client_id: self.client_id.clone(),
            client_secret: SecretString::from(self.client_secret.expose_secret().to_owned()),
            redirect_uri: self.redirect_uri.clone(),
        }
    }
}

/// The three correlated values generated at `/oidc-login` time and verified
/// at `/oidc-callback` (spec §4.10): `state` against CSRF, `nonce` against
/// id_token replay, `code_verifier` for PKCE S256.
pub struct PendingAuthorization {
    pub state: String,
    pub nonce: String,
    pub code_verifier: String,
}

fn random_url_safe(len: usize) -> String {
    use base64::Engine as _;
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

pub struct OidcProvider {
    config: OidcConfig,
    http: reqwest::Client,
}

impl OidcProvider {
    pub fn new(config: OidcConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Starts a new flow: generates `state`/`nonce`/PKCE verifier and builds
    /// the redirect URL to the authorization endpoint.
    pub fn begin(&self) -> (PendingAuthorization, Url) {
        let state = random_url_safe(24);
        let nonce = random_url_safe(24);
        let code_verifier = random_url_safe(48);

        let challenge = {
            use base64::Engine as _;
            let digest = Sha256::digest(code_verifier.as_bytes());
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
        };

        let mut url = self.config.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("scope", "openid profile email")
            .append_pair("state", &state)
            .append_pair("nonce", &nonce)
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", "S256");

        (
            PendingAuthorization {
                state,
                nonce,
                code_verifier,
            },
            url,
        )
    }

    /// Fetches the provider's JWKS and verifies the id_token's signature,
    /// `aud` and `iss` claims (spec §4.10) before any claim is trusted.
    async fn verify_id_token(&self, id_token: &str) -> Result<IdTokenClaims, OidcError> {
        let raw_jws = RawJws::decode(id_token).map_err(|_| OidcError::MalformedIdToken)?;

        let jwk_set: JwkSet = self
            .http
            .get(self.config.jwks_uri.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let key = jwk_set
            .keys
            .iter()
            .find_map(|jwk| jwk.to_public_key().ok())
            .ok_or(OidcError::InvalidIdToken)?;

        if raw_jws.header.alg != JwsAlg::RS256 && raw_jws.header.alg != JwsAlg::ES256 {
            return Err(OidcError::InvalidIdToken);
        }

        let jws = raw_jws.verify(&key).map_err(|_| OidcError::InvalidIdToken)?;
        let claims: IdTokenClaims = serde_json::from_slice(jws.payload()).map_err(|_| OidcError::MalformedIdToken)?;

        if claims.aud != self.config.client_id {
            return Err(OidcError::AudienceMismatch);
        }

        if claims.iss != self.config.issuer {
            return Err(OidcError::IssuerMismatch);
        }

        Ok(claims)
    }

    /// Fetches the UserInfo endpoint and overlays its display fields onto
    /// `user` (spec §4.10). Tolerated on failure since the id_token is
    /// already independently verified and authoritative.
    async fn enrich_from_userinfo(&self, access_token: &str, user: &mut User) {
        let Some(endpoint) = &self.config.userinfo_endpoint else {
            return;
        };

        let response = self
            .http
            .get(endpoint.clone())
            .bearer_auth(access_token)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);

        let Ok(response) = response else {
            return;
        };

        let Ok(info) = response.json::<UserInfo>().await else {
            return;
        };

        if let Some(username) = info.preferred_username {
            user.username = username;
        }
        if let Some(name) = info.name {
            user.name = name;
        }
        if info.email.is_some() {
            user.email = info.email;
        }
    }

    /// Completes the flow: exchanges `code` for tokens, verifies `state`,
    /// the id_token's signature/audience/issuer/nonce, fetches UserInfo, and
    /// builds a `User` from the result.
    pub async fn complete(
        &self,
        pending: &PendingAuthorization,
        returned_state: &str,
        code: &str,
    ) -> Result<User, OidcError> {
        if returned_state != pending.state {
            return Err(OidcError::StateMismatch);
        }

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", &self.config.client_id),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("code_verifier", &pending.code_verifier),
        ];

        let token_response: TokenResponse = self
            .http
            .post(self.config.token_endpoint.clone())
            .form(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let claims = self.verify_id_token(&token_response.id_token).await?;

        if claims.nonce.as_deref() != Some(pending.nonce.as_str()) {
            return Err(OidcError::NonceMismatch);
        }

        let mut user = User {
            username: claims.preferred_username.clone().unwrap_or_else(|| claims.sub.clone()),
            name: claims.name.clone().unwrap_or_default(),
            email: claims.email.clone(),
            password: crate::user::PasswordHash::default(),
            roles: merge_roles(&claims, &self.config.client_id),
            projects: Default::default(),
            auth_type: AuthType::Session,
            auth_source: AuthSource::Oidc,
        };

        self.enrich_from_userinfo(&token_response.access_token, &mut user).await;

        Ok(user)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RealmAccess {
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    aud: String,
    iss: String,
    #[serde(default)]
    nonce: Option<String>,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    realm_access: Option<RealmAccess>,
    #[serde(default)]
    resource_access: Option<HashMap<String, RealmAccess>>,
}

/// Merges `realm_access.roles` with the client's own `resource_access.roles`
/// entry, following the Keycloak convention (other_examples/`oidc.rs`).
/// Defaults to `{user}` when the provider's token carries no recognized
/// role claim at all (spec §4.10).
fn merge_roles(claims: &IdTokenClaims, client_id: &str) -> RoleSet {
    let mut raw: Vec<String> = Vec::new();

    if let Some(realm) = &claims.realm_access {
        raw.extend(realm.roles.iter().cloned());
    }

    if let Some(resource_access) = &claims.resource_access {
        if let Some(client_roles) = resource_access.get(client_id) {
            raw.extend(client_roles.roles.iter().cloned());
        }
    }

    let roles = RoleSet::from_raw(raw);
    if roles.is_empty() {
        RoleSet::single(Role::User)
    } else {
        roles
    }
}
