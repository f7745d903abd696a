//! Ed25519 (EdDSA) bearer/cookie JWT verification and issuance (spec §4.4).
//!
//! Two key sources are supported at once: the service's own keypair (used to
//! verify self-issued tokens and to `Issue` new ones) and a trusted external
//! issuer's public key (cross-login JWTs minted by another deployment).
//! Mirrors the teacher's `TokenValidator` (`token.rs`): a struct wrapping
//! the verification call, `RawJws::decode` → `.verify(key)` →
//! `JwtSig::validate` against a `JwtValidator`.

use std::sync::Arc;

use picky::jose::jws::{JwsAlg, RawJws};
use picky::jose::jwt::{JwtDate, JwtSig, JwtValidator};
use picky::key::{PrivateKey, PublicKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::repository::UserRepository;
use crate::user::{AuthSource, AuthType, ProjectSet, RoleSet, User};

const LEEWAY_SECS: u16 = 60;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("missing sub claim")]
    MissingSub,
    #[error("token expired")]
    Expired,
    #[error("invalid JWS token")]
    Jws(#[from] picky::jose::jws::JwsError),
    #[error("invalid JWT claims")]
    Jwt(#[from] picky::jose::jwt::JwtError),
    #[error("only EdDSA tokens are accepted")]
    AlgorithmNotAllowed,
    #[error("signature verification failed using {key}")]
    SignatureVerification { key: &'static str },
    #[error("sub {sub:?} is not a known user")]
    UnknownUser { sub: String },
    #[error("malformed claims: {0}")]
    MalformedClaims(#[from] serde_json::Error),
    #[error("no private key configured, cannot issue tokens")]
    NoSigningKey,

    #[error("repository lookup failed: {0}")]
    Repository(#[from] anyhow::Error),
}

impl From<TokenError> for crate::http::HttpError {
    fn from(err: TokenError) -> Self {
        use crate::http::HttpError;
        match err {
            TokenError::UnknownUser { .. } => HttpError::unauthorized().msg("authentication failed"),
            _ => HttpError::unauthorized().msg("unauthorized"),
        }
    }
}

/// Wire shape of a JWT's `name` claim: either a plain string, or the nested
/// `{values: [...]}` shape emitted by some Java/Grails issuers (spec §3),
/// space-joined into a display name.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum NameClaim {
    Plain(String),
    Nested { values: Vec<String> },
}

impl NameClaim {
    fn into_display_name(self) -> String {
        match self {
            NameClaim::Plain(s) => s,
            NameClaim::Nested { values } => values.join(" "),
        }
    }
}

/// Accepts `roles` as either a JSON array or a single string (spec §3).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RolesClaim {
    Many(Vec<String>),
    One(String),
}

impl RolesClaim {
    fn into_role_set(self) -> RoleSet {
        match self {
            RolesClaim::Many(values) => RoleSet::from_raw(values),
            RolesClaim::One(value) => RoleSet::from_raw([value]),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawClaims {
    pub sub: String,
    pub iss: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default)]
    roles: Option<RolesClaim>,
    #[serde(default)]
    projects: Option<Vec<String>>,
    #[serde(default)]
    name: Option<NameClaim>,
}

/// Claims extracted after signature + expiry verification, before the
/// `validate-user` database override is applied.
pub struct VerifiedClaims {
    pub username: String,
    pub name: String,
    pub roles: RoleSet,
    pub projects: ProjectSet,
}

pub struct JwtKeys {
    pub own_public: PublicKey,
    pub own_private: Option<PrivateKey>,
    pub trusted_external_public: Option<PublicKey>,
    pub trusted_external_issuer: Option<String>,
}

pub struct JwtVerifier {
    keys: JwtKeys,
    /// When set, `sub` must name a known user and roles come from the
    /// database rather than the token (spec §4.4 step 4).
    pub validate_user: bool,
    repository: Arc<dyn UserRepository>,
    max_age: std::time::Duration,
}

impl JwtVerifier {
    pub fn new(keys: JwtKeys, validate_user: bool, repository: Arc<dyn UserRepository>, max_age: std::time::Duration) -> Self {
        Self {
            keys,
            validate_user,
            repository,
            max_age,
        }
    }

    /// Peeks the unvalidated `iss` claim to pick which key verifies the
    /// signature (spec §4.4 step 2), then validates signature and `exp`.
    pub fn decode_and_verify(&self, token: &str) -> Result<RawClaims, TokenError> {
        let raw_jws = RawJws::decode(token)?;

        if raw_jws.header.alg != JwsAlg::EdDSA {
            return Err(TokenError::AlgorithmNotAllowed);
        }

        let unvalidated: RawClaims = serde_json::from_slice(raw_jws.payload())?;

        let (key, key_name): (&PublicKey, &'static str) = match (&unvalidated.iss, &self.keys.trusted_external_issuer) {
            (Some(iss), Some(trusted_iss)) if iss == trusted_iss => match &self.keys.trusted_external_public {
                Some(key) => (key, "trusted external key"),
                None => (&self.keys.own_public, "own key"),
            },
            _ => (&self.keys.own_public, "own key"),
        };

        let jwt_sig: JwtSig = raw_jws
            .verify(key)
            .map(JwtSig::from)
            .map_err(|_| TokenError::SignatureVerification { key: key_name })?;

        let now = JwtDate::new_with_leeway(OffsetDateTime::now_utc().unix_timestamp(), LEEWAY_SECS);
        let validator = JwtValidator::strict(now);
        let claims: RawClaims = jwt_sig.validate::<RawClaims>(&validator)?.state.claims;

        Ok(claims)
    }

    /// Full verification pipeline for an incoming request (spec §4.4).
    pub async fn verify(&self, token: &str) -> Result<VerifiedClaims, TokenError> {
        let claims = self.decode_and_verify(token)?;

        if claims.sub.is_empty() {
            return Err(TokenError::MissingSub);
        }

        if self.validate_user {
            let user = self
                .repository
                .find_by_username(&claims.sub)
                .await
                .map_err(|e| TokenError::Repository(e.into()))?
                .ok_or_else(|| TokenError::UnknownUser { sub: claims.sub.clone() })?;

            Ok(VerifiedClaims {
                username: user.username,
                name: user.name,
                roles: user.roles,
                projects: user.projects,
            })
        } else {
            Ok(VerifiedClaims {
                username: claims.sub,
                name: claims.name.map(NameClaim::into_display_name).unwrap_or_default(),
                roles: claims.roles.map(RolesClaim::into_role_set).unwrap_or_default(),
                projects: ProjectSet::from_raw(claims.projects.unwrap_or_default()),
            })
        }
    }

    /// Issues a self-signed token for `user`, `exp = iat + max_age` (spec §4.4).
    pub fn issue(&self, user: &User) -> Result<String, TokenError> {
        let private_key = self.keys.own_private.as_ref().ok_or(TokenError::NoSigningKey)?;

        #[derive(Serialize)]
        struct IssuedClaims<'a> {
            sub: &'a str,
            roles: Vec<&'static str>,
            iat: i64,
            exp: i64,
        }

        let iat = OffsetDateTime::now_utc().unix_timestamp();
        let exp = iat + i64::try_from(self.max_age.as_secs()).unwrap_or(i64::MAX);

        let claims = IssuedClaims {
            sub: &user.username,
            roles: user.roles.iter().map(|r| r.as_str()).collect(),
            iat,
            exp,
        };

        let jwt = picky::jose::jwt::JwtSig::new(JwsAlg::EdDSA, claims);
        jwt.encode(private_key).map_err(TokenError::Jws)
    }
}

pub fn user_from_verified(claims: VerifiedClaims, auth_source: AuthSource) -> User {
    User {
        username: claims.username,
        name: claims.name,
        email: None,
        password: crate::user::PasswordHash::default(),
        roles: claims.roles,
        projects: claims.projects,
        auth_type: AuthType::Token,
        auth_source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_claim_plain_string() {
        let claim: NameClaim = serde_json::from_str(r#""Alice Smith""#).unwrap();
        assert_eq!(claim.into_display_name(), "Alice Smith");
    }

    #[test]
    fn name_claim_nested_values_are_space_joined() {
        let claim: NameClaim = serde_json::from_str(r#"{"values":["A","B","C"]}"#).unwrap();
        assert_eq!(claim.into_display_name(), "A B C");
    }

    #[test]
    fn roles_claim_accepts_single_string_or_array() {
        let as_array: RolesClaim = serde_json::from_str(r#"["user","admin"]"#).unwrap();
        assert!(as_array.into_role_set().contains(crate::user::Role::Admin));

        let as_string: RolesClaim = serde_json::from_str(r#""user""#).unwrap();
        assert!(as_string.into_role_set().contains(crate::user::Role::User));
    }
}
