//! HS256/HS512 "login token" verification (spec §4.5) — a one-shot, HMAC
//! signed credential distinct from the Ed25519 bearer/cookie JWTs in
//! [`super::jwt`]. `picky`'s JOSE support only covers asymmetric JWS, so the
//! HS256/HS512 case is hand-rolled directly against `hmac`+`sha2`, following
//! the manual-framing style the teacher uses for its own replay cache keys.

use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Sha256, Sha512};
use thiserror::Error;

use crate::user::RoleSet;

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::URL_SAFE_NO_PAD;

#[derive(Debug, Error)]
pub enum LoginTokenError {
    #[error("malformed token: expected header.payload.signature")]
    Malformed,
    #[error("unsupported alg {0:?}, expected HS256 or HS512")]
    UnsupportedAlg(String),
    #[error("invalid base64 in token")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid JSON in token")]
    Json(#[from] serde_json::Error),
    #[error("signature mismatch")]
    BadSignature,
    #[error("invalid key length")]
    BadKey,
    #[error("token expired")]
    Expired,
}

impl From<LoginTokenError> for crate::http::HttpError {
    fn from(_: LoginTokenError) -> Self {
        crate::http::HttpError::unauthorized().msg("unauthorized")
    }
}

#[derive(Debug, Deserialize)]
struct Header {
    alg: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginTokenClaims {
    pub sub: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub exp: i64,
}

pub struct LoginTokenVerifier {
    key: Vec<u8>,
}

impl LoginTokenVerifier {
    pub fn new(key: Vec<u8>) -> Self {
        Self { key }
    }

    /// Verifies signature then deserializes the payload. Returns the claims
    /// with `roles` already filtered into the closed enumeration.
    pub fn verify(&self, token: &str) -> Result<(LoginTokenClaims, RoleSet), LoginTokenError> {
        let mut parts = token.split('.');
        let (header_b64, payload_b64, sig_b64) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(p), Some(s), None) => (h, p, s),
            _ => return Err(LoginTokenError::Malformed),
        };

        let header_bytes = B64.decode(header_b64)?;
        let header: Header = serde_json::from_slice(&header_bytes)?;

        let signing_input = format!("{header_b64}.{payload_b64}");
        let expected_sig = match header.alg.as_str() {
            "HS256" => {
                let mut mac = Hmac::<Sha256>::new_from_slice(&self.key).map_err(|_| LoginTokenError::BadKey)?;
                mac.update(signing_input.as_bytes());
                mac.finalize().into_bytes().to_vec()
            }
            "HS512" => {
                let mut mac = Hmac::<Sha512>::new_from_slice(&self.key).map_err(|_| LoginTokenError::BadKey)?;
                mac.update(signing_input.as_bytes());
                mac.finalize().into_bytes().to_vec()
            }
            other => return Err(LoginTokenError::UnsupportedAlg(other.to_owned())),
        };

        let given_sig = B64.decode(sig_b64)?;
        if !constant_time_eq(&expected_sig, &given_sig) {
            return Err(LoginTokenError::BadSignature);
        }

        let payload_bytes = B64.decode(payload_b64)?;
        let claims: LoginTokenClaims = serde_json::from_slice(&payload_bytes)?;

        if claims.exp <= time::OffsetDateTime::now_utc().unix_timestamp() {
            return Err(LoginTokenError::Expired);
        }

        let roles = RoleSet::from_raw(&claims.roles);

        Ok((claims, roles))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(key: &[u8], alg: &str, payload_json: &str) -> String {
        let header = format!(r#"{{"alg":"{alg}","typ":"JWT"}}"#);
        let header_b64 = B64.encode(header.as_bytes());
        let payload_b64 = B64.encode(payload_json.as_bytes());
        let signing_input = format!("{header_b64}.{payload_b64}");

        let sig = match alg {
            "HS256" => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key).unwrap();
                mac.update(signing_input.as_bytes());
                mac.finalize().into_bytes().to_vec()
            }
            "HS512" => {
                let mut mac = Hmac::<Sha512>::new_from_slice(key).unwrap();
                mac.update(signing_input.as_bytes());
                mac.finalize().into_bytes().to_vec()
            }
            _ => unreachable!(),
        };

        format!("{signing_input}.{}", B64.encode(sig))
    }

    fn far_future_exp() -> i64 {
        time::OffsetDateTime::now_utc().unix_timestamp() + 3600
    }

    #[test]
    fn hs256_round_trips() {
        let key = b"test-key-material".to_vec();
        let payload = format!(r#"{{"sub":"alice","roles":["user"],"exp":{}}}"#, far_future_exp());
        let token = sign(&key, "HS256", &payload);

        let verifier = LoginTokenVerifier::new(key);
        let (claims, roles) = verifier.verify(&token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert!(roles.contains(crate::user::Role::User));
    }

    #[test]
    fn hs512_round_trips() {
        let key = b"another-key".to_vec();
        let payload = format!(r#"{{"sub":"bob","roles":[],"exp":{}}}"#, far_future_exp());
        let token = sign(&key, "HS512", &payload);

        let verifier = LoginTokenVerifier::new(key);
        let (claims, _roles) = verifier.verify(&token).unwrap();
        assert_eq!(claims.sub, "bob");
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let key = b"test-key-material".to_vec();
        let payload = format!(r#"{{"sub":"alice","roles":["user"],"exp":{}}}"#, far_future_exp());
        let token = sign(&key, "HS256", &payload);
        let tampered = token.replacen("alice", "mallory", 1);

        let verifier = LoginTokenVerifier::new(key);
        assert!(matches!(verifier.verify(&tampered), Err(LoginTokenError::BadSignature) | Err(LoginTokenError::Json(_))));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let payload = format!(r#"{{"sub":"alice","roles":[],"exp":{}}}"#, far_future_exp());
        let token = sign(b"right-key", "HS256", &payload);
        let verifier = LoginTokenVerifier::new(b"wrong-key".to_vec());
        assert!(matches!(verifier.verify(&token), Err(LoginTokenError::BadSignature)));
    }

    #[test]
    fn unsupported_alg_is_rejected() {
        let key = b"k".to_vec();
        let header = r#"{"alg":"none","typ":"JWT"}"#;
        let token = format!("{}.{}.", B64.encode(header), B64.encode(r#"{"sub":"x","exp":9999999999}"#));
        let verifier = LoginTokenVerifier::new(key);
        assert!(matches!(verifier.verify(&token), Err(LoginTokenError::UnsupportedAlg(_))));
    }

    #[test]
    fn expired_token_is_rejected() {
        let key = b"test-key-material".to_vec();
        let payload = r#"{"sub":"alice","roles":["user"],"exp":1}"#;
        let token = sign(&key, "HS256", payload);

        let verifier = LoginTokenVerifier::new(key);
        assert!(matches!(verifier.verify(&token), Err(LoginTokenError::Expired)));
    }
}
