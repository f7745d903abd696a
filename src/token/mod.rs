//! Token verification: the Ed25519 bearer/cookie JWTVerifier (spec §4.4) and
//! the HMAC LoginTokenVerifier (spec §4.5).

pub mod jwt;
pub mod login_token;

pub use jwt::{JwtKeys, JwtVerifier, TokenError, VerifiedClaims};
pub use login_token::{LoginTokenClaims, LoginTokenError, LoginTokenVerifier};
