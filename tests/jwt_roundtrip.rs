//! End-to-end check that a token issued by `JwtVerifier::issue` verifies
//! successfully through the same verifier (spec L1), that a token signed by
//! an untrusted key is rejected, and a property test that the round-trip
//! law holds across arbitrary usernames.

use std::sync::Arc;

use jobauth::repository::InMemoryUserRepository;
use jobauth::token::{JwtKeys, JwtVerifier};
use jobauth::user::{AuthSource, RoleSet, User};
use picky::key::PrivateKey;

fn verifier_with_own_keypair() -> (Arc<JwtVerifier>, User) {
    let private = PrivateKey::generate_ed25519().expect("ed25519 keygen");
    let public = private.to_public_key().expect("derive public key");

    let repo = Arc::new(InMemoryUserRepository::new());
    let mut user = User::new("alice", AuthSource::LocalPassword);
    user.roles = RoleSet::from_raw(["user", "manager"]);

    let verifier = Arc::new(JwtVerifier::new(
        JwtKeys {
            own_public: public,
            own_private: Some(private),
            trusted_external_public: None,
            trusted_external_issuer: None,
        },
        false,
        repo,
        std::time::Duration::from_secs(300),
    ));

    (verifier, user)
}

#[tokio::test]
async fn issued_token_verifies_successfully() {
    let (verifier, user) = verifier_with_own_keypair();
    let token = verifier.issue(&user).unwrap();

    let claims = verifier.verify(&token).await.unwrap();
    assert_eq!(claims.username, "alice");
}

#[tokio::test]
async fn token_signed_by_a_different_key_is_rejected() {
    let (verifier, user) = verifier_with_own_keypair();

    let other_private = PrivateKey::generate_ed25519().unwrap();
    let other_public = other_private.to_public_key().unwrap();
    let repo = Arc::new(InMemoryUserRepository::new());
    let forging_verifier = JwtVerifier::new(
        JwtKeys {
            own_public: other_public,
            own_private: Some(other_private),
            trusted_external_public: None,
            trusted_external_issuer: None,
        },
        false,
        repo,
        std::time::Duration::from_secs(300),
    );

    let forged_token = forging_verifier.issue(&user).unwrap();

    assert!(verifier.verify(&forged_token).await.is_err());
}

proptest::proptest! {
    /// Spec L1: issuing a token for a user and immediately verifying it
    /// against the same verifier always recovers the username that was
    /// issued, for any non-empty username made of ASCII letters/digits.
    #[test]
    fn issue_then_verify_recovers_the_same_username(username in "[a-zA-Z0-9]{1,32}") {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (verifier, mut user) = verifier_with_own_keypair();
        user.username = username.clone();

        let token = verifier.issue(&user).unwrap();
        let claims = runtime.block_on(verifier.verify(&token)).unwrap();

        proptest::prop_assert_eq!(claims.username, username);
    }
}
