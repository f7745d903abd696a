//! Integration-level check of the rate limiter's bucket-identity property
//! (spec L2) exercised through `AuthService::login` rather than the limiter
//! directly, so the test also covers the wiring between the two, plus a
//! property test of the limiter's capacity invariant (spec P6).

use std::sync::Arc;

use axum::http::HeaderMap;
use axum_extra::extract::cookie::CookieJar;
use jobauth::providers::local::LocalProvider;
use jobauth::providers::LoginContext;
use jobauth::rate_limiter::RateLimiter;
use jobauth::repository::InMemoryUserRepository;
use jobauth::service::{AuthService, MachineAllowList};
use jobauth::session::SessionStore;
use jobauth::user::{AuthSource, PasswordHash, User};
use rstest::rstest;

fn service() -> (AuthService, Arc<InMemoryUserRepository>) {
    let repo = Arc::new(InMemoryUserRepository::new());
    let hash = bcrypt::hash("correct-password", bcrypt::DEFAULT_COST).unwrap();
    let mut user = User::new("alice", AuthSource::LocalPassword);
    user.password = PasswordHash::new(hash);
    repo.seed(user);

    let provider = Arc::new(LocalProvider::new(repo.clone()));
    let session_store = Arc::new(SessionStore::new(
        axum_extra::extract::cookie::Key::generate(),
        None,
        false,
    ));

    let service = AuthService::new(
        vec![provider],
        RateLimiter::new(),
        session_store,
        repo.clone(),
        MachineAllowList::new(Vec::new()),
        None,
        None,
    );

    (service, repo)
}

fn jar() -> axum_extra::extract::SignedCookieJar {
    axum_extra::extract::SignedCookieJar::new(axum_extra::extract::cookie::Key::generate())
}

#[tokio::test]
async fn eleventh_failed_attempt_is_rate_limited_regardless_of_password_correctness() {
    let (service, _repo) = service();

    for _ in 0..10 {
        let ctx = LoginContext {
            username: Some("alice"),
            password: Some("wrong-password"),
            bearer_token: None,
            cookie_token: None,
            source_ip: "203.0.113.7",
        };
        let err = service.login(&ctx, jar()).await.unwrap_err();
        assert!(matches!(err, jobauth::error::AuthError::Provider(_)));
    }

    let ctx = LoginContext {
        username: Some("alice"),
        password: Some("correct-password"),
        bearer_token: None,
        cookie_token: None,
        source_ip: "203.0.113.7",
    };
    let err = service.login(&ctx, jar()).await.unwrap_err();
    assert!(matches!(err, jobauth::error::AuthError::RateLimited));
}

/// Drives the async login through `tokio_test::block_on` rather than the
/// `#[tokio::test]` macro, so it doesn't need its own runtime.
#[test]
fn correct_login_succeeds_and_carries_a_session_cookie() {
    let (service, _repo) = service();

    let ctx = LoginContext {
        username: Some("alice"),
        password: Some("correct-password"),
        bearer_token: None,
        cookie_token: None,
        source_ip: "198.51.100.9",
    };

    let (user, jar) = tokio_test::block_on(service.login(&ctx, jar())).unwrap();
    assert_eq!(user.username, "alice");

    let headers = HeaderMap::new();
    let cookies = CookieJar::new();
    assert!(tokio_test::block_on(service.auth(&headers, &cookies, &jar)).is_ok());
}

#[rstest]
#[case("198.51.100.1", "erin")]
#[case("198.51.100.2", "frank")]
#[case("2001:db8::1", "grace")]
fn every_ip_username_pair_gets_its_own_full_bucket(#[case] ip: &str, #[case] username: &str) {
    let limiter = RateLimiter::new();
    for _ in 0..10 {
        assert!(limiter.allow(ip, username), "bucket for {ip}/{username} should start full");
    }
    assert!(!limiter.allow(ip, username), "bucket for {ip}/{username} should be empty after capacity draws");
}

proptest::proptest! {
    /// Spec P6: no sequence of `allow()` calls for a single, fixed
    /// `(ip, username)` pair ever yields more than 10 successes before a
    /// refill occurs, no matter how many calls are made.
    #[test]
    fn at_most_capacity_successes_without_a_refill(attempts in 1usize..200) {
        let limiter = RateLimiter::new();
        let successes = (0..attempts).filter(|_| limiter.allow("192.0.2.1", "proptest-user")).count();
        proptest::prop_assert!(successes <= 10);
    }
}
