//! Per-`(ip, username)` token bucket login rate limiting (spec §4.2).
//! Hand-rolled `Mutex<HashMap<_>>` + periodic `retain()` sweep, matching the
//! teacher's replay-cache GC idiom in `token.rs` rather than pulling in a
//! general-purpose limiter crate — the spec's bucket-identity and
//! race-tolerance properties (§5, P6, L2) are easier to keep honest this way.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// 10 attempts, refilling one every six minutes (spec §4.2).
const CAPACITY: u32 = 10;
const REFILL_INTERVAL: Duration = Duration::from_secs(6 * 60);
const GC_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 10);
/// Buckets idle this long are considered stale and dropped by the sweep.
const BUCKET_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

struct Bucket {
    tokens: u32,
    last_refill: Instant,
    last_used: Instant,
}

impl Bucket {
    fn new(now: Instant) -> Self {
        Self {
            tokens: CAPACITY,
            last_refill: now,
            last_used: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let refilled = (elapsed.as_secs() / REFILL_INTERVAL.as_secs()) as u32;
        if refilled > 0 {
            self.tokens = (self.tokens + refilled).min(CAPACITY);
            self.last_refill += REFILL_INTERVAL * refilled;
        }
    }

    /// Returns `true` and consumes a token if one was available.
    fn try_take(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.last_used = now;
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }
}

/// Shared, cloneable handle over the bucket table. A Load-then-Store race on
/// first insert for the same key is tolerated (spec §5): both racing buckets
/// start full, so either winning insert is behaviorally equivalent.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn key(ip: &str, username: &str) -> String {
        format!("{ip}\0{username}")
    }

    /// Returns `true` if this `(ip, username)` pair may attempt a login now,
    /// consuming one token if so.
    pub fn allow(&self, ip: &str, username: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(Self::key(ip, username)).or_insert_with(|| Bucket::new(now));
        bucket.try_take(now)
    }

    fn sweep(&self) {
        let now = Instant::now();
        self.buckets.lock().retain(|_, bucket| now.saturating_duration_since(bucket.last_used) < BUCKET_IDLE_TTL);
    }

    /// Spawns the background sweep task; the returned handle is aborted when
    /// dropped. Mirrors the teacher's periodic token-cache GC in `token.rs`.
    pub fn spawn_gc(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(GC_SWEEP_INTERVAL).await;
                self.sweep();
            }
        })
    }
}
