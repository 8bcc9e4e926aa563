//! Per-client token bucket rate limiter.
//!
//! Keys are opaque strings (currently the peer IP, see the server module) so
//! a stronger client-identity scheme can be substituted without touching the
//! strategy or patch logic. The window map is guarded by a mutex: concurrent
//! request handlers refill and consume from shared buckets, and an
//! unsynchronized refill/consume would be a data race.
//!
//! State is ephemeral and process-lifetime only. Requests hitting an empty
//! bucket are rejected, never queued.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug)]
struct RateWindow {
    tokens: f64,
    last_refill: f64,
}

#[derive(Debug)]
pub struct RateLimiter {
    max_tokens: f64,
    refill_per_sec: f64,
    started: Instant,
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl RateLimiter {
    /// Derive bucket parameters from a requests-per-minute budget: at least
    /// 10 tokens of burst and at least 0.2 tokens/sec of refill.
    pub fn per_minute(max_req_per_minute: u32) -> Self {
        Self::new(
            f64::from(max_req_per_minute.max(10)),
            (f64::from(max_req_per_minute) / 60.0).max(0.2),
        )
    }

    pub fn new(max_tokens: f64, refill_per_sec: f64) -> Self {
        Self {
            max_tokens,
            refill_per_sec,
            started: Instant::now(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Consume one token for `key` at the current wall-clock instant.
    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, self.started.elapsed().as_secs_f64())
    }

    /// Consume one token for `key` at an explicit timestamp (seconds on an
    /// arbitrary monotonic axis). Split out so tests can advance time
    /// without sleeping.
    pub fn allow_at(&self, key: &str, now: f64) -> bool {
        let mut windows = self.windows.lock().expect("rate limiter lock poisoned");

        match windows.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                // First sighting: full bucket minus the token this request
                // consumes.
                slot.insert(RateWindow {
                    tokens: self.max_tokens - 1.0,
                    last_refill: now,
                });
                true
            }
            Entry::Occupied(mut slot) => {
                let window = slot.get_mut();
                let elapsed = (now - window.last_refill).max(0.0);
                window.tokens =
                    (window.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
                window.last_refill = now;

                if window.tokens < 1.0 {
                    return false;
                }
                window.tokens -= 1.0;
                true
            }
        }
    }

    /// Number of distinct client keys seen so far (reported by `/metrics`).
    pub fn tracked(&self) -> usize {
        self.windows.lock().expect("rate limiter lock poisoned").len()
    }
}
