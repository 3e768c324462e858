//! Per-client request limiting
//!
//! Every request is checked against a per-source-IP quota before it reaches a
//! handler; clients over the quota receive 429. Fairness beyond what GCRA
//! provides is out of scope.

use governor::{
    clock::DefaultClock,
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter,
};
use std::net::IpAddr;
use std::num::NonZeroU32;

/// Keyed rate limiter over client source addresses.
pub struct RequestLimiter {
    limiter: RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>,
}

impl RequestLimiter {
    /// Create a limiter allowing `per_minute` requests per source IP.
    ///
    /// A zero quota is clamped to one request per minute.
    pub fn new(per_minute: u32) -> Self {
        let rate = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::new(1).unwrap());
        Self {
            limiter: RateLimiter::keyed(Quota::per_minute(rate)),
        }
    }

    /// Check whether a request from `ip` is within quota.
    pub fn check(&self, ip: IpAddr) -> bool {
        self.limiter.check_key(&ip).is_ok()
    }

    /// Drop per-client state that is old enough to no longer affect
    /// decisions. Called from the sweep tick so the key store does not grow
    /// with every client ever seen.
    pub fn prune(&self) {
        self.limiter.retain_recent();
    }
}

// ============================================================================
// Tests
// ============================================================================
