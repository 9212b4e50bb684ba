//! Resilience primitives: circuit breakers, rate limiters, TTL caches.
//!
//! Expressed as an explicit, constructed-once context (`ResilienceRegistry`)
//! rather than module-level globals, so tests can build a fresh instance per
//! case instead of sharing mutable state across the whole test binary.

pub mod cache;
pub mod circuit_breaker;
pub mod rate_limiter;

pub use cache::TtlCache;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use rate_limiter::RateLimiter;

use std::sync::Arc;
use std::time::Duration;

/// Named circuit breakers and rate limiters shared across the tasks of one
/// process. Built once at startup and cloned (cheaply, via `Arc`) into every
/// task that needs it.
#[derive(Clone)]
pub struct ResilienceRegistry {
    pub cymru: Arc<CircuitBreaker>,
    pub peeringdb: Arc<CircuitBreaker>,
    pub ip_api: Arc<CircuitBreaker>,
    pub ipinfo: Arc<CircuitBreaker>,
    pub ripe_stat: Arc<CircuitBreaker>,
    pub pihole: Arc<CircuitBreaker>,
    pub ip_api_limiter: Arc<RateLimiter>,
}

impl ResilienceRegistry {
    /// Construct the default set of breakers/limiters per the thresholds
    /// and recovery windows used by the enrichment engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cymru: Arc::new(CircuitBreaker::new("cymru", 5, Duration::from_secs(60))),
            peeringdb: Arc::new(CircuitBreaker::new("peeringdb", 3, Duration::from_secs(300))),
            ip_api: Arc::new(CircuitBreaker::new("ip_api", 5, Duration::from_secs(120))),
            ipinfo: Arc::new(CircuitBreaker::new("ipinfo", 5, Duration::from_secs(120))),
            ripe_stat: Arc::new(CircuitBreaker::new("ripe_stat", 5, Duration::from_secs(120))),
            pihole: Arc::new(CircuitBreaker::new("pihole", 5, Duration::from_secs(120))),
            ip_api_limiter: Arc::new(RateLimiter::new(45, Duration::from_secs(60))),
        }
    }
}

impl Default for ResilienceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
