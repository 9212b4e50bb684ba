//! Token-bucket rate limiter over a rolling time window.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// At most `max_requests` acquisitions are allowed in any rolling
/// `window` of time; expired tokens are pruned on every call.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    tokens: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            tokens: Mutex::new(VecDeque::new()),
        }
    }

    fn prune(tokens: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&front) = tokens.front() {
            if now.duration_since(front) > window {
                tokens.pop_front();
            } else {
                break;
            }
        }
    }

    /// Attempt to acquire a token. Non-blocking.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut tokens = self.tokens.lock();
        Self::prune(&mut tokens, now, self.window);

        if tokens.len() < self.max_requests as usize {
            tokens.push_back(now);
            true
        } else {
            false
        }
    }

    /// Seconds until the oldest live token expires, making room for a new one.
    /// Returns `0.0` if a token is available right now.
    #[must_use]
    pub fn time_until_available(&self) -> f64 {
        let now = Instant::now();
        let mut tokens = self.tokens.lock();
        Self::prune(&mut tokens, now, self.window);

        if tokens.len() < self.max_requests as usize {
            return 0.0;
        }
        let oldest = *tokens.front().expect("len checked above");
        let remaining = self.window.saturating_sub(now.duration_since(oldest));
        remaining.as_secs_f64()
    }

    /// Number of tokens currently outstanding within the window.
    #[must_use]
    pub fn tokens_available(&self) -> u32 {
        let now = Instant::now();
        let mut tokens = self.tokens.lock();
        Self::prune(&mut tokens, now, self.window);
        self.max_requests.saturating_sub(tokens.len() as u32)
    }

    /// Block until a token is available, then acquire it.
    pub async fn acquire(&self) {
        loop {
            if self.try_acquire() {
                return;
            }
            let wait = self.time_until_available().max(0.01);
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_exceeds_max_requests_within_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire(), "fourth request within window must be refused");
    }

    #[test]
    fn expired_tokens_are_pruned_on_acquire() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.try_acquire(), "token should have expired out of the window");
    }

    #[test]
    fn time_until_available_is_zero_when_under_limit() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        assert_eq!(limiter.time_until_available(), 0.0);
    }

    #[tokio::test]
    async fn acquire_blocks_until_a_token_frees_up() {
        let limiter = RateLimiter::new(1, Duration::from_millis(30));
        assert!(limiter.try_acquire());

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
