//! Sliding-window rate limiting keyed by tool name.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Rate limit exceeded for {tool}: {limit} requests per {window_secs}s")]
pub struct RateLimitExceeded {
    pub tool: String,
    pub limit: usize,
    pub window_secs: u64,
}

/// Per-tool sliding window over monotonic time.
///
/// A rejected attempt is not recorded, so hammering a saturated tool does
/// not push the window further out.
pub struct RateLimiter {
    window: Duration,
    buckets: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    /// Panics if `window` is zero; a zero-width window would admit nothing
    /// and reject nothing coherently.
    pub fn with_window(window: Duration) -> Self {
        assert!(!window.is_zero(), "rate limit window must be positive");
        Self {
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check whether one more invocation of `tool` fits under `limit`,
    /// recording it if so. Eviction, count, and append happen under one
    /// lock acquisition.
    pub fn check(&self, tool: &str, limit: usize) -> Result<(), RateLimitExceeded> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("rate limiter lock");
        let bucket = buckets.entry(tool.to_string()).or_default();

        bucket.retain(|&t| now.duration_since(t) < self.window);

        if bucket.len() >= limit {
            return Err(RateLimitExceeded {
                tool: tool.to_string(),
                limit,
                window_secs: self.window.as_secs(),
            });
        }

        bucket.push(now);
        Ok(())
    }

    /// Number of recorded invocations of `tool` inside the current window.
    /// Unseen tools count 0.
    pub fn request_count(&self, tool: &str) -> usize {
        let now = Instant::now();
        let buckets = self.buckets.lock().expect("rate limiter lock");
        buckets
            .get(tool)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|&&t| now.duration_since(t) < self.window)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Clear one tool's bucket.
    pub fn reset(&self, tool: &str) {
        self.buckets
            .lock()
            .expect("rate limiter lock")
            .remove(tool);
    }

    /// Clear every bucket.
    pub fn reset_all(&self) {
        self.buckets.lock().expect("rate limiter lock").clear();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
