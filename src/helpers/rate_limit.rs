use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const MAX_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: u32,
    reset_at: Instant,
}

/// Fixed-window in-memory rate limiter keyed by `scope:key`, one window per
/// endpoint/client pair. The map is capped; expired entries are evicted
/// when the cap is hit.
pub struct RateLimiter {
    window: Duration,
    max: u32,
    inner: Mutex<HashMap<String, Entry>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max: u32) -> Self {
        Self {
            window,
            max: max.max(1),
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Records one attempt and reports whether it is still within the
    /// window's budget.
    pub fn check(&self, scope: &str, key: &str) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if inner.len() > MAX_ENTRIES {
            inner.retain(|_, entry| now < entry.reset_at);
        }

        let entry = inner
            .entry(format!("{}:{}", scope, key))
            .and_modify(|entry| {
                if now >= entry.reset_at {
                    entry.count = 0;
                    entry.reset_at = now + self.window;
                }
                entry.count += 1;
            })
            .or_insert(Entry {
                count: 1,
                reset_at: now + self.window,
            });

        if entry.count > self.max {
            tracing::warn!(%scope, %key, count = entry.count, "Rate limit exceeded");
            return false;
        }
        true
    }
}
