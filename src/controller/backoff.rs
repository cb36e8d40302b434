//! Per-key exponential backoff.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Backoff hands out `base * 2^n` for the n-th consecutive failure of a key,
/// capped at `max`. A key starts over after [`Backoff::forget`].
#[derive(Debug)]
pub struct Backoff<K> {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K: Clone + Eq + Hash> Backoff<K> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Backoff {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Records a failure of `key` and returns how long to wait before
    /// retrying it.
    pub fn next_delay(&self, key: &K) -> Duration {
        let attempt = {
            let mut failures = self.failures.lock();
            let count = failures.entry(key.clone()).or_insert(0);
            let attempt = *count;
            *count = count.saturating_add(1);
            attempt
        };

        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).unwrap_or(self.max).min(self.max)
    }

    pub fn failures(&self, key: &K) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }

    pub fn forget(&self, key: &K) {
        self.failures.lock().remove(key);
    }
}

impl<K: Clone + Eq + Hash> Default for Backoff<K> {
    fn default() -> Self {
        Backoff::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}
