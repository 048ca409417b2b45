use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Counter state for one key inside its current fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u32,
    pub reset_at_ms: u64,
}

impl WindowCount {
    /// Whole seconds until the window resets, at least 1.
    #[must_use]
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.reset_at_ms.saturating_sub(now_ms).div_ceil(1000).max(1)
    }
}

/// Fixed-window counter store.
///
/// The in-memory implementation is per-process; a multi-instance deployment
/// needs a shared implementation behind this trait.
pub trait RateLimitStore: Send + Sync {
    /// Count one hit for `key`, opening a new window if the current one expired.
    fn increment(&self, key: &str, window: Duration, now_ms: u64) -> WindowCount;
}

const PRUNE_THRESHOLD: usize = 4096;

#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    windows: Mutex<FxHashMap<String, WindowCount>>,
}

impl InMemoryRateLimitStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().len()
    }
}

impl RateLimitStore for InMemoryRateLimitStore {
    fn increment(&self, key: &str, window: Duration, now_ms: u64) -> WindowCount {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        let mut windows = self.windows.lock();
        if windows.len() > PRUNE_THRESHOLD {
            windows.retain(|_, state| state.reset_at_ms > now_ms);
        }
        let state = windows.entry(key.to_string()).or_insert(WindowCount {
            count: 0,
            reset_at_ms: 0,
        });
        if now_ms >= state.reset_at_ms {
            state.count = 0;
            state.reset_at_ms = now_ms.saturating_add(window_ms);
        }
        state.count = state.count.saturating_add(1);
        *state
    }
}
