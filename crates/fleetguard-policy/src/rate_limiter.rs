//! Sliding-window rate limiter (C4, spec §4.4).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use fleetguard_core::rate::{RateScopeKey, RateWindow};

struct Entry {
    window: RateWindow,
    last_touched: DateTime<Utc>,
    /// Largest interval ever requested for this key; governs the sweep
    /// cadence (spec §9 Open Question 3: "opportunistic on access").
    max_interval_seen: u64,
}

/// In-memory per-key sliding-window counter (§4.4). Safe to share behind an
/// `Arc` across every Policy Engine call and plan-executor worker. The outer
/// map lock is only held long enough to get-or-insert a key's slot; the
/// window update itself runs under that key's own `Mutex`, so calls against
/// different scopes don't serialize on each other (§5 fine-grained locking).
pub struct RateLimiter {
    windows: Mutex<HashMap<RateScopeKey, Arc<Mutex<Entry>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// `true` iff this call is within `limit` for the current window.
    /// Resets the window when `now` has advanced past it (§4.4).
    pub fn allow(&self, key: RateScopeKey, limit: u32, interval_seconds: u64, now: DateTime<Utc>) -> bool {
        let slot = {
            let mut windows = self.windows.lock();
            self.sweep_locked(&mut windows, now);
            windows
                .entry(key)
                .or_insert_with(|| {
                    Arc::new(Mutex::new(Entry {
                        window: RateWindow::new(limit, interval_seconds, now),
                        last_touched: now,
                        max_interval_seen: interval_seconds,
                    }))
                })
                .clone()
        };

        let mut entry = slot.lock();
        entry.last_touched = now;
        entry.max_interval_seen = entry.max_interval_seen.max(interval_seconds);

        if entry.window.is_expired(now) {
            entry.window = RateWindow::new(limit, interval_seconds, now);
        }
        // The configured limit can change between calls (a policy edit); the
        // window always evaluates against the caller's current value.
        entry.window.limit = limit;
        entry.window.count += 1;
        entry.window.count <= limit
    }

    /// Evict keys untouched for more than `2 * max_interval_seen` (§4.4
    /// eviction). Runs opportunistically inside `allow`, never on a timer.
    fn sweep_locked(&self, windows: &mut HashMap<RateScopeKey, Arc<Mutex<Entry>>>, now: DateTime<Utc>) {
        windows.retain(|_, e| {
            let e = e.lock();
            let stale_after = chrono::Duration::seconds(2 * e.max_interval_seen as i64);
            now - e.last_touched < stale_after
        });
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.windows.lock().len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
