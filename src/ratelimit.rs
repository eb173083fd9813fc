use std::collections::HashMap;

use parking_lot::Mutex;

const WINDOW_SECS: i64 = 60;

/// Snapshot of a client's quota, rendered into `X-RateLimit-*` headers.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
    /// Unix time at which the next window opens.
    pub reset: i64,
}

/// Fixed-window request counter keyed by client identifier.
///
/// Windows are clock-aligned minutes, so a client can burst up to twice the
/// nominal rate across a window boundary. That imprecision is part of the
/// contract the extension was built against; do not swap in a sliding
/// window. State is in-memory only and does not survive restarts.
///
/// The map is mutex-guarded: increments are read-modify-write and would
/// lose updates under concurrent requests from the same client otherwise.
pub struct FixedWindowLimiter {
    limit: u32,
    entries: Mutex<HashMap<String, WindowEntry>>,
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    window: i64,
    count: u32,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Records a request and reports whether it is within quota.
    pub fn check(&self, client_id: &str) -> bool {
        self.check_at(client_id, chrono::Utc::now().timestamp())
    }

    fn check_at(&self, client_id: &str, now: i64) -> bool {
        let window = now.div_euclid(WINDOW_SECS);
        let mut entries = self.entries.lock();

        // Entries more than one window old can never be read again.
        entries.retain(|_, entry| window - entry.window <= 1);

        match entries.get_mut(client_id) {
            Some(entry) if entry.window == window => {
                if entry.count >= self.limit {
                    return false;
                }
                entry.count += 1;
                true
            }
            Some(entry) => {
                entry.window = window;
                entry.count = 1;
                true
            }
            None => {
                entries.insert(client_id.to_string(), WindowEntry { window, count: 1 });
                true
            }
        }
    }

    /// Read-only view of a client's remaining quota. Does not consume it.
    pub fn status(&self, client_id: &str) -> RateLimitStatus {
        self.status_at(client_id, chrono::Utc::now().timestamp())
    }

    fn status_at(&self, client_id: &str, now: i64) -> RateLimitStatus {
        let window = now.div_euclid(WINDOW_SECS);
        let used = match self.entries.lock().get(client_id) {
            Some(entry) if entry.window == window => entry.count,
            _ => 0,
        };
        RateLimitStatus {
            limit: self.limit,
            remaining: self.limit.saturating_sub(used),
            reset: (window + 1) * WINDOW_SECS,
        }
    }
}
