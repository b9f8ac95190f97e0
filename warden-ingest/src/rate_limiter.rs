//! Fixed-window rate limiting for the ingest endpoint.
//!
//! Two layers over 60-second windows: a global cap across all clients and a
//! per-participant cap keyed on the payload's machine id (source IP when the
//! payload carries none). Rejections leave no state behind beyond the
//! limiter's own counters.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;
use warden_core::error::{WardenError, WardenResult};

pub const WINDOW_SECS: i64 = 60;
pub const DEFAULT_GLOBAL_LIMIT: u64 = 1_000;
pub const DEFAULT_PER_PARTICIPANT_LIMIT: u64 = 100;

/// Tracked participant keys before idle windows are pruned.
const MAX_TRACKED_KEYS: usize = 100_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    window_start: i64,
    count: u64,
}

pub struct IngestRateLimiter {
    global_limit: u64,
    per_participant_limit: u64,
    global: RwLock<Window>,
    per_key: RwLock<HashMap<String, Window>>,
    total_checked: AtomicU64,
    total_limited: AtomicU64,
}

impl IngestRateLimiter {
    pub fn new(global_limit: u64, per_participant_limit: u64) -> Self {
        Self {
            global_limit,
            per_participant_limit,
            global: RwLock::new(Window { window_start: 0, count: 0 }),
            per_key: RwLock::new(HashMap::new()),
            total_checked: AtomicU64::new(0),
            total_limited: AtomicU64::new(0),
        }
    }

    /// Admit or reject one request for `key`. Both layers are checked; the
    /// global window is consumed first.
    pub fn check(&self, key: &str) -> WardenResult<()> {
        let now = chrono::Utc::now().timestamp();
        self.check_at(key, now)
    }

    /// Clock-injected variant, used directly by tests.
    pub fn check_at(&self, key: &str, now: i64) -> WardenResult<()> {
        self.total_checked.fetch_add(1, Ordering::Relaxed);

        {
            let mut global = self.global.write();
            roll_window(&mut global, now);
            global.count += 1;
            if global.count > self.global_limit {
                let retry = retry_after(&global, now);
                drop(global);
                self.total_limited.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, "Global ingest rate limit hit");
                return Err(WardenError::RateLimited {
                    scope: "global".into(),
                    retry_after_secs: retry,
                });
            }
        }

        let mut per_key = self.per_key.write();
        if per_key.len() >= MAX_TRACKED_KEYS {
            per_key.retain(|_, w| now - w.window_start < WINDOW_SECS);
        }
        let window = per_key
            .entry(key.to_string())
            .or_insert(Window { window_start: now, count: 0 });
        roll_window(window, now);
        window.count += 1;
        if window.count > self.per_participant_limit {
            let retry = retry_after(window, now);
            drop(per_key);
            self.total_limited.fetch_add(1, Ordering::Relaxed);
            warn!(key = %key, "Per-participant ingest rate limit hit");
            return Err(WardenError::RateLimited {
                scope: format!("participant:{}", key),
                retry_after_secs: retry,
            });
        }
        Ok(())
    }

    pub fn total_checked(&self) -> u64 {
        self.total_checked.load(Ordering::Relaxed)
    }

    pub fn total_limited(&self) -> u64 {
        self.total_limited.load(Ordering::Relaxed)
    }
}

impl Default for IngestRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_GLOBAL_LIMIT, DEFAULT_PER_PARTICIPANT_LIMIT)
    }
}

fn roll_window(window: &mut Window, now: i64) {
    if now - window.window_start >= WINDOW_SECS {
        window.window_start = now;
        window.count = 0;
    }
}

fn retry_after(window: &Window, now: i64) -> u64 {
    (window.window_start + WINDOW_SECS - now).max(1) as u64
}
