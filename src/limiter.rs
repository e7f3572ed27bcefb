//! Sliding-window rate limiting for inbound senders and outbound sends.
//!
//! All state is in-memory and resets on restart. Windows are ordered
//! sequences of epoch-second timestamps, appended at the back and trimmed
//! from the front, so a window is always sorted ascending and never holds
//! more entries than its limit after a successful allow.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;

/// Window span for per-minute limits, in seconds.
const MINUTE_WINDOW_SECS: i64 = 60;

/// Window span for the shared daily outbound limit, in seconds.
const DAY_WINDOW_SECS: i64 = 86_400;

/// Outbound window key used by the drainer.
pub const OUTBOUND_GLOBAL_KEY: &str = "global";

#[derive(Default)]
struct Windows {
    /// Per-sender inbound minute windows.
    inbound: HashMap<String, VecDeque<i64>>,
    /// Per-key outbound minute windows.
    outbound: HashMap<String, VecDeque<i64>>,
    /// Shared outbound daily window.
    daily: VecDeque<i64>,
}

/// In-memory sliding-window rate limiter.
///
/// Checks are evaluated before any timestamp is recorded, so a denied call
/// leaves every window untouched and repeating it is idempotent.
pub struct RateLimiter {
    inbound_per_minute: usize,
    outbound_per_minute: usize,
    outbound_per_day: usize,
    windows: Mutex<Windows>,
}

impl RateLimiter {
    /// Create a limiter with the given per-window limits.
    pub fn new(
        inbound_per_minute: usize,
        outbound_per_minute: usize,
        outbound_per_day: usize,
    ) -> Self {
        Self {
            inbound_per_minute,
            outbound_per_minute,
            outbound_per_day,
            windows: Mutex::new(Windows::default()),
        }
    }

    /// Whether an inbound message from `sender` may be accepted now.
    pub fn allow_inbound(&self, sender: &str) -> bool {
        self.allow_inbound_at(sender, Utc::now().timestamp())
    }

    /// Whether an outbound send under `key` may happen now.
    pub fn allow_outbound(&self, key: &str) -> bool {
        self.allow_outbound_at(key, Utc::now().timestamp())
    }

    /// [`Self::allow_inbound`] with an explicit clock, for deterministic tests.
    pub fn allow_inbound_at(&self, sender: &str, now: i64) -> bool {
        let mut windows = self.lock();
        let window = windows.inbound.entry(sender.to_owned()).or_default();
        trim_window(window, now, MINUTE_WINDOW_SECS);
        if window.len() >= self.inbound_per_minute {
            return false;
        }
        window.push_back(now);
        true
    }

    /// [`Self::allow_outbound`] with an explicit clock, for deterministic tests.
    ///
    /// Both the per-key minute window and the shared daily window are checked
    /// before either records the event.
    pub fn allow_outbound_at(&self, key: &str, now: i64) -> bool {
        let mut windows = self.lock();
        trim_window(&mut windows.daily, now, DAY_WINDOW_SECS);
        if windows.daily.len() >= self.outbound_per_day {
            return false;
        }
        let minute = windows.outbound.entry(key.to_owned()).or_default();
        trim_window(minute, now, MINUTE_WINDOW_SECS);
        if minute.len() >= self.outbound_per_minute {
            return false;
        }
        minute.push_back(now);
        windows.daily.push_back(now);
        true
    }

    fn lock(&self) -> MutexGuard<'_, Windows> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drop timestamps that have aged out of a window.
fn trim_window(window: &mut VecDeque<i64>, now: i64, span: i64) {
    let cutoff = now.saturating_sub(span);
    while window.front().is_some_and(|&at| at <= cutoff) {
        window.pop_front();
    }
}
