//! Rolling-window rate bucket
//!
//! The gateway tolerates 120 messages per 60-second window and disconnects
//! with close code 4008 beyond that. The bucket stops normal traffic at
//! 115 so lifecycle messages (heartbeat, IDENTIFY, RESUME) always have
//! headroom; those priority messages may spend the window up to 120.

use crate::clock::now_ms;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Length of one rate window
pub const WINDOW_MS: u64 = 60_000;

/// Messages a window grants to normal traffic
pub const NORMAL_LIMIT: u32 = 115;

/// Messages a window grants in total, priority traffic included
pub const PRIORITY_LIMIT: u32 = 120;

/// Outcome of a permit request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    /// The message may be sent; the window counter was advanced.
    Granted,
    /// The window is exhausted for this message class.
    ///
    /// `first_denial` is `true` exactly once per window, for the single
    /// warn log.
    Denied { first_denial: bool },
}

/// 60-second rolling window over outbound message counts
#[derive(Debug)]
pub struct RateLimitBucket {
    window_end_ms: AtomicU64,
    sent: AtomicU32,
    warned: AtomicBool,
}

impl RateLimitBucket {
    #[must_use]
    pub fn new() -> Self {
        Self {
            window_end_ms: AtomicU64::new(0),
            sent: AtomicU32::new(0),
            warned: AtomicBool::new(false),
        }
    }

    /// Request a send permit at the current time
    pub fn try_acquire(&self, priority: bool) -> Permit {
        self.try_acquire_at(priority, now_ms())
    }

    /// Request a send permit at an explicit time (deterministic tests)
    pub fn try_acquire_at(&self, priority: bool, now: u64) -> Permit {
        if now >= self.window_end_ms.load(Ordering::SeqCst) {
            self.sent.store(0, Ordering::SeqCst);
            self.window_end_ms.store(now + WINDOW_MS, Ordering::SeqCst);
            self.warned.store(false, Ordering::SeqCst);
        }

        let limit = if priority { PRIORITY_LIMIT } else { NORMAL_LIMIT };
        match self
            .sent
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |sent| {
                (sent < limit).then_some(sent + 1)
            }) {
            Ok(_) => Permit::Granted,
            Err(_) => Permit::Denied {
                first_denial: !self.warned.swap(true, Ordering::SeqCst),
            },
        }
    }

    /// Time until the current window rolls over
    #[must_use]
    pub fn window_remaining(&self) -> Duration {
        self.window_remaining_at(now_ms())
    }

    /// Time until the window rolls over, at an explicit time
    #[must_use]
    pub fn window_remaining_at(&self, now: u64) -> Duration {
        Duration::from_millis(self.window_end_ms.load(Ordering::SeqCst).saturating_sub(now))
    }

    /// Messages counted against the current window
    #[must_use]
    pub fn sent(&self) -> u32 {
        self.sent.load(Ordering::SeqCst)
    }

    /// Start a fresh window. Called on every successful connect.
    pub fn reset(&self) {
        self.reset_at(now_ms());
    }

    /// Start a fresh window at an explicit time
    pub fn reset_at(&self, now: u64) {
        self.sent.store(0, Ordering::SeqCst);
        self.window_end_ms.store(now + WINDOW_MS, Ordering::SeqCst);
        self.warned.store(false, Ordering::SeqCst);
    }
}

impl Default for RateLimitBucket {
    fn default() -> Self {
        Self::new()
    }
}
