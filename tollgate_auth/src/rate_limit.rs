//! Throttling of repeated sign-in attempts

use std::fmt;

use dashmap::DashMap;
use tollgate_clock::{Clock, DurationSecs, System, UnixTime};

/// The outcome of a rate limit check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The attempt may proceed
    Allowed,
    /// The attempt must be refused
    Limited,
}

/// Decides whether another attempt for a key may proceed
pub trait RateLimiter: Send + Sync + fmt::Debug {
    /// Records an attempt for `key` and decides whether it may proceed
    fn check(&self, key: &str) -> RateLimitDecision;
}

/// Allows every attempt
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check(&self, _key: &str) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

/// Default number of attempts per window
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default window length
pub const DEFAULT_WINDOW: DurationSecs = DurationSecs(60);

const PURGE_THRESHOLD: usize = 1024;

/// Allows a fixed number of attempts per key in each window
///
/// A key's window starts with its first attempt and lasts for the
/// configured duration; attempts past the limit are refused until it ends.
#[derive(Debug)]
pub struct FixedWindowRateLimiter<C = System> {
    max_attempts: u32,
    window: DurationSecs,
    windows: DashMap<String, Window>,
    clock: C,
}

#[derive(Clone, Copy, Debug)]
struct Window {
    started: UnixTime,
    attempts: u32,
}

impl FixedWindowRateLimiter<System> {
    /// Allows `max_attempts` attempts per key in each `window`
    pub fn new(max_attempts: u32, window: DurationSecs) -> Self {
        Self {
            max_attempts,
            window,
            windows: DashMap::new(),
            clock: System,
        }
    }
}

impl Default for FixedWindowRateLimiter<System> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_WINDOW)
    }
}

impl<C> FixedWindowRateLimiter<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> FixedWindowRateLimiter<D> {
        FixedWindowRateLimiter {
            max_attempts: self.max_attempts,
            window: self.window,
            windows: self.windows,
            clock,
        }
    }
}

impl<C: Clock + Send + Sync + fmt::Debug> RateLimiter for FixedWindowRateLimiter<C> {
    fn check(&self, key: &str) -> RateLimitDecision {
        let now = self.clock.now();

        if self.windows.len() > PURGE_THRESHOLD {
            let window = self.window;
            self.windows.retain(|_, w| now < w.started + window);
        }

        let mut entry = self.windows.entry(key.to_owned()).or_insert(Window {
            started: now,
            attempts: 0,
        });

        if now >= entry.started + self.window {
            *entry = Window {
                started: now,
                attempts: 0,
            };
        }

        if entry.attempts >= self.max_attempts {
            tracing::debug!(attempts = entry.attempts, "rate limit exceeded");
            return RateLimitDecision::Limited;
        }

        entry.attempts += 1;
        RateLimitDecision::Allowed
    }
}
