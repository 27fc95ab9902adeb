//! Sleeping between requests.
//!
//! The fetch loop never calls `std::thread::sleep` directly; it goes through a
//! `Sleeper` so tests can record the rate-limit and backoff pauses instead of
//! waiting them out.

use std::time::Duration;

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Blocks the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Backoff before retry number `attempt + 1`: 2^attempt seconds.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(16))
}
