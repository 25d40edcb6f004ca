//! Time Abstraction
//!
//! Injectable time source. Stream locators carry absolute expiry timestamps,
//! so anything that compares against "now" takes a [`Clock`] instead of
//! calling `Utc::now()` directly. Tests substitute a fixed clock.

use chrono::{DateTime, Utc};

/// Wall-clock source for locator expiry checks.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::time::Clock;
///
/// fn is_stale(clock: &dyn Clock, expires_at: chrono::DateTime<chrono::Utc>) -> bool {
///     clock.has_passed(expires_at)
/// }
/// ```
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Seconds since the Unix epoch, the unit locators encode expiry in
    fn unix_timestamp(&self) -> i64 {
        self.now().timestamp()
    }

    /// Returns `true` once `deadline` is at or before the current time.
    fn has_passed(&self, deadline: DateTime<Utc>) -> bool {
        self.now() >= deadline
    }
}

/// Reads the host's system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
