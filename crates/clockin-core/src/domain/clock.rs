//! Time source abstraction.
//!
//! Validity windows are measured in milliseconds since the Unix epoch so they
//! can be sent to browsers as-is (`expiresAt`).  Reading the time through a
//! trait lets tests place a submission at exactly `t = 31s` without sleeping.
//!
//! # Clock drift
//!
//! [`SystemClock`] reads the wall clock once, at construction, and from then
//! on advances it with a monotonic [`Instant`].  If an NTP correction steps
//! the system clock backwards by a minute while the hub is running, a code
//! issued before the step still expires exactly `validity` later.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of "now" for code issue and expiry decisions.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// Production clock: wall-clock anchored at startup, advanced monotonically.
#[derive(Debug, Clone)]
pub struct SystemClock {
    anchor_wall_ms: u64,
    anchor_instant: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        let anchor_wall_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            anchor_wall_ms,
            anchor_instant: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        let elapsed = self.anchor_instant.elapsed().as_millis() as u64;
        self.anchor_wall_ms.saturating_add(elapsed)
    }
}

/// Hand-driven clock for deterministic tests and simulations.
///
/// # Examples
///
/// ```rust
/// use clockin_core::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new(0);
/// clock.advance(Duration::from_secs(31));
/// assert_eq!(clock.now_ms(), 31_000);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    /// Jumps to an absolute time.
    pub fn set_ms(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_close_to_wall_clock() {
        let clock = SystemClock::new();
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        let diff = clock.now_ms().abs_diff(wall);
        assert!(diff < 1_000, "anchor drifted by {diff}ms");
    }

    #[test]
    fn test_system_clock_never_goes_backwards() {
        let clock = SystemClock::new();
        let t1 = clock.now_ms();
        std::thread::sleep(Duration::from_millis(5));
        let t2 = clock.now_ms();
        assert!(t2 >= t1);
    }

    #[test]
    fn test_manual_clock_set_and_advance() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);

        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now_ms(), 1_250);

        clock.set_ms(5);
        assert_eq!(clock.now_ms(), 5);
    }
}
