//! Time source selection.
//!
//! Every component that needs the current time takes it from a [`Clock`]
//! rather than calling `Utc::now()` directly. The bootstrap selects the
//! concrete source once, from the test-mode flag: a wall clock in
//! production, a caller-driven [`ManualClock`] in test mode.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

/// Clock trait - abstracts time operations for testability.
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time source used outside test mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Controllable time source selected in test mode.
///
/// Time never moves on its own: it only changes through [`set_time`] and
/// [`advance`], so scheduled work can be driven deterministically.
///
/// [`set_time`]: ManualClock::set_time
/// [`advance`]: ManualClock::advance
#[derive(Debug)]
pub struct ManualClock {
    time: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a manual clock starting at the given instant.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            time: Mutex::new(start),
        }
    }

    /// Move the clock to an absolute instant.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    #[allow(clippy::expect_used)]
    pub fn set_time(&self, to: DateTime<Utc>) {
        let mut time = self
            .time
            .lock()
            .expect("clock lock poisoned - indicates a panic in another thread");
        *time = to;
    }

    /// Advance the clock by a delta.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    #[allow(clippy::expect_used)]
    pub fn advance(&self, by: Duration) {
        let mut time = self
            .time
            .lock()
            .expect("clock lock poisoned - indicates a panic in another thread");
        *time += by;
    }
}

impl Clock for ManualClock {
    #[allow(clippy::expect_used)]
    fn now(&self) -> DateTime<Utc> {
        *self
            .time
            .lock()
            .expect("clock lock poisoned - indicates a panic in another thread")
    }
}

/// The platform's selected time source.
///
/// Registered once during bootstrap and shared read-only afterwards.
#[derive(Debug, Clone)]
pub enum TimeSource {
    /// Wall clock
    System(Arc<SystemClock>),
    /// Caller-driven clock (test mode)
    Manual(Arc<ManualClock>),
}

impl TimeSource {
    /// Choose the time source from the test-mode flag.
    #[must_use]
    pub fn select(test_mode: bool) -> Self {
        if test_mode {
            Self::Manual(Arc::new(ManualClock::new(Utc::now())))
        } else {
            Self::System(Arc::new(SystemClock))
        }
    }

    /// The controllable clock, when running in test mode.
    #[must_use]
    pub fn as_manual(&self) -> Option<&Arc<ManualClock>> {
        match self {
            Self::Manual(clock) => Some(clock),
            Self::System(_) => None,
        }
    }
}

impl Clock for TimeSource {
    fn now(&self) -> DateTime<Utc> {
        match self {
            Self::System(clock) => clock.now(),
            Self::Manual(clock) => clock.now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    #[test]
    fn manual_clock_only_moves_when_driven() {
        let clock = ManualClock::new(start());
        let before = clock.now();
        let again = clock.now();
        assert_eq!(before, again);

        clock.advance(Duration::minutes(30));
        assert_eq!(clock.now(), before + Duration::minutes(30));

        clock.set_time(start());
        assert_eq!(clock.now(), before);
    }

    #[test]
    fn test_mode_selects_a_controllable_clock() {
        let source = TimeSource::select(true);
        let manual = source.as_manual();
        assert!(manual.is_some());

        if let Some(clock) = manual {
            let t0 = clock.now();
            clock.advance(Duration::hours(1));
            assert_eq!(source.now(), t0 + Duration::hours(1));
        }
    }

    #[test]
    fn production_mode_selects_the_wall_clock() {
        let source = TimeSource::select(false);
        assert!(source.as_manual().is_none());
    }
}
