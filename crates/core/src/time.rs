use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

/// A clock abstraction for deterministic time in services and tests.
#[derive(Debug, Clone, Default)]
pub enum Clock {
    #[default]
    Default,
    Fixed(DateTime<Utc>),
    /// Shared, manually advanced time; clones observe each other's advances.
    Manual(Arc<Mutex<DateTime<Utc>>>),
}

impl Clock {
    /// Returns a clock that uses the current system time.
    #[must_use]
    pub fn default_clock() -> Self {
        Self::Default
    }

    /// Returns a clock fixed at the given timestamp.
    #[must_use]
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::Fixed(at)
    }

    /// Returns a shared clock starting at `at` that only moves via [`Clock::advance`].
    #[must_use]
    pub fn manual(at: DateTime<Utc>) -> Self {
        Self::Manual(Arc::new(Mutex::new(at)))
    }

    /// Returns the current time according to the clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::Default => Utc::now(),
            Clock::Fixed(t) => *t,
            Clock::Manual(t) => *t.lock().unwrap_or_else(std::sync::PoisonError::into_inner),
        }
    }

    /// Advance a fixed or manual clock by the given duration.
    ///
    /// Has no effect on `Clock::Default`.
    pub fn advance(&mut self, delta: Duration) {
        match self {
            Clock::Default => {}
            Clock::Fixed(t) => *t += delta,
            Clock::Manual(t) => {
                *t.lock().unwrap_or_else(std::sync::PoisonError::into_inner) += delta;
            }
        }
    }

    /// Returns true if this clock represents real time.
    #[must_use]
    pub fn is_default(&self) -> bool {
        matches!(self, Clock::Default)
    }
}

/// Seconds elapsed from `start` to `end`, with millisecond precision.
///
/// Negative spans (clock skew) are clamped to zero.
#[must_use]
pub fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let millis = end.signed_duration_since(start).num_milliseconds().max(0);

    // Spans are bounded to human timescales, well inside f64's exact range.
    #[allow(clippy::cast_precision_loss)]
    let millis_f = millis as f64;

    millis_f / 1000.0
}

/// Truncates a duration in seconds to two decimal places for storage.
///
/// The input is first snapped to whole milliseconds so that exact
/// centisecond spans like 0.29 s are not pushed below their value by
/// float error.
#[must_use]
pub fn truncate_centis(secs: f64) -> f64 {
    let millis = (secs * 1000.0).round();
    (millis / 10.0).trunc() / 100.0
}

/// Deterministic timestamp for tests and examples (2023-11-14T22:13:20Z).
pub const FIXED_TEST_TIMESTAMP: i64 = 1_700_000_000;

/// Returns a deterministic `DateTime<Utc>` for tests and doc examples.
///
/// # Panics
///
/// Panics if the fixed timestamp cannot be represented.
#[must_use]
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(FIXED_TEST_TIMESTAMP, 0)
        .expect("fixed timestamp should be valid")
}

/// Returns a `Clock` fixed at the deterministic test timestamp.
#[must_use]
pub fn fixed_clock() -> Clock {
    Clock::fixed(fixed_now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let mut clock = Clock::manual(fixed_now());
        let observer = clock.clone();
        clock.advance(Duration::seconds(7));
        assert_eq!(observer.now(), fixed_now() + Duration::seconds(7));
    }

    #[test]
    fn seconds_between_clamps_negative_spans() {
        let now = fixed_now();
        assert_eq!(seconds_between(now, now + Duration::milliseconds(1_250)), 1.25);
        assert_eq!(seconds_between(now, now - Duration::seconds(3)), 0.0);
    }

    #[test]
    fn truncate_centis_drops_extra_precision() {
        assert_eq!(truncate_centis(12.3456), 12.34);
        assert_eq!(truncate_centis(5.999), 5.99);
    }

    #[test]
    fn truncate_centis_keeps_exact_centisecond_spans() {
        let start = fixed_now();
        for (millis, stored) in [(290, 0.29), (1_150, 1.15), (2_010, 2.01), (2_019, 2.01)] {
            let elapsed = seconds_between(start, start + Duration::milliseconds(millis));
            assert_eq!(truncate_centis(elapsed), stored, "{millis} ms");
        }
    }
}
