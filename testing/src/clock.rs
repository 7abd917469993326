//! Fixed clock for deterministic tests.

use chrono::{DateTime, Duration, Utc};
use circulation_core::environment::Clock;
use std::sync::{Mutex, PoisonError};

/// A clock frozen at a settable instant.
///
/// Keeps the full-precision instant behind a mutex so advancing by a
/// sub-millisecond duration never drifts and the clock can be shared
/// across tasks.
#[derive(Debug)]
pub struct FixedClock {
    instant: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Creates a clock frozen at `instant`
    #[must_use]
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self {
            instant: Mutex::new(instant),
        }
    }

    /// Moves the clock forward
    pub fn advance(&self, by: Duration) {
        let mut guard = self.instant.lock().unwrap_or_else(PoisonError::into_inner);
        *guard += by;
    }

    /// Sets the clock to an absolute instant
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.instant.lock().unwrap_or_else(PoisonError::into_inner) = instant;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.instant.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
