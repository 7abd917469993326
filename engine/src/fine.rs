//! Overdue fine computation.
//!
//! Pure functions of their inputs: the fine schedule arrives as explicit
//! configuration, never from ambient state. Lateness uses a calendar-day
//! ceiling — any overage into a new day counts as a full day.

use chrono::{DateTime, Utc};
use circulation_core::config::CirculationConfig;
use circulation_core::money::Money;

const SECONDS_PER_DAY: u64 = 86_400;

/// Number of chargeable late days between `due` and `returned`.
///
/// Zero when returned on or before the due date; otherwise the overdue
/// duration rounded up to whole calendar days (36 hours late is 2 days).
#[must_use]
pub fn late_days(due: DateTime<Utc>, returned: DateTime<Utc>) -> u32 {
    if returned <= due {
        return 0;
    }
    // The guard above makes the difference strictly positive
    #[allow(clippy::cast_sign_loss)]
    let overdue_seconds = (returned - due).num_seconds() as u64;
    #[allow(clippy::cast_possible_truncation)]
    {
        overdue_seconds.div_ceil(SECONDS_PER_DAY) as u32
    }
}

/// Fine for one return operation.
///
/// Multiplies the per-day rate by the late-day count and by the number of
/// copies *actually returned late in this operation* — not a flat
/// per-transaction fee. Always zero when fines are disabled.
#[must_use]
pub fn fine_for_return(
    due: DateTime<Utc>,
    returned: DateTime<Utc>,
    late_copies: u32,
    config: &CirculationConfig,
) -> Money {
    if !config.fines_enabled || late_copies == 0 {
        return Money::ZERO;
    }
    config
        .fine_per_day
        .saturating_multiply(u64::from(late_days(due, returned)))
        .saturating_multiply(u64::from(late_copies))
}
