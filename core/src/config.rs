//! Engine configuration.
//!
//! Fine and limit parameters are an explicit value constructed once and
//! injected into the engine environment — never fetched ambiently per call.
//! [`CirculationConfig::from_settings`] adapts the flat key→value settings
//! map the surrounding application stores; unknown or unparsable values fall
//! back to the defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::money::Money;

/// Settings key for the loan period in days
pub const MAX_BORROW_DAYS_KEY: &str = "MAX_BORROW_DAYS";
/// Settings key for the per-day overdue fine
pub const FINE_PER_DAY_KEY: &str = "FINE_PER_DAY";
/// Settings key for the global fine switch
pub const ENABLE_FINES_KEY: &str = "ENABLE_FINES";
/// Settings key for the per-transaction item limit
pub const MAX_BOOKS_PER_TRANSACTION_KEY: &str = "MAX_BOOKS_PER_TRANSACTION";

/// Fine and limit parameters for the circulation engine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CirculationConfig {
    /// Loan period: `due_date = borrow_date + max_borrow_days`
    pub max_borrow_days: u32,
    /// Fine charged per calendar day per late copy
    pub fine_per_day: Money,
    /// Global switch: when false, every fine computes to zero
    pub fines_enabled: bool,
    /// Maximum number of items in one borrow or request
    pub max_items_per_transaction: usize,
    /// Default extension applied by a renewal
    pub renewal_days: u32,
}

impl Default for CirculationConfig {
    fn default() -> Self {
        Self {
            max_borrow_days: 14,
            fine_per_day: Money::from_units(5),
            fines_enabled: true,
            max_items_per_transaction: 10,
            renewal_days: 14,
        }
    }
}

impl CirculationConfig {
    /// Builds a config from the application's flat settings map.
    ///
    /// Missing keys and values that fail to parse keep their defaults.
    #[must_use]
    pub fn from_settings(settings: &HashMap<String, String>) -> Self {
        let mut config = Self::default();
        if let Some(days) = settings.get(MAX_BORROW_DAYS_KEY).and_then(|v| v.parse().ok()) {
            config.max_borrow_days = days;
        }
        if let Some(units) = settings.get(FINE_PER_DAY_KEY).and_then(|v| v.parse().ok()) {
            config.fine_per_day = Money::from_units(units);
        }
        if let Some(enabled) = settings.get(ENABLE_FINES_KEY).and_then(|v| v.parse().ok()) {
            config.fines_enabled = enabled;
        }
        if let Some(max) = settings
            .get(MAX_BOOKS_PER_TRANSACTION_KEY)
            .and_then(|v| v.parse().ok())
        {
            config.max_items_per_transaction = max;
        }
        config
    }
}
