//! Library users and their borrowing statistics.

use serde::{Deserialize, Serialize};

use crate::ids::UserId;
use crate::money::Money;
use crate::refs::Role;
use crate::transaction::{ItemStatus, Transaction};

/// Per-user rollup of borrowing activity
///
/// Mutated alongside transaction changes; must always equal the rollup
/// derivable by replaying the user's transaction history ([`Self::replay`]
/// is that oracle).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBorrowingStats {
    /// Copies ever issued to the user
    pub total_borrowed: u64,
    /// Copies currently out with the user
    pub currently_borrowed: u64,
    /// Copies returned by the user
    pub total_returned: u64,
    /// Fines accrued across all loans
    pub total_fines: Money,
}

impl UserBorrowingStats {
    /// Recomputes the rollup from the user's full transaction history.
    ///
    /// Counts are per copy, not per transaction: a three-item loan moves
    /// `total_borrowed` by three. Requested items that never got a copy do
    /// not count as borrowed.
    #[must_use]
    pub fn replay(history: &[Transaction]) -> Self {
        let mut stats = Self::default();
        for tx in history {
            for item in &tx.items {
                match item.status {
                    ItemStatus::Borrowed => {
                        stats.total_borrowed += 1;
                        stats.currently_borrowed += 1;
                    }
                    ItemStatus::Returned => {
                        stats.total_borrowed += 1;
                        stats.total_returned += 1;
                    }
                    ItemStatus::Requested => {}
                }
            }
            stats.total_fines = stats.total_fines.saturating_add(tx.fine_amount);
        }
        stats
    }

    /// Records `count` copies issued
    pub fn record_borrowed(&mut self, count: u64) {
        self.total_borrowed += count;
        self.currently_borrowed += count;
    }

    /// Records `count` copies returned with an accrued `fine`
    pub fn record_returned(&mut self, count: u64, fine: Money) {
        self.currently_borrowed = self.currently_borrowed.saturating_sub(count);
        self.total_returned += count;
        self.total_fines = self.total_fines.saturating_add(fine);
    }
}

/// A library user (borrower or staff member)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Canonical user identifier
    pub id: UserId,
    /// Display name
    pub name: String,
    /// Library card number, kept as an alternate lookup key only
    pub card_number: Option<String>,
    /// Role used for permission checks
    pub role: Role,
    /// Inactive users cannot borrow
    pub active: bool,
    /// Borrowing rollup
    pub stats: UserBorrowingStats,
}

impl User {
    /// Creates an active user with empty statistics
    #[must_use]
    pub const fn new(id: UserId, name: String, card_number: Option<String>, role: Role) -> Self {
        Self {
            id,
            name,
            card_number,
            role,
            active: true,
            stats: UserBorrowingStats {
                total_borrowed: 0,
                currently_borrowed: 0,
                total_returned: 0,
                total_fines: Money::ZERO,
            },
        }
    }
}
