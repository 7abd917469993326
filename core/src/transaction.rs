//! The lending aggregate: transactions and their line items.
//!
//! Lifecycle: `Requested → {Borrowed, Cancelled, Rejected}`,
//! `Borrowed → {Returned, Missing}`. A partial item return keeps the
//! transaction `Borrowed`. `Returned`, `Cancelled`, and `Rejected` are
//! terminal; transactions are never deleted — terminal records stay for
//! audit. `Missing` is an externally imposed override: the engine accepts
//! it on read but never transitions into it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::environment::IdGenerator;
use crate::ids::{AnnualSetId, BookId, CopyId, RequestItemId, TransactionId, UserId};
use crate::money::Money;

/// Transaction kind, also the id prefix
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// A single-call staff loan or a self-service request
    Regular,
    /// A bulk issuance of an annual set to one student
    AnnualSet,
}

impl TransactionKind {
    /// The kind tag used as the transaction id prefix
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Regular => "borrow",
            Self::AnnualSet => "annual",
        }
    }
}

/// Transaction lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Self-service request awaiting staff action; no copies bound
    Requested,
    /// Copies are out on loan
    Borrowed,
    /// Every item returned
    Returned,
    /// Cancelled by the requester or staff while still `Requested`
    Cancelled,
    /// Rejected by staff while still `Requested`
    Rejected,
    /// Externally imposed override (copies unaccounted for)
    Missing,
}

impl TransactionStatus {
    /// Whether the status is terminal (record retained, never mutated again)
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Returned | Self::Cancelled | Self::Rejected)
    }
}

/// Line item status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Requested; no copy bound yet
    Requested,
    /// A copy is bound and out on loan
    Borrowed,
    /// The copy came back
    Returned,
}

/// One line item of a transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionItem {
    /// Stable identity assigned before any copy is bound
    pub request_item_id: RequestItemId,
    /// The catalogue book this item is for
    pub book_id: BookId,
    /// The bound copy; `None` while the item is `Requested`
    pub copy_id: Option<CopyId>,
    /// Item status
    pub status: ItemStatus,
    /// When the copy came back, if it has
    pub returned_at: Option<DateTime<Utc>>,
}

impl TransactionItem {
    /// Creates a `Requested` item with no copy bound
    #[must_use]
    pub fn requested(book_id: BookId) -> Self {
        Self {
            request_item_id: RequestItemId::new(),
            book_id,
            copy_id: None,
            status: ItemStatus::Requested,
            returned_at: None,
        }
    }

    /// Creates a `Borrowed` item bound to a copy
    #[must_use]
    pub fn borrowed(book_id: BookId, copy_id: CopyId) -> Self {
        Self {
            request_item_id: RequestItemId::new(),
            book_id,
            copy_id: Some(copy_id),
            status: ItemStatus::Borrowed,
            returned_at: None,
        }
    }
}

/// The lending aggregate
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Kind-prefixed unique id
    pub id: TransactionId,
    /// Borrower
    pub user_id: UserId,
    /// Transaction kind
    pub kind: TransactionKind,
    /// Lifecycle status
    pub status: TransactionStatus,
    /// Ordered line items
    pub items: Vec<TransactionItem>,
    /// When copies were handed out (or the request was made)
    pub borrow_date: DateTime<Utc>,
    /// Due date; `None` for annual sets (academic-year windows are external)
    pub due_date: Option<DateTime<Utc>>,
    /// When the last item came back
    pub return_date: Option<DateTime<Utc>>,
    /// Accrued overdue fines
    pub fine_amount: Money,
    /// How many times the loan was renewed
    pub renewal_count: u32,
    /// The annual set this transaction issues, if any
    pub annual_set_id: Option<AnnualSetId>,
    /// Reason recorded when the transaction was cancelled or rejected
    pub closed_reason: Option<String>,
    /// Who cancelled or rejected the transaction
    pub closed_by: Option<UserId>,
}

impl Transaction {
    /// Whether the transaction still holds or may come to hold copies
    ///
    /// `Missing` counts as active: the copies are unaccounted for but not
    /// released, so the user still "holds" them for conflict checks.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Items whose copy has not come back yet
    pub fn unreturned_items(&self) -> impl Iterator<Item = &TransactionItem> {
        self.items
            .iter()
            .filter(|item| item.status == ItemStatus::Borrowed)
    }

    /// Item holding the given copy, mutably
    pub fn item_for_copy_mut(&mut self, copy_id: CopyId) -> Option<&mut TransactionItem> {
        self.items
            .iter_mut()
            .find(|item| item.copy_id == Some(copy_id))
    }

    /// Whether every item has been returned
    #[must_use]
    pub fn all_items_returned(&self) -> bool {
        self.items
            .iter()
            .all(|item| item.status == ItemStatus::Returned)
    }

    /// Whether the loan is past due at `now`
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.due_date.is_some_and(|due| now > due)
    }

    /// Backfills a missing or placeholder id on a legacy record
    ///
    /// Returns `true` if an id was assigned.
    pub fn backfill_id(&mut self, ids: &dyn IdGenerator) -> bool {
        if self.id.as_str().is_empty() {
            self.id = ids.transaction_id(self.kind);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::UuidIds;

    fn bare_transaction(status: TransactionStatus) -> Transaction {
        Transaction {
            id: TransactionId::from_raw("borrow-1".to_string()),
            user_id: UserId::new(),
            kind: TransactionKind::Regular,
            status,
            items: Vec::new(),
            borrow_date: Utc::now(),
            due_date: None,
            return_date: None,
            fine_amount: Money::ZERO,
            renewal_count: 0,
            annual_set_id: None,
            closed_reason: None,
            closed_by: None,
        }
    }

    #[test]
    fn terminal_statuses_are_not_active() {
        assert!(bare_transaction(TransactionStatus::Requested).is_active());
        assert!(bare_transaction(TransactionStatus::Borrowed).is_active());
        assert!(bare_transaction(TransactionStatus::Missing).is_active());
        assert!(!bare_transaction(TransactionStatus::Returned).is_active());
        assert!(!bare_transaction(TransactionStatus::Cancelled).is_active());
        assert!(!bare_transaction(TransactionStatus::Rejected).is_active());
    }

    #[test]
    fn backfill_only_touches_empty_ids() {
        let ids = UuidIds;
        let mut tx = bare_transaction(TransactionStatus::Borrowed);
        assert!(!tx.backfill_id(&ids));
        assert_eq!(tx.id.as_str(), "borrow-1");

        tx.id = TransactionId::from_raw(String::new());
        assert!(tx.backfill_id(&ids));
        assert!(tx.id.as_str().starts_with("borrow-"));
    }

    #[test]
    fn overdue_requires_a_due_date() {
        let now = Utc::now();
        let mut tx = bare_transaction(TransactionStatus::Borrowed);
        assert!(!tx.is_overdue(now));
        tx.due_date = Some(now - chrono::Duration::days(1));
        assert!(tx.is_overdue(now));
    }
}
