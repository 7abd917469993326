//! Copy allocation: matching requested items against available copies.
//!
//! [`allocate`] is a pure function over immutable book snapshots. Within one
//! allocation run a copy is consumed by at most one item, no matter how many
//! entries reference it — entries arrive already merged per canonical book,
//! but the run-wide consumed set guards the invariant regardless.
//!
//! Per book entry:
//!
//! 1. Candidates are the book's copies with status `Available`, in stored
//!    order, further restricted by the entry's allow-list if present.
//! 2. **Preference pass**: items naming an explicit copy bind it if it is a
//!    candidate and unconsumed; otherwise the run fails naming the first
//!    offender — an invalid preference never falls back silently.
//! 3. **Fill pass**: remaining items consume candidates front-to-back.
//! 4. **Shortage policy**: an unfilled remainder fails the whole run for a
//!    `required` entry when partial issuance is disallowed; otherwise it is
//!    reported as a shortage without blocking the rest.

use circulation_core::book::Book;
use circulation_core::ids::{BookId, CopyId, RequestItemId};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

/// One item to satisfy: a slot for a copy of the entry's book
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationItem {
    /// Stable item identity carried into the transaction
    pub item_id: RequestItemId,
    /// Explicitly requested copy, if the caller named one
    pub preferred: Option<CopyId>,
}

impl AllocationItem {
    /// An anonymous slot with no copy preference
    #[must_use]
    pub fn any() -> Self {
        Self {
            item_id: RequestItemId::new(),
            preferred: None,
        }
    }

    /// A slot requesting one explicit copy
    #[must_use]
    pub fn preferring(copy_id: CopyId) -> Self {
        Self {
            item_id: RequestItemId::new(),
            preferred: Some(copy_id),
        }
    }
}

/// One book entry of an allocation run (already merged per canonical book)
#[derive(Debug)]
pub struct BookAllocation<'a> {
    /// Snapshot of the book whose copies are candidates
    pub book: &'a Book,
    /// Items to satisfy from this book
    pub items: Vec<AllocationItem>,
    /// Optional allow-list restricting candidate copies
    pub allow_list: Option<&'a BTreeSet<CopyId>>,
    /// Whether a shortage of this book may fail the whole run
    pub required: bool,
}

/// Whether an unfilled remainder on a required entry fails the run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShortagePolicy {
    /// Partial issuance disallowed: a required entry must fill completely
    Strict,
    /// Shortfalls are reported, never fatal
    AllowPartial,
}

/// A bound item: this copy satisfies this item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// The satisfied item
    pub item_id: RequestItemId,
    /// The book the copy belongs to
    pub book_id: BookId,
    /// The bound copy
    pub copy_id: CopyId,
}

/// The gap between requested quantity and copies actually bound
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortage {
    /// The book that ran short
    pub book_id: BookId,
    /// Items requested from the book
    pub requested: u32,
    /// Items actually bound
    pub allocated: u32,
}

/// Result of a successful allocation run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AllocationPlan {
    /// Bound items across all entries, in entry order
    pub assignments: Vec<Assignment>,
    /// Per-book shortfalls (empty when everything filled)
    pub shortages: Vec<Shortage>,
}

impl AllocationPlan {
    /// Copies bound for one book, in binding order
    #[must_use]
    pub fn copies_for_book(&self, book_id: BookId) -> Vec<CopyId> {
        self.assignments
            .iter()
            .filter(|a| a.book_id == book_id)
            .map(|a| a.copy_id)
            .collect()
    }
}

/// Why an allocation run failed (nothing was committed)
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum AllocationError {
    /// An explicitly requested copy is not an available candidate
    #[error("requested copy {copy_id} of book {book_id} is not available")]
    PreferredUnavailable {
        /// The book the preference was made against
        book_id: BookId,
        /// The first offending copy
        copy_id: CopyId,
    },

    /// An explicitly requested copy was already consumed in this run
    #[error("requested copy {copy_id} of book {book_id} is already taken in this request")]
    PreferredDuplicate {
        /// The book the preference was made against
        book_id: BookId,
        /// The first offending copy
        copy_id: CopyId,
    },

    /// A required entry could not fill under the strict policy
    #[error("insufficient copies of book {book_id}: requested {requested}, available {available}")]
    InsufficientCopies {
        /// The book that ran short
        book_id: BookId,
        /// Items requested from the book
        requested: u32,
        /// Candidates that were actually available
        available: u32,
    },
}

/// Binds items to copies across all entries of one run.
///
/// # Errors
///
/// Returns [`AllocationError`] when a preference cannot be honored or a
/// required entry cannot fill under [`ShortagePolicy::Strict`]; in that case
/// the caller must commit nothing.
pub fn allocate(
    entries: &[BookAllocation<'_>],
    policy: ShortagePolicy,
) -> Result<AllocationPlan, AllocationError> {
    let mut plan = AllocationPlan::default();
    let mut consumed: HashSet<CopyId> = HashSet::new();

    for entry in entries {
        let book_id = entry.book.id;
        let candidates: SmallVec<[CopyId; 8]> = entry
            .book
            .available_copy_ids()
            .filter(|id| entry.allow_list.is_none_or(|allowed| allowed.contains(id)))
            .collect();

        #[allow(clippy::cast_possible_truncation)]
        let requested = entry.items.len() as u32;
        let mut allocated: u32 = 0;

        // Preference pass: explicit copies bind or fail, never fall back
        for item in &entry.items {
            let Some(wanted) = item.preferred else {
                continue;
            };
            if !candidates.contains(&wanted) {
                return Err(AllocationError::PreferredUnavailable {
                    book_id,
                    copy_id: wanted,
                });
            }
            if !consumed.insert(wanted) {
                return Err(AllocationError::PreferredDuplicate {
                    book_id,
                    copy_id: wanted,
                });
            }
            plan.assignments.push(Assignment {
                item_id: item.item_id,
                book_id,
                copy_id: wanted,
            });
            allocated += 1;
        }

        // Fill pass: remaining items consume candidates front-to-back
        let pool: SmallVec<[CopyId; 8]> = candidates
            .iter()
            .filter(|id| !consumed.contains(*id))
            .copied()
            .collect();
        let mut pool = pool.into_iter();
        for item in entry.items.iter().filter(|i| i.preferred.is_none()) {
            let Some(copy_id) = pool.next() else {
                break;
            };
            consumed.insert(copy_id);
            plan.assignments.push(Assignment {
                item_id: item.item_id,
                book_id,
                copy_id,
            });
            allocated += 1;
        }

        if allocated < requested {
            if entry.required && policy == ShortagePolicy::Strict {
                #[allow(clippy::cast_possible_truncation)]
                return Err(AllocationError::InsufficientCopies {
                    book_id,
                    requested,
                    available: candidates.len() as u32,
                });
            }
            plan.shortages.push(Shortage {
                book_id,
                requested,
                allocated,
            });
        }
    }

    Ok(plan)
}
