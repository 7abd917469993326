//! Annual-set issuance: one bulk transaction per student per set.
//!
//! An annual set is issued as a single `annual-…` transaction with no due
//! date (the lending window is the academic year, tracked externally).
//! Duplicate entries for the same book are merged before allocation;
//! optional entries whose book is missing are skipped, missing required
//! books fail the issuance. Under `allow_partial`, shortages on any entry
//! are reported instead of failing, as long as at least one copy issues.

use circulation_core::annual_set::AnnualSet;
use circulation_core::error::{CirculationError, CirculationResult};
use circulation_core::ids::AnnualSetId;
use circulation_core::money::Money;
use circulation_core::refs::{Actor, BookRef, UserRef};
use circulation_core::transaction::{
    ItemStatus, Transaction, TransactionItem, TransactionKind, TransactionStatus,
};
use circulation_core::environment::{Notice, NoticeKind, Recipients};
use serde_json::json;
use tracing::{debug, info};

use crate::allocator::{allocate, AllocationItem, BookAllocation, Shortage, ShortagePolicy};
use crate::engine::{CirculationEngine, ALLOCATION_RETRIES};
use crate::ledger::{BookWrite, CommitOutcome, CopyLedger};

/// Result of an annual-set issuance
#[derive(Clone, Debug)]
pub struct IssueOutcome {
    /// The single bulk transaction created
    pub transaction: Transaction,
    /// Books that issued fewer copies than the set asked for
    pub shortages: Vec<Shortage>,
    /// Optional entries skipped because their book does not exist
    pub skipped: Vec<BookRef>,
}

impl CirculationEngine {
    /// Issues an annual set to a student as one bulk transaction (staff only).
    ///
    /// A student holds at most one active transaction per set; a second
    /// issuance is rejected while the first is active.
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError::DuplicateAnnualSetBorrowing`] when the
    /// student already holds the set, [`CirculationError::InsufficientCopies`]
    /// when a required entry cannot fill (or nothing can be issued at all),
    /// or any other [`CirculationError`] on validation failure.
    pub async fn issue_annual_set(
        &self,
        actor: Actor,
        user: &UserRef,
        annual_set_id: AnnualSetId,
        allow_partial: bool,
    ) -> CirculationResult<IssueOutcome> {
        let result = self
            .do_issue_annual_set(actor, user, annual_set_id, allow_partial)
            .await;
        let detail = match &result {
            Ok(outcome) => json!({
                "user": user.to_string(),
                "annual_set_id": annual_set_id,
                "allow_partial": allow_partial,
                "issued": outcome.transaction.items.len(),
                "shortages": outcome.shortages,
                "skipped": outcome.skipped.iter().map(ToString::to_string).collect::<Vec<_>>(),
            }),
            Err(_) => json!({
                "user": user.to_string(),
                "annual_set_id": annual_set_id,
                "allow_partial": allow_partial,
            }),
        };
        let transaction_id = result.as_ref().ok().map(|o| o.transaction.id.clone());
        self.record_audit(actor, "issue_annual_set", transaction_id, detail, &result)
            .await;
        result
    }

    async fn do_issue_annual_set(
        &self,
        actor: Actor,
        user: &UserRef,
        annual_set_id: AnnualSetId,
        allow_partial: bool,
    ) -> CirculationResult<IssueOutcome> {
        if !actor.is_privileged() {
            return Err(CirculationError::Forbidden(
                "only staff may issue annual sets".to_string(),
            ));
        }
        let Some(set) = self.env().annual_sets.annual_set(annual_set_id).await? else {
            return Err(CirculationError::AnnualSetNotFound(annual_set_id));
        };
        let borrower = self.load_active_user(user).await?;
        let user_id = borrower.doc.id;

        if let Some(existing) = self
            .env()
            .transactions
            .active_annual_set_borrowing(user_id, annual_set_id)
            .await?
        {
            return Err(CirculationError::DuplicateAnnualSetBorrowing {
                user_id,
                annual_set_id,
                existing,
            });
        }

        // Resolve entries; required books must exist, optional ones may skip
        let mut kept = Vec::with_capacity(set.entries.len());
        let mut canonical = Vec::with_capacity(set.entries.len());
        let mut skipped = Vec::new();
        for entry in &set.entries {
            match self.env().books.resolve(&entry.book).await? {
                Some(book_id) => {
                    kept.push(entry.clone());
                    canonical.push(book_id);
                }
                None if entry.required => {
                    return Err(CirculationError::BookNotFound(entry.book.clone()));
                }
                None => {
                    debug!(book = %entry.book, "skipping optional entry, book not found");
                    skipped.push(entry.book.clone());
                }
            }
        }
        let merged = AnnualSet::merge_entries(&kept, &canonical);
        if merged.is_empty() {
            return Err(CirculationError::Validation(
                "annual set has no issuable entries".to_string(),
            ));
        }

        let policy = if allow_partial {
            ShortagePolicy::AllowPartial
        } else {
            ShortagePolicy::Strict
        };
        let now = self.env().clock.now();

        for attempt in 0..ALLOCATION_RETRIES {
            let mut books = self.load_books(merged.iter().map(|(id, _)| *id)).await?;

            let plan = {
                let entries: Vec<BookAllocation<'_>> = merged
                    .iter()
                    .map(|(book_id, entry)| BookAllocation {
                        book: &books[book_id].doc,
                        items: (0..entry.quantity).map(|_| AllocationItem::any()).collect(),
                        allow_list: entry.copy_ids.as_ref(),
                        required: entry.required,
                    })
                    .collect();
                allocate(&entries, policy)
            };
            let plan = match plan {
                Ok(plan) => plan,
                Err(err) => return Err(self.allocation_failure(err).await),
            };
            if plan.assignments.is_empty() {
                // Even a partial issuance must issue something
                let first = plan.shortages.first();
                return Err(first.map_or_else(
                    || CirculationError::Validation("annual set issued no copies".to_string()),
                    |s| CirculationError::InsufficientCopies {
                        book_id: s.book_id,
                        requested: s.requested,
                        available: s.allocated,
                    },
                ));
            }

            let mut writes = Vec::new();
            for (book_id, versioned) in &mut books {
                let copies = plan.copies_for_book(*book_id);
                if copies.is_empty() {
                    continue;
                }
                CopyLedger::apply_borrow(&mut versioned.doc, &copies, user_id, now)?;
                writes.push(BookWrite {
                    book: versioned.doc.clone(),
                    expected: versioned.version,
                    stamped: copies,
                });
            }

            let staged = writes.clone();
            match self.ledger().commit_borrow(writes).await? {
                CommitOutcome::Contended => {
                    debug!(attempt, %annual_set_id, "annual set allocation contended, retrying");
                }
                CommitOutcome::Committed => {
                    let items: Vec<TransactionItem> = plan
                        .assignments
                        .iter()
                        .map(|a| TransactionItem {
                            request_item_id: a.item_id,
                            book_id: a.book_id,
                            copy_id: Some(a.copy_id),
                            status: ItemStatus::Borrowed,
                            returned_at: None,
                        })
                        .collect();
                    #[allow(clippy::cast_possible_truncation)]
                    let copies_issued = items.len() as u64;
                    let tx = Transaction {
                        id: self.env().ids.transaction_id(TransactionKind::AnnualSet),
                        user_id,
                        kind: TransactionKind::AnnualSet,
                        status: TransactionStatus::Borrowed,
                        items,
                        borrow_date: now,
                        due_date: None,
                        return_date: None,
                        fine_amount: Money::ZERO,
                        renewal_count: 0,
                        annual_set_id: Some(annual_set_id),
                        closed_reason: None,
                        closed_by: None,
                    };
                    if let Err(err) = self.env().transactions.insert_transaction(tx.clone()).await
                    {
                        self.ledger().release(&staged).await;
                        return Err(err.into());
                    }
                    self.bump_user_stats(user_id, |stats| stats.record_borrowed(copies_issued))
                        .await;
                    self.send_notice(
                        Recipients::Users(vec![user_id]),
                        Notice {
                            title: "Annual set issued".to_string(),
                            message: format!(
                                "{}: {copies_issued} copies were issued to you",
                                set.name
                            ),
                            kind: NoticeKind::CopiesIssued,
                            transaction_id: Some(tx.id.clone()),
                        },
                    )
                    .await;
                    info!(
                        transaction_id = %tx.id,
                        %user_id,
                        %annual_set_id,
                        copies = copies_issued,
                        shortages = plan.shortages.len(),
                        "annual set issued"
                    );
                    return Ok(IssueOutcome {
                        transaction: tx,
                        shortages: plan.shortages,
                        skipped,
                    });
                }
            }
        }
        Err(CirculationError::AllocationContention)
    }
}
