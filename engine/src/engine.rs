//! The circulation engine: transaction lifecycle operations.
//!
//! Every operation follows the same shape: resolve references to canonical
//! ids at the boundary, validate everything before mutating anything, commit
//! copy state through the [`CopyLedger`], then persist the transaction and
//! fan out best-effort notifications and audit records. An operation that
//! returns an error has not partially committed.
//!
//! Lifecycle: `Requested → {Borrowed, Cancelled, Rejected}`,
//! `Borrowed → Returned` (partial returns keep the transaction `Borrowed`).

use chrono::Duration;
use circulation_core::book::Book;
use circulation_core::environment::{
    AuditEntry, AuditOutcome, Notice, NoticeKind, Recipients,
};
use circulation_core::error::{
    ApprovalFault, CirculationError, CirculationResult, StoreError,
};
use circulation_core::ids::{BookId, CopyId, RequestItemId, TransactionId, UserId};
use circulation_core::money::Money;
use circulation_core::refs::{Actor, BookRef, Role, UserRef};
use circulation_core::store::Versioned;
use circulation_core::transaction::{
    ItemStatus, Transaction, TransactionItem, TransactionKind, TransactionStatus,
};
use circulation_core::user::{User, UserBorrowingStats};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use crate::allocator::{
    allocate, AllocationError, AllocationItem, BookAllocation, ShortagePolicy,
};
use crate::environment::Environment;
use crate::ledger::{BookWrite, CommitOutcome, CopyLedger};

/// Attempts at allocate-and-commit before reporting contention
pub(crate) const ALLOCATION_RETRIES: usize = 3;

/// CAS attempts for transaction-only updates
const TRANSACTION_RETRIES: usize = 3;

/// CAS attempts for the borrowing-statistics rollup
const STATS_RETRIES: usize = 5;

/// One line of a staff borrow: a book, optionally pinned to an explicit copy
#[derive(Clone, Debug)]
pub struct BorrowItem {
    /// The book to lend, possibly by alternate key
    pub book: BookRef,
    /// Explicit copy to lend; `None` lets the allocator pick
    pub copy_id: Option<CopyId>,
}

impl BorrowItem {
    /// Any copy of the book
    #[must_use]
    pub const fn any(book: BookRef) -> Self {
        Self { book, copy_id: None }
    }

    /// One explicit copy of the book
    #[must_use]
    pub const fn copy(book: BookRef, copy_id: CopyId) -> Self {
        Self {
            book,
            copy_id: Some(copy_id),
        }
    }
}

/// A staff borrow: copies are bound and handed out in one call
#[derive(Clone, Debug)]
pub struct BorrowRequest {
    /// The borrower, possibly by alternate key
    pub user: UserRef,
    /// Items to lend
    pub items: Vec<BorrowItem>,
}

/// A self-service request: books only, no copies bound until approval
#[derive(Clone, Debug)]
pub struct RequestSubmission {
    /// The requester, possibly by alternate key
    pub user: UserRef,
    /// The requested books
    pub books: Vec<BookRef>,
}

/// One copy assignment supplied with an approval
#[derive(Clone, Debug)]
pub struct CopyAssignment {
    /// The request item this copy satisfies; `None` auto-matches by book
    pub request_item_id: Option<RequestItemId>,
    /// The copy to issue
    pub copy_id: CopyId,
}

/// The circulation engine
pub struct CirculationEngine {
    env: Environment,
    ledger: CopyLedger,
}

impl CirculationEngine {
    /// Creates an engine over its environment
    #[must_use]
    pub fn new(env: Environment) -> Self {
        let ledger = CopyLedger::new(env.books.clone());
        Self { env, ledger }
    }

    /// The ledger, for callers that need direct copy lookups
    #[must_use]
    pub const fn ledger(&self) -> &CopyLedger {
        &self.ledger
    }

    /// The injected environment
    #[must_use]
    pub const fn env(&self) -> &Environment {
        &self.env
    }

    // ------------------------------------------------------------------
    // Staff borrow
    // ------------------------------------------------------------------

    /// Issues copies to a user in one call (staff only).
    ///
    /// All-or-nothing: every item gets a copy or nothing is lent. Explicit
    /// copy requests bind exactly that copy or fail; the rest are filled
    /// from available copies in shelf order.
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError`] on any validation failure or when
    /// concurrent updates keep invalidating the allocation.
    pub async fn borrow(
        &self,
        actor: Actor,
        request: BorrowRequest,
    ) -> CirculationResult<Transaction> {
        let detail = json!({
            "user": request.user.to_string(),
            "items": request.items.len(),
        });
        let result = self.do_borrow(actor, &request).await;
        let transaction_id = result.as_ref().ok().map(|tx| tx.id.clone());
        self.record_audit(actor, "borrow", transaction_id, detail, &result)
            .await;
        result
    }

    async fn do_borrow(
        &self,
        actor: Actor,
        request: &BorrowRequest,
    ) -> CirculationResult<Transaction> {
        if !actor.is_privileged() {
            return Err(CirculationError::Forbidden(
                "only staff may issue copies directly".to_string(),
            ));
        }
        self.check_item_limit(request.items.len())?;
        let user = self.load_active_user(&request.user).await?;
        let user_id = user.doc.id;

        let mut resolved: Vec<(BookId, Option<CopyId>)> =
            Vec::with_capacity(request.items.len());
        for item in &request.items {
            let book_id = self.resolve_book(&item.book).await?;
            resolved.push((book_id, item.copy_id));
        }

        let now = self.env.clock.now();
        for attempt in 0..ALLOCATION_RETRIES {
            let mut books = self.load_books(resolved.iter().map(|(b, _)| *b)).await?;

            let plan = {
                let entries: Vec<BookAllocation<'_>> = group_items(&resolved)
                    .into_iter()
                    .map(|(book_id, items)| BookAllocation {
                        book: &books[&book_id].doc,
                        items,
                        allow_list: None,
                        required: true,
                    })
                    .collect();
                allocate(&entries, ShortagePolicy::Strict)
            };
            let plan = match plan {
                Ok(plan) => plan,
                Err(err) => return Err(self.allocation_failure(err).await),
            };

            let mut writes = Vec::with_capacity(books.len());
            for (book_id, versioned) in &mut books {
                let copies = plan.copies_for_book(*book_id);
                CopyLedger::apply_borrow(&mut versioned.doc, &copies, user_id, now)?;
                writes.push(BookWrite {
                    book: versioned.doc.clone(),
                    expected: versioned.version,
                    stamped: copies,
                });
            }

            let staged = writes.clone();
            match self.ledger.commit_borrow(writes).await? {
                CommitOutcome::Contended => {
                    debug!(attempt, "borrow allocation contended, retrying");
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
                        id: self.env.ids.transaction_id(TransactionKind::Regular),
                        user_id,
                        kind: TransactionKind::Regular,
                        status: TransactionStatus::Borrowed,
                        items,
                        borrow_date: now,
                        due_date: Some(now + Duration::days(i64::from(self.env.config.max_borrow_days))),
                        return_date: None,
                        fine_amount: Money::ZERO,
                        renewal_count: 0,
                        annual_set_id: None,
                        closed_reason: None,
                        closed_by: None,
                    };
                    if let Err(err) = self.env.transactions.insert_transaction(tx.clone()).await {
                        self.ledger.release(&staged).await;
                        return Err(err.into());
                    }
                    self.bump_user_stats(user_id, |stats| stats.record_borrowed(copies_issued))
                        .await;
                    self.send_notice(
                        Recipients::Users(vec![user_id]),
                        Notice {
                            title: "Copies issued".to_string(),
                            message: format!("{copies_issued} copies were issued to you"),
                            kind: NoticeKind::CopiesIssued,
                            transaction_id: Some(tx.id.clone()),
                        },
                    )
                    .await;
                    info!(transaction_id = %tx.id, %user_id, copies = copies_issued, "copies issued");
                    return Ok(tx);
                }
            }
        }
        Err(CirculationError::AllocationContention)
    }

    // ------------------------------------------------------------------
    // Self-service request
    // ------------------------------------------------------------------

    /// Submits a borrowing request; no copies are bound until approval.
    ///
    /// A user may submit for themselves; staff may submit on behalf of
    /// anyone.
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError`] on validation failure.
    pub async fn request(
        &self,
        actor: Actor,
        submission: RequestSubmission,
    ) -> CirculationResult<Transaction> {
        let detail = json!({
            "user": submission.user.to_string(),
            "books": submission.books.len(),
        });
        let result = self.do_request(actor, &submission).await;
        let transaction_id = result.as_ref().ok().map(|tx| tx.id.clone());
        self.record_audit(actor, "request", transaction_id, detail, &result)
            .await;
        result
    }

    async fn do_request(
        &self,
        actor: Actor,
        submission: &RequestSubmission,
    ) -> CirculationResult<Transaction> {
        self.check_item_limit(submission.books.len())?;
        let user = self.load_active_user(&submission.user).await?;
        if user.doc.id != actor.user_id && !actor.is_privileged() {
            return Err(CirculationError::Forbidden(
                "users may only request for themselves".to_string(),
            ));
        }

        let mut items = Vec::with_capacity(submission.books.len());
        for book in &submission.books {
            let book_id = self.resolve_book(book).await?;
            items.push(TransactionItem::requested(book_id));
        }

        let now = self.env.clock.now();
        let tx = Transaction {
            id: self.env.ids.transaction_id(TransactionKind::Regular),
            user_id: user.doc.id,
            kind: TransactionKind::Regular,
            status: TransactionStatus::Requested,
            items,
            borrow_date: now,
            due_date: None,
            return_date: None,
            fine_amount: Money::ZERO,
            renewal_count: 0,
            annual_set_id: None,
            closed_reason: None,
            closed_by: None,
        };
        self.env.transactions.insert_transaction(tx.clone()).await?;
        self.send_notice(
            Recipients::Roles(vec![Role::Librarian, Role::Admin]),
            Notice {
                title: "New borrowing request".to_string(),
                message: format!(
                    "{} requested {} book(s)",
                    user.doc.name,
                    tx.items.len()
                ),
                kind: NoticeKind::RequestSubmitted,
                transaction_id: Some(tx.id.clone()),
            },
        )
        .await;
        info!(transaction_id = %tx.id, user_id = %user.doc.id, "request submitted");
        Ok(tx)
    }

    // ------------------------------------------------------------------
    // Approval
    // ------------------------------------------------------------------

    /// Approves a request, binding the supplied copies and issuing them.
    ///
    /// Validation enumerates *every* offending assignment before anything
    /// mutates: a rejection lists all faults, not just the first.
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError::ApprovalRejected`] with the full fault
    /// list, or any other [`CirculationError`] on validation failure.
    pub async fn approve(
        &self,
        actor: Actor,
        transaction_id: &TransactionId,
        assignments: Vec<CopyAssignment>,
    ) -> CirculationResult<Transaction> {
        let result = self.do_approve(actor, transaction_id, &assignments).await;
        let detail = match &result {
            Err(CirculationError::ApprovalRejected { faults }) => json!({
                "assignments": assignments.len(),
                "faults": faults.iter().map(ToString::to_string).collect::<Vec<_>>(),
            }),
            _ => json!({ "assignments": assignments.len() }),
        };
        self.record_audit(
            actor,
            "approve",
            Some(transaction_id.clone()),
            detail,
            &result,
        )
        .await;
        result
    }

    async fn do_approve(
        &self,
        actor: Actor,
        transaction_id: &TransactionId,
        assignments: &[CopyAssignment],
    ) -> CirculationResult<Transaction> {
        if !actor.is_privileged() {
            return Err(CirculationError::Forbidden(
                "only staff may approve requests".to_string(),
            ));
        }
        let read = self.load_transaction(transaction_id).await?;
        if read.doc.status != TransactionStatus::Requested {
            return Err(CirculationError::InvalidStatus {
                operation: "approve",
                status: read.doc.status,
            });
        }
        let user_id = read.doc.user_id;
        let user = self.load_user_by_id(user_id).await?;
        if !user.doc.active {
            return Err(CirculationError::UserInactive(user_id));
        }

        let now = self.env.clock.now();
        for attempt in 0..ALLOCATION_RETRIES {
            let (matches, mut books) =
                self.reconcile_assignments(&read.doc, assignments).await?;

            let mut per_book: BTreeMap<BookId, Vec<CopyId>> = BTreeMap::new();
            for (_, book_id, copy_id) in &matches {
                per_book.entry(*book_id).or_default().push(*copy_id);
            }
            let mut writes = Vec::with_capacity(per_book.len());
            for (book_id, copies) in &per_book {
                let versioned = books.get_mut(book_id).ok_or_else(|| {
                    CirculationError::Internal(format!("book {book_id} vanished during approval"))
                })?;
                CopyLedger::apply_borrow(&mut versioned.doc, copies, user_id, now)?;
                writes.push(BookWrite {
                    book: versioned.doc.clone(),
                    expected: versioned.version,
                    stamped: copies.clone(),
                });
            }

            let staged = writes.clone();
            match self.ledger.commit_borrow(writes).await? {
                CommitOutcome::Contended => {
                    debug!(attempt, %transaction_id, "approval allocation contended, retrying");
                }
                CommitOutcome::Committed => {
                    let mut tx = read.doc.clone();
                    for (item_id, _, copy_id) in &matches {
                        if let Some(item) = tx
                            .items
                            .iter_mut()
                            .find(|i| i.request_item_id == *item_id)
                        {
                            item.copy_id = Some(*copy_id);
                            item.status = ItemStatus::Borrowed;
                        }
                    }
                    tx.status = TransactionStatus::Borrowed;
                    tx.borrow_date = now;
                    tx.due_date =
                        Some(now + Duration::days(i64::from(self.env.config.max_borrow_days)));
                    match self
                        .env
                        .transactions
                        .put_transaction(tx.clone(), read.version)
                        .await
                    {
                        Ok(_) => {}
                        Err(StoreError::VersionConflict { .. }) => {
                            // Someone else acted on the request while we were
                            // committing copies. Undo and report accordingly.
                            self.ledger.release(&staged).await;
                            let fresh = self.load_transaction(transaction_id).await?;
                            if fresh.doc.status == TransactionStatus::Requested {
                                return Err(CirculationError::AllocationContention);
                            }
                            return Err(CirculationError::InvalidStatus {
                                operation: "approve",
                                status: fresh.doc.status,
                            });
                        }
                        Err(err) => {
                            self.ledger.release(&staged).await;
                            return Err(err.into());
                        }
                    }
                    #[allow(clippy::cast_possible_truncation)]
                    let copies_issued = matches.len() as u64;
                    self.bump_user_stats(user_id, |stats| stats.record_borrowed(copies_issued))
                        .await;
                    self.send_notice(
                        Recipients::Users(vec![user_id]),
                        Notice {
                            title: "Request approved".to_string(),
                            message: format!(
                                "your request was approved; {copies_issued} copies are ready"
                            ),
                            kind: NoticeKind::RequestApproved,
                            transaction_id: Some(tx.id.clone()),
                        },
                    )
                    .await;
                    info!(%transaction_id, %user_id, copies = copies_issued, "request approved");
                    return Ok(tx);
                }
            }
        }
        Err(CirculationError::AllocationContention)
    }

    /// Matches assignments to request items, collecting every fault.
    ///
    /// Returns the matched `(item, book, copy)` triples plus the versioned
    /// books they live in, read once per book.
    async fn reconcile_assignments(
        &self,
        tx: &Transaction,
        assignments: &[CopyAssignment],
    ) -> CirculationResult<(
        Vec<(RequestItemId, BookId, CopyId)>,
        BTreeMap<BookId, Versioned<Book>>,
    )> {
        let mut faults: Vec<ApprovalFault> = Vec::new();
        let mut matches: Vec<(RequestItemId, BookId, CopyId)> = Vec::new();
        let mut books: BTreeMap<BookId, Versioned<Book>> = BTreeMap::new();
        let mut seen_copies: Vec<CopyId> = Vec::new();

        for assignment in assignments {
            let copy_id = assignment.copy_id;
            if seen_copies.contains(&copy_id) {
                faults.push(ApprovalFault {
                    item: assignment.request_item_id,
                    copy: Some(copy_id),
                    reason: "copy referenced more than once".to_string(),
                });
                continue;
            }
            seen_copies.push(copy_id);

            let (owning_book, copy) = match self.ledger.find_copy(copy_id).await {
                Ok(found) => found,
                Err(CirculationError::CopyNotFound(_)) => {
                    faults.push(ApprovalFault {
                        item: assignment.request_item_id,
                        copy: Some(copy_id),
                        reason: "copy not found".to_string(),
                    });
                    continue;
                }
                Err(err) => return Err(err),
            };
            let book_id = owning_book.doc.id;
            books.entry(book_id).or_insert(owning_book);

            let item_id = match assignment.request_item_id {
                Some(item_id) => {
                    let Some(item) = tx.items.iter().find(|i| i.request_item_id == item_id)
                    else {
                        faults.push(ApprovalFault {
                            item: Some(item_id),
                            copy: Some(copy_id),
                            reason: "unknown request item".to_string(),
                        });
                        continue;
                    };
                    if matches.iter().any(|(matched, _, _)| *matched == item_id) {
                        faults.push(ApprovalFault {
                            item: Some(item_id),
                            copy: Some(copy_id),
                            reason: "item assigned more than once".to_string(),
                        });
                        continue;
                    }
                    if item.book_id != book_id {
                        faults.push(ApprovalFault {
                            item: Some(item_id),
                            copy: Some(copy_id),
                            reason: "copy belongs to a different book".to_string(),
                        });
                        continue;
                    }
                    item_id
                }
                None => {
                    // Auto-match: first open item for the copy's book
                    let open = tx.items.iter().find(|i| {
                        i.book_id == book_id
                            && i.status == ItemStatus::Requested
                            && !matches.iter().any(|(m, _, _)| *m == i.request_item_id)
                    });
                    let Some(item) = open else {
                        faults.push(ApprovalFault {
                            item: None,
                            copy: Some(copy_id),
                            reason: "no open request item for this book".to_string(),
                        });
                        continue;
                    };
                    item.request_item_id
                }
            };

            if !copy.status.is_available() {
                faults.push(ApprovalFault {
                    item: Some(item_id),
                    copy: Some(copy_id),
                    reason: format!("copy not available (status: {:?})", copy.status),
                });
                continue;
            }
            matches.push((item_id, book_id, copy_id));
        }

        // Every requested item must end up covered; items whose assignment
        // already faulted are not reported a second time
        for item in &tx.items {
            if item.status == ItemStatus::Requested
                && !matches.iter().any(|(m, _, _)| *m == item.request_item_id)
                && !faults.iter().any(|f| f.item == Some(item.request_item_id))
            {
                faults.push(ApprovalFault {
                    item: Some(item.request_item_id),
                    copy: None,
                    reason: "item has no assignment".to_string(),
                });
            }
        }

        if faults.is_empty() {
            Ok((matches, books))
        } else {
            Err(CirculationError::ApprovalRejected { faults })
        }
    }

    // ------------------------------------------------------------------
    // Reject / cancel / renew
    // ------------------------------------------------------------------

    /// Rejects a pending request with a reason (staff only).
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError`] when the transaction is not `Requested`
    /// or the actor is not staff.
    pub async fn reject(
        &self,
        actor: Actor,
        transaction_id: &TransactionId,
        reason: String,
    ) -> CirculationResult<Transaction> {
        let detail = json!({ "reason": reason });
        let result = self.do_reject(actor, transaction_id, reason).await;
        self.record_audit(
            actor,
            "reject",
            Some(transaction_id.clone()),
            detail,
            &result,
        )
        .await;
        result
    }

    async fn do_reject(
        &self,
        actor: Actor,
        transaction_id: &TransactionId,
        reason: String,
    ) -> CirculationResult<Transaction> {
        if !actor.is_privileged() {
            return Err(CirculationError::Forbidden(
                "only staff may reject requests".to_string(),
            ));
        }
        let tx = self
            .update_transaction(transaction_id, |tx| {
                if tx.status != TransactionStatus::Requested {
                    return Err(CirculationError::InvalidStatus {
                        operation: "reject",
                        status: tx.status,
                    });
                }
                tx.status = TransactionStatus::Rejected;
                tx.closed_reason = Some(reason.clone());
                tx.closed_by = Some(actor.user_id);
                Ok(())
            })
            .await?;
        self.send_notice(
            Recipients::Users(vec![tx.user_id]),
            Notice {
                title: "Request rejected".to_string(),
                message: reason_message(&tx),
                kind: NoticeKind::RequestRejected,
                transaction_id: Some(tx.id.clone()),
            },
        )
        .await;
        info!(%transaction_id, "request rejected");
        Ok(tx)
    }

    /// Cancels a pending request (the requester themselves, or staff).
    ///
    /// Notifications referring to the request are archived best-effort.
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError`] when the transaction is not `Requested`
    /// or the actor is neither the requester nor staff.
    pub async fn cancel(
        &self,
        actor: Actor,
        transaction_id: &TransactionId,
        reason: Option<String>,
    ) -> CirculationResult<Transaction> {
        let detail = json!({ "reason": reason });
        let result = self.do_cancel(actor, transaction_id, reason).await;
        self.record_audit(
            actor,
            "cancel",
            Some(transaction_id.clone()),
            detail,
            &result,
        )
        .await;
        result
    }

    async fn do_cancel(
        &self,
        actor: Actor,
        transaction_id: &TransactionId,
        reason: Option<String>,
    ) -> CirculationResult<Transaction> {
        let tx = self
            .update_transaction(transaction_id, |tx| {
                if tx.user_id != actor.user_id && !actor.is_privileged() {
                    return Err(CirculationError::Forbidden(
                        "only the requester or staff may cancel".to_string(),
                    ));
                }
                if tx.status != TransactionStatus::Requested {
                    return Err(CirculationError::InvalidStatus {
                        operation: "cancel",
                        status: tx.status,
                    });
                }
                tx.status = TransactionStatus::Cancelled;
                tx.closed_reason = reason.clone();
                tx.closed_by = Some(actor.user_id);
                Ok(())
            })
            .await?;
        if let Err(err) = self
            .env
            .notifier
            .archive_for_transaction(transaction_id)
            .await
        {
            warn!(%transaction_id, error = %err, "notification archival failed");
        }
        info!(%transaction_id, "request cancelled");
        Ok(tx)
    }

    /// Extends a loan's due date (the borrower themselves, or staff).
    ///
    /// `days` defaults to the configured renewal period. The bound copies
    /// are untouched.
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError`] when the transaction is not `Borrowed`
    /// or carries no due date.
    pub async fn renew(
        &self,
        actor: Actor,
        transaction_id: &TransactionId,
        days: Option<u32>,
    ) -> CirculationResult<Transaction> {
        let detail = json!({ "days": days });
        let result = self.do_renew(actor, transaction_id, days).await;
        self.record_audit(
            actor,
            "renew",
            Some(transaction_id.clone()),
            detail,
            &result,
        )
        .await;
        result
    }

    async fn do_renew(
        &self,
        actor: Actor,
        transaction_id: &TransactionId,
        days: Option<u32>,
    ) -> CirculationResult<Transaction> {
        let extension = i64::from(days.unwrap_or(self.env.config.renewal_days));
        let tx = self
            .update_transaction(transaction_id, |tx| {
                if tx.user_id != actor.user_id && !actor.is_privileged() {
                    return Err(CirculationError::Forbidden(
                        "only the borrower or staff may renew".to_string(),
                    ));
                }
                if tx.status != TransactionStatus::Borrowed {
                    return Err(CirculationError::InvalidStatus {
                        operation: "renew",
                        status: tx.status,
                    });
                }
                let Some(due) = tx.due_date else {
                    return Err(CirculationError::Validation(
                        "transaction has no due date to extend".to_string(),
                    ));
                };
                tx.due_date = Some(due + Duration::days(extension));
                tx.renewal_count += 1;
                Ok(())
            })
            .await?;
        info!(%transaction_id, days = extension, "loan renewed");
        Ok(tx)
    }

    // ------------------------------------------------------------------
    // Shared plumbing
    // ------------------------------------------------------------------

    pub(crate) fn check_item_limit(&self, requested: usize) -> CirculationResult<()> {
        if requested == 0 {
            return Err(CirculationError::Validation(
                "at least one item is required".to_string(),
            ));
        }
        let max = self.env.config.max_items_per_transaction;
        if requested > max {
            return Err(CirculationError::LimitExceeded { requested, max });
        }
        Ok(())
    }

    pub(crate) async fn resolve_book(&self, book: &BookRef) -> CirculationResult<BookId> {
        self.env
            .books
            .resolve(book)
            .await?
            .ok_or_else(|| CirculationError::BookNotFound(book.clone()))
    }

    pub(crate) async fn load_active_user(
        &self,
        user: &UserRef,
    ) -> CirculationResult<Versioned<User>> {
        let Some(user_id) = self.env.users.resolve(user).await? else {
            return Err(CirculationError::UserNotFound(user.clone()));
        };
        let loaded = self.load_user_by_id(user_id).await?;
        if !loaded.doc.active {
            return Err(CirculationError::UserInactive(user_id));
        }
        Ok(loaded)
    }

    pub(crate) async fn load_user_by_id(
        &self,
        user_id: UserId,
    ) -> CirculationResult<Versioned<User>> {
        self.env
            .users
            .user(user_id)
            .await?
            .ok_or(CirculationError::UserNotFound(UserRef::Id(user_id)))
    }

    pub(crate) async fn load_transaction(
        &self,
        id: &TransactionId,
    ) -> CirculationResult<Versioned<Transaction>> {
        self.env
            .transactions
            .transaction(id)
            .await?
            .ok_or_else(|| CirculationError::TransactionNotFound(id.clone()))
    }

    /// Loads each distinct book once, keyed by id
    pub(crate) async fn load_books(
        &self,
        ids: impl Iterator<Item = BookId>,
    ) -> CirculationResult<BTreeMap<BookId, Versioned<Book>>> {
        let mut books = BTreeMap::new();
        for book_id in ids {
            if books.contains_key(&book_id) {
                continue;
            }
            let versioned = self.ledger.load(book_id).await?;
            books.insert(book_id, versioned);
        }
        Ok(books)
    }

    /// Maps a pure allocator failure onto the engine's error taxonomy,
    /// probing current copy state for a precise diagnosis
    pub(crate) async fn allocation_failure(&self, err: AllocationError) -> CirculationError {
        match err {
            AllocationError::PreferredUnavailable { book_id, copy_id } => {
                match self.ledger.find_copy(copy_id).await {
                    Ok((owning, copy)) => {
                        if owning.doc.id != book_id {
                            CirculationError::Validation(format!(
                                "copy {copy_id} does not belong to book {book_id}"
                            ))
                        } else if copy.status.is_available() {
                            CirculationError::Validation(format!(
                                "copy {copy_id} is not in the allowed set for book {book_id}"
                            ))
                        } else {
                            CirculationError::CopyUnavailable {
                                copy_id,
                                status: copy.status,
                            }
                        }
                    }
                    Err(err) => err,
                }
            }
            AllocationError::PreferredDuplicate { copy_id, .. } => {
                CirculationError::DuplicateCopy { copy_id }
            }
            AllocationError::InsufficientCopies {
                book_id,
                requested,
                available,
            } => CirculationError::InsufficientCopies {
                book_id,
                requested,
                available,
            },
        }
    }

    /// Applies a validated mutation to a transaction with CAS retries
    pub(crate) async fn update_transaction<F>(
        &self,
        id: &TransactionId,
        mutate: F,
    ) -> CirculationResult<Transaction>
    where
        F: Fn(&mut Transaction) -> CirculationResult<()> + Send + Sync,
    {
        for _ in 0..TRANSACTION_RETRIES {
            let read = self.load_transaction(id).await?;
            let mut doc = read.doc;
            mutate(&mut doc)?;
            match self
                .env
                .transactions
                .put_transaction(doc.clone(), read.version)
                .await
            {
                Ok(_) => return Ok(doc),
                Err(StoreError::VersionConflict { .. }) => {
                    debug!(transaction_id = %id, "transaction update lost its version race");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(CirculationError::AllocationContention)
    }

    /// Updates the user's borrowing rollup; failure is logged, never fatal,
    /// because the transaction and copy state already committed
    pub(crate) async fn bump_user_stats<F>(&self, user_id: UserId, apply: F)
    where
        F: Fn(&mut UserBorrowingStats) + Send + Sync,
    {
        for _ in 0..STATS_RETRIES {
            let Ok(Some(mut versioned)) = self.env.users.user(user_id).await else {
                break;
            };
            apply(&mut versioned.doc.stats);
            match self
                .env
                .users
                .put_user(versioned.doc, versioned.version)
                .await
            {
                Ok(_) => return,
                Err(StoreError::VersionConflict { .. }) => {}
                Err(_) => break,
            }
        }
        error!(%user_id, "failed to update borrowing statistics");
    }

    pub(crate) async fn send_notice(&self, recipients: Recipients, notice: Notice) {
        if let Err(err) = self.env.notifier.notify(recipients, notice).await {
            warn!(error = %err, "notification delivery failed");
        }
    }

    pub(crate) async fn record_audit<T>(
        &self,
        actor: Actor,
        operation: &'static str,
        transaction_id: Option<TransactionId>,
        detail: serde_json::Value,
        result: &CirculationResult<T>,
    ) {
        let outcome = match result {
            Ok(_) => AuditOutcome::Success,
            Err(err) => AuditOutcome::Failure {
                kind: err.kind(),
                message: err.to_string(),
            },
        };
        let entry = AuditEntry {
            actor: actor.user_id,
            operation,
            outcome,
            detail,
            transaction_id,
            at: self.env.clock.now(),
        };
        if let Err(err) = self.env.audit.record(entry).await {
            warn!(error = %err, operation, "audit recording failed");
        }
    }
}

/// Groups resolved borrow items per book in order of first appearance
fn group_items(resolved: &[(BookId, Option<CopyId>)]) -> Vec<(BookId, Vec<AllocationItem>)> {
    let mut groups: Vec<(BookId, Vec<AllocationItem>)> = Vec::new();
    for (book_id, copy_id) in resolved {
        let item = copy_id.map_or_else(AllocationItem::any, AllocationItem::preferring);
        if let Some((_, items)) = groups.iter_mut().find(|(id, _)| id == book_id) {
            items.push(item);
        } else {
            groups.push((*book_id, vec![item]));
        }
    }
    groups
}

fn reason_message(tx: &Transaction) -> String {
    tx.closed_reason
        .clone()
        .map_or_else(
            || "your borrowing request was rejected".to_string(),
            |reason| format!("your borrowing request was rejected: {reason}"),
        )
}
