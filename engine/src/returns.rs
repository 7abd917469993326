//! Returning copies: partial or full, with overdue fines.
//!
//! A return names a subset of a transaction's outstanding copies (or all of
//! them), stamps one condition grade on everything returned in the call, and
//! charges a fine only for the copies actually coming back late in this
//! call. The transaction stays `Borrowed` until its last copy is back.

use circulation_core::book::CopyCondition;
use circulation_core::error::{CirculationError, CirculationResult};
use circulation_core::ids::{CopyId, TransactionId};
use circulation_core::money::Money;
use circulation_core::refs::Actor;
use circulation_core::transaction::{ItemStatus, Transaction, TransactionStatus};
use circulation_core::environment::{Notice, NoticeKind, Recipients};
use serde_json::json;
use tracing::info;

use crate::engine::CirculationEngine;
use crate::fine::fine_for_return;

/// Result of one return operation
#[derive(Clone, Debug)]
pub struct ReturnReceipt {
    /// The transaction after the return
    pub transaction: Transaction,
    /// Copies returned by this call
    pub returned: Vec<CopyId>,
    /// Fine charged by this call (zero when on time or fines disabled)
    pub fine_charged: Money,
}

impl CirculationEngine {
    /// Returns copies of a loan (the borrower themselves, or staff).
    ///
    /// `copy_ids = None` returns everything still outstanding. The condition
    /// grade applies to every copy in the call; returns needing different
    /// grades are separate calls.
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError::AlreadyReturned`] when the transaction is
    /// fully returned, or any other [`CirculationError`] on validation
    /// failure.
    pub async fn return_copies(
        &self,
        actor: Actor,
        transaction_id: &TransactionId,
        copy_ids: Option<Vec<CopyId>>,
        condition: CopyCondition,
    ) -> CirculationResult<ReturnReceipt> {
        let detail = json!({
            "copies": copy_ids.as_ref().map(Vec::len),
            "condition": condition,
        });
        let result = self
            .do_return_copies(actor, transaction_id, copy_ids, condition)
            .await;
        self.record_audit(
            actor,
            "return",
            Some(transaction_id.clone()),
            detail,
            &result,
        )
        .await;
        result
    }

    async fn do_return_copies(
        &self,
        actor: Actor,
        transaction_id: &TransactionId,
        copy_ids: Option<Vec<CopyId>>,
        condition: CopyCondition,
    ) -> CirculationResult<ReturnReceipt> {
        let read = self.load_transaction(transaction_id).await?;
        let tx = &read.doc;
        if tx.user_id != actor.user_id && !actor.is_privileged() {
            return Err(CirculationError::Forbidden(
                "only the borrower or staff may return copies".to_string(),
            ));
        }
        if tx.status == TransactionStatus::Returned {
            return Err(CirculationError::AlreadyReturned(transaction_id.clone()));
        }
        if tx.status != TransactionStatus::Borrowed {
            return Err(CirculationError::InvalidStatus {
                operation: "return",
                status: tx.status,
            });
        }

        let targets: Vec<CopyId> = match copy_ids {
            Some(explicit) => {
                if explicit.is_empty() {
                    return Err(CirculationError::Validation(
                        "at least one copy is required".to_string(),
                    ));
                }
                for (i, copy_id) in explicit.iter().enumerate() {
                    if explicit[..i].contains(copy_id) {
                        return Err(CirculationError::DuplicateCopy { copy_id: *copy_id });
                    }
                    let open = tx
                        .unreturned_items()
                        .any(|item| item.copy_id == Some(*copy_id));
                    if !open {
                        return Err(CirculationError::Validation(format!(
                            "copy {copy_id} is not an outstanding item of this transaction"
                        )));
                    }
                }
                explicit
            }
            None => tx
                .unreturned_items()
                .filter_map(|item| item.copy_id)
                .collect(),
        };
        if targets.is_empty() {
            return Err(CirculationError::AlreadyReturned(transaction_id.clone()));
        }

        let now = self.env().clock.now();
        #[allow(clippy::cast_possible_truncation)]
        let late_copies = if tx.is_overdue(now) {
            targets.len() as u32
        } else {
            0
        };
        let fine = tx.due_date.map_or(Money::ZERO, |due| {
            fine_for_return(due, now, late_copies, &self.env().config)
        });

        // Copy state first; the transaction record follows. A failure after
        // some copies already flipped re-borrows them, so an aborted return
        // never leaves a freed copy referenced by an active item.
        let user_id = tx.user_id;
        let mut released: Vec<CopyId> = Vec::with_capacity(targets.len());
        for copy_id in &targets {
            if let Err(err) = self.ledger().mark_returned(*copy_id, condition, now).await {
                self.ledger().reclaim(&released, user_id, now).await;
                return Err(err);
            }
            released.push(*copy_id);
        }

        #[allow(clippy::cast_possible_truncation)]
        let returned_count = targets.len() as u64;
        let update = self
            .update_transaction(transaction_id, |tx| {
                if tx.status != TransactionStatus::Borrowed {
                    return Err(CirculationError::InvalidStatus {
                        operation: "return",
                        status: tx.status,
                    });
                }
                for copy_id in &targets {
                    if let Some(item) = tx.item_for_copy_mut(*copy_id) {
                        if item.status == ItemStatus::Borrowed {
                            item.status = ItemStatus::Returned;
                            item.returned_at = Some(now);
                        }
                    }
                }
                tx.fine_amount = tx.fine_amount.saturating_add(fine);
                if tx.all_items_returned() {
                    tx.status = TransactionStatus::Returned;
                    tx.return_date = Some(now);
                }
                Ok(())
            })
            .await;
        let updated = match update {
            Ok(updated) => updated,
            Err(err) => {
                self.ledger().reclaim(&targets, user_id, now).await;
                return Err(err);
            }
        };

        self.bump_user_stats(user_id, |stats| stats.record_returned(returned_count, fine))
            .await;
        self.send_notice(
            Recipients::Users(vec![user_id]),
            Notice {
                title: "Copies returned".to_string(),
                message: if fine.is_zero() {
                    format!("{returned_count} copies returned")
                } else {
                    format!("{returned_count} copies returned, fine charged: {fine}")
                },
                kind: NoticeKind::CopiesReturned,
                transaction_id: Some(transaction_id.clone()),
            },
        )
        .await;
        info!(
            %transaction_id,
            copies = returned_count,
            fine = %fine,
            complete = updated.status == TransactionStatus::Returned,
            "copies returned"
        );
        Ok(ReturnReceipt {
            transaction: updated,
            returned: targets,
            fine_charged: fine,
        })
    }
}
