//! The copy ledger: versioned reads and all-or-nothing commits of book state.
//!
//! Every copy status change flows through here. Reads hand back the document
//! version; writes go through compare-and-swap, so two concurrent operations
//! that both saw the last copy as available cannot both lend it — one CAS
//! loses and the whole allocation is retried against fresh state.
//!
//! A multi-book commit is not atomic across books. [`CopyLedger::commit_borrow`]
//! writes book by book; when a later write hits a version conflict it releases
//! the copies already stamped on earlier books before reporting contention, so
//! a retried or abandoned operation never leaves copies half-lent.

use circulation_core::book::{Book, BookCopy, CopyCondition, CopyStatus};
use circulation_core::error::{CirculationError, CirculationResult, StoreError};
use circulation_core::ids::{BookId, CopyId, UserId};
use circulation_core::refs::BookRef;
use circulation_core::store::{BookStore, Version, Versioned};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// CAS attempts for a single-book update before giving up
const SINGLE_BOOK_RETRIES: usize = 3;

/// CAS attempts when releasing copies during compensation
const RELEASE_RETRIES: usize = 5;

/// One book write staged for an all-or-nothing commit
#[derive(Clone, Debug)]
pub struct BookWrite {
    /// The mutated book to store
    pub book: Book,
    /// The version the book was read at
    pub expected: Version,
    /// Copies this write stamps as borrowed, released on compensation
    pub stamped: Vec<CopyId>,
}

/// Result of a staged commit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Every write landed
    Committed,
    /// A write lost its CAS; earlier writes were compensated. Retry the
    /// whole allocation against fresh state.
    Contended,
}

/// Versioned access to books and their copies
#[derive(Clone)]
pub struct CopyLedger {
    books: Arc<dyn BookStore>,
}

impl CopyLedger {
    /// Creates a ledger over a book store
    #[must_use]
    pub fn new(books: Arc<dyn BookStore>) -> Self {
        Self { books }
    }

    /// Loads a book for update, failing when it does not exist
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError::BookNotFound`] or a store failure.
    pub async fn load(&self, book_id: BookId) -> CirculationResult<Versioned<Book>> {
        self.books
            .book(book_id)
            .await?
            .ok_or(CirculationError::BookNotFound(BookRef::Id(book_id)))
    }

    /// Locates a copy via the copy→book index and returns its owning book
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError::CopyNotFound`] when no book owns the copy,
    /// or [`CirculationError::Internal`] when the index points at a missing
    /// book.
    pub async fn find_copy(
        &self,
        copy_id: CopyId,
    ) -> CirculationResult<(Versioned<Book>, BookCopy)> {
        let Some(book_id) = self.books.book_by_copy(copy_id).await? else {
            return Err(CirculationError::CopyNotFound(copy_id));
        };
        let versioned = self.books.book(book_id).await?.ok_or_else(|| {
            CirculationError::Internal(format!(
                "copy index references missing book {book_id}"
            ))
        })?;
        let copy = versioned
            .doc
            .copy(copy_id)
            .cloned()
            .ok_or_else(|| {
                CirculationError::Internal(format!(
                    "copy index references {book_id} which does not hold copy {copy_id}"
                ))
            })?;
        Ok((versioned, copy))
    }

    /// Stamps the given copies of a book as borrowed.
    ///
    /// Validates every copy before mutating anything: a single unavailable
    /// copy fails the whole call with nothing changed.
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError::CopyNotFound`] or
    /// [`CirculationError::CopyUnavailable`].
    pub fn apply_borrow(
        book: &mut Book,
        copy_ids: &[CopyId],
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> CirculationResult<()> {
        for copy_id in copy_ids {
            let copy = book
                .copy(*copy_id)
                .ok_or(CirculationError::CopyNotFound(*copy_id))?;
            if !copy.status.is_available() {
                return Err(CirculationError::CopyUnavailable {
                    copy_id: *copy_id,
                    status: copy.status,
                });
            }
        }
        for copy_id in copy_ids {
            if let Some(copy) = book.copy_mut(*copy_id) {
                copy.status = CopyStatus::Borrowed;
                copy.borrowed_by = Some(user_id);
                copy.borrowed_at = Some(now);
                copy.updated_at = now;
            }
        }
        book.recount();
        Ok(())
    }

    /// Stamps a returned copy as available again, recording its condition
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError::CopyNotFound`] when the book does not hold
    /// the copy, or [`CirculationError::CopyUnavailable`] when the copy is
    /// not currently out on loan.
    pub fn apply_return(
        book: &mut Book,
        copy_id: CopyId,
        condition: CopyCondition,
        now: DateTime<Utc>,
    ) -> CirculationResult<()> {
        let copy = book
            .copy_mut(copy_id)
            .ok_or(CirculationError::CopyNotFound(copy_id))?;
        if copy.status != CopyStatus::Borrowed {
            return Err(CirculationError::CopyUnavailable {
                copy_id,
                status: copy.status,
            });
        }
        copy.status = CopyStatus::Available;
        copy.condition = condition;
        copy.borrowed_by = None;
        copy.borrowed_at = None;
        copy.updated_at = now;
        book.recount();
        Ok(())
    }

    /// Commits staged book writes, compensating on contention.
    ///
    /// Writes land in order. When a write loses its CAS, the copies stamped
    /// by the writes that already landed are released again and the call
    /// reports [`CommitOutcome::Contended`]; the caller re-reads, re-allocates
    /// and retries.
    ///
    /// # Errors
    ///
    /// Returns a store failure (after compensation) for anything other than a
    /// version conflict.
    pub async fn commit_borrow(&self, writes: Vec<BookWrite>) -> CirculationResult<CommitOutcome> {
        for (landed, write) in writes.iter().enumerate() {
            match self
                .books
                .put_book(write.book.clone(), write.expected)
                .await
            {
                Ok(_) => {}
                Err(StoreError::VersionConflict { expected, actual }) => {
                    warn!(
                        book_id = %write.book.id,
                        %expected,
                        %actual,
                        "commit lost its version race, compensating"
                    );
                    self.release(&writes[..landed]).await;
                    return Ok(CommitOutcome::Contended);
                }
                Err(err) => {
                    self.release(&writes[..landed]).await;
                    return Err(err.into());
                }
            }
        }
        debug!(books = writes.len(), "commit landed");
        Ok(CommitOutcome::Committed)
    }

    /// Returns one copy with an internal CAS retry loop.
    ///
    /// A return touches a single book, so contention is resolved here rather
    /// than surfaced: the book is re-read and the return re-applied until the
    /// write lands or the retry budget runs out.
    ///
    /// # Errors
    ///
    /// Returns [`CirculationError::AllocationContention`] when the retry
    /// budget is exhausted, or any validation failure from
    /// [`Self::apply_return`].
    pub async fn mark_returned(
        &self,
        copy_id: CopyId,
        condition: CopyCondition,
        now: DateTime<Utc>,
    ) -> CirculationResult<BookId> {
        for _ in 0..SINGLE_BOOK_RETRIES {
            let (mut versioned, _) = self.find_copy(copy_id).await?;
            Self::apply_return(&mut versioned.doc, copy_id, condition, now)?;
            let book_id = versioned.doc.id;
            match self.books.put_book(versioned.doc, versioned.version).await {
                Ok(_) => return Ok(book_id),
                Err(StoreError::VersionConflict { .. }) => {
                    debug!(%copy_id, "return lost its version race, re-reading");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(CirculationError::AllocationContention)
    }

    /// Re-stamps copies as borrowed again after an aborted return.
    ///
    /// Best-effort counterpart of [`Self::release`]: failure to compensate is
    /// logged, not propagated, because the original error is the one the
    /// caller needs to see.
    pub(crate) async fn reclaim(&self, copies: &[CopyId], user_id: UserId, now: DateTime<Utc>) {
        for copy_id in copies {
            let mut reclaimed = false;
            for _ in 0..RELEASE_RETRIES {
                let Ok((mut versioned, copy)) = self.find_copy(*copy_id).await else {
                    break;
                };
                if copy.status == CopyStatus::Borrowed {
                    reclaimed = true;
                    break;
                }
                if Self::apply_borrow(&mut versioned.doc, &[*copy_id], user_id, now).is_err() {
                    break;
                }
                match self.books.put_book(versioned.doc, versioned.version).await {
                    Ok(_) => {
                        reclaimed = true;
                        break;
                    }
                    Err(StoreError::VersionConflict { .. }) => {}
                    Err(_) => break,
                }
            }
            if !reclaimed {
                error!(%copy_id, "failed to re-borrow a copy after an aborted return");
            }
        }
    }

    /// Releases the copies stamped by writes that already landed.
    ///
    /// Best-effort: failure to compensate is logged, not propagated, because
    /// the original error is the one the caller needs to see.
    pub(crate) async fn release(&self, landed: &[BookWrite]) {
        for write in landed {
            if write.stamped.is_empty() {
                continue;
            }
            let mut released = false;
            for _ in 0..RELEASE_RETRIES {
                let Ok(Some(mut versioned)) = self.books.book(write.book.id).await else {
                    break;
                };
                for copy_id in &write.stamped {
                    if let Some(copy) = versioned.doc.copy_mut(*copy_id) {
                        if copy.status == CopyStatus::Borrowed {
                            copy.status = CopyStatus::Available;
                            copy.borrowed_by = None;
                            copy.borrowed_at = None;
                        }
                    }
                }
                versioned.doc.recount();
                match self
                    .books
                    .put_book(versioned.doc, versioned.version)
                    .await
                {
                    Ok(_) => {
                        released = true;
                        break;
                    }
                    Err(StoreError::VersionConflict { .. }) => {}
                    Err(_) => break,
                }
            }
            if !released {
                error!(
                    book_id = %write.book.id,
                    copies = write.stamped.len(),
                    "failed to release copies after an aborted commit"
                );
            }
        }
    }
}
