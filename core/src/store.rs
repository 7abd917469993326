//! Typed, versioned repositories backing the circulation engine.
//!
//! Each trait covers one named collection; lookups are exact-match by
//! canonical id, and all cross-entity resolution (copy → owning book, user
//! by card number) happens through explicit methods here — never via joins
//! inside business logic.
//!
//! # Optimistic concurrency
//!
//! Writes go through compare-and-swap: `put_*` takes the [`Version`] the
//! caller read and fails with [`StoreError::VersionConflict`] when the
//! document moved underneath it. This is the serialization point that keeps
//! two concurrent calls from both lending the last copy of a book: both may
//! read the copy as available, but only one CAS lands; the loser aborts and
//! retries its whole allocation against fresh state.
//!
//! # Secondary index
//!
//! [`BookStore::book_by_copy`] is a maintained copy-id → book-id index, not
//! a collection scan. It also serves `find_copy` lookups on the ledger.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::annual_set::AnnualSet;
use crate::book::Book;
use crate::error::StoreError;
use crate::ids::{AnnualSetId, BookId, CopyId, TransactionId, UserId};
use crate::refs::{BookRef, UserRef};
use crate::transaction::Transaction;
use crate::user::User;

/// Monotonic per-document version used for compare-and-swap writes
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// Creates a version
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The version a freshly inserted document carries
    #[must_use]
    pub const fn initial() -> Self {
        Self(1)
    }

    /// The version after one successful write
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Raw value
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A document together with the version it was read at
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Versioned<T> {
    /// The document
    pub doc: T,
    /// The version at read time; pass back to `put_*` for CAS
    pub version: Version,
}

impl<T> Versioned<T> {
    /// Pairs a document with its version
    #[must_use]
    pub const fn new(doc: T, version: Version) -> Self {
        Self { doc, version }
    }
}

/// Store result alias
pub type StoreResult<T> = Result<T, StoreError>;

/// Repository for the book collection (copies live inside their book)
#[async_trait]
pub trait BookStore: Send + Sync {
    /// Loads a book by canonical id
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn book(&self, id: BookId) -> StoreResult<Option<Versioned<Book>>>;

    /// Resolves a caller-supplied reference to the canonical id
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn resolve(&self, book: &BookRef) -> StoreResult<Option<BookId>>;

    /// Looks up which book owns a copy via the maintained secondary index
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn book_by_copy(&self, copy_id: CopyId) -> StoreResult<Option<BookId>>;

    /// Inserts a new book
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateId`] if the id is taken.
    async fn insert_book(&self, book: Book) -> StoreResult<()>;

    /// Replaces a book if its stored version still matches `expected`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::VersionConflict`] when the document moved since
    /// it was read.
    async fn put_book(&self, book: Book, expected: Version) -> StoreResult<Version>;
}

/// Repository for the transaction collection
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Loads a transaction by id
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn transaction(&self, id: &TransactionId) -> StoreResult<Option<Versioned<Transaction>>>;

    /// Inserts a new transaction
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateId`] if the id is taken.
    async fn insert_transaction(&self, transaction: Transaction) -> StoreResult<()>;

    /// Replaces a transaction if its stored version still matches `expected`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::VersionConflict`] when the document moved since
    /// it was read.
    async fn put_transaction(
        &self,
        transaction: Transaction,
        expected: Version,
    ) -> StoreResult<Version>;

    /// All transactions of one user, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn transactions_for_user(&self, user_id: UserId) -> StoreResult<Vec<Transaction>>;

    /// The user's active (non-terminal) transaction for an annual set, if any
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn active_annual_set_borrowing(
        &self,
        user_id: UserId,
        annual_set_id: AnnualSetId,
    ) -> StoreResult<Option<TransactionId>>;
}

/// Repository for the user collection
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Loads a user by canonical id
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn user(&self, id: UserId) -> StoreResult<Option<Versioned<User>>>;

    /// Resolves a caller-supplied reference to the canonical id
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn resolve(&self, user: &UserRef) -> StoreResult<Option<UserId>>;

    /// Inserts a new user
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateId`] if the id is taken.
    async fn insert_user(&self, user: User) -> StoreResult<()>;

    /// Replaces a user if its stored version still matches `expected`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::VersionConflict`] when the document moved since
    /// it was read.
    async fn put_user(&self, user: User, expected: Version) -> StoreResult<Version>;
}

/// Repository for the annual set collection
#[async_trait]
pub trait AnnualSetStore: Send + Sync {
    /// Loads an annual set by id
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn annual_set(&self, id: AnnualSetId) -> StoreResult<Option<AnnualSet>>;

    /// Inserts a new annual set
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateId`] if the id is taken.
    async fn insert_annual_set(&self, set: AnnualSet) -> StoreResult<()>;
}
