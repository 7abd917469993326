//! Error taxonomy for the circulation engine.
//!
//! Every rejection happens before any persistent mutation: an operation that
//! returns an error has not partially committed. Unexpected failures surface
//! as [`CirculationError::Internal`]; the message is preserved for audit but
//! not guaranteed to reach the caller verbatim.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::book::CopyStatus;
use crate::ids::{AnnualSetId, BookId, CopyId, RequestItemId, TransactionId, UserId};
use crate::refs::{BookRef, UserRef};
use crate::store::Version;
use crate::transaction::TransactionStatus;

/// Coarse error classification recorded in audit entries
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or missing input; nothing was mutated
    Validation,
    /// A referenced entity does not exist
    NotFound,
    /// A resource is already claimed or the operation would double-commit
    Conflict,
    /// A configured limit was exceeded
    LimitExceeded,
    /// The operation is not legal from the transaction's current status
    InvalidStatus,
    /// The actor is not allowed to perform the operation
    Forbidden,
    /// Unexpected failure
    Internal,
}

/// One offending item found while validating an approval
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalFault {
    /// The request item at fault, when it could be identified
    pub item: Option<RequestItemId>,
    /// The copy at fault, when one was named
    pub copy: Option<CopyId>,
    /// What is wrong with the assignment
    pub reason: String,
}

impl fmt::Display for ApprovalFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.item, &self.copy) {
            (Some(item), Some(copy)) => write!(f, "item {item} / copy {copy}: {}", self.reason),
            (Some(item), None) => write!(f, "item {item}: {}", self.reason),
            (None, Some(copy)) => write!(f, "copy {copy}: {}", self.reason),
            (None, None) => write!(f, "{}", self.reason),
        }
    }
}

/// Errors raised by the store layer
#[derive(Error, Debug)]
pub enum StoreError {
    /// Compare-and-swap failed: the document changed since it was read.
    ///
    /// The engine treats this as contention and retries the whole
    /// allocation; it is never surfaced to callers directly.
    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict {
        /// The version the writer expected
        expected: Version,
        /// The version actually stored
        actual: Version,
    },

    /// Insert collided with an existing document id
    #[error("duplicate document id: {0}")]
    DuplicateId(String),

    /// Backend failure (connection, corruption, …)
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Errors raised by circulation operations
#[derive(Error, Debug)]
pub enum CirculationError {
    /// Malformed or missing input
    #[error("{0}")]
    Validation(String),

    /// Approval validation failed; every offending item is enumerated
    #[error("approval rejected: {}", format_faults(faults))]
    ApprovalRejected {
        /// All offending assignments
        faults: Vec<ApprovalFault>,
    },

    /// No book matches the reference
    #[error("book not found: {0}")]
    BookNotFound(BookRef),

    /// No book owns the copy
    #[error("copy not found: {0}")]
    CopyNotFound(CopyId),

    /// No user matches the reference
    #[error("user not found: {0}")]
    UserNotFound(UserRef),

    /// No transaction with this id
    #[error("transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// No annual set with this id
    #[error("annual set not found: {0}")]
    AnnualSetNotFound(AnnualSetId),

    /// The user is deactivated and cannot borrow
    #[error("user {0} is not active")]
    UserInactive(UserId),

    /// A requested copy is not available for lending
    #[error("copy {copy_id} is not available (status: {status:?})")]
    CopyUnavailable {
        /// The copy at fault
        copy_id: CopyId,
        /// Its current status
        status: CopyStatus,
    },

    /// The same copy was named twice within one operation
    #[error("copy {copy_id} is referenced more than once in this request")]
    DuplicateCopy {
        /// The copy at fault
        copy_id: CopyId,
    },

    /// The student already holds an active transaction for this annual set
    #[error("user {user_id} already holds annual set {annual_set_id} (transaction {existing})")]
    DuplicateAnnualSetBorrowing {
        /// The student
        user_id: UserId,
        /// The annual set
        annual_set_id: AnnualSetId,
        /// The active transaction that blocks the issuance
        existing: TransactionId,
    },

    /// Not enough available copies and partial fulfilment is disallowed
    #[error("insufficient copies of book {book_id}: requested {requested}, available {available}")]
    InsufficientCopies {
        /// The book that ran short
        book_id: BookId,
        /// Copies requested
        requested: u32,
        /// Copies actually available
        available: u32,
    },

    /// Concurrent writers kept invalidating the allocation
    #[error("allocation contention: too many concurrent updates, giving up")]
    AllocationContention,

    /// Too many items for one transaction
    #[error("too many items: requested {requested}, maximum {max}")]
    LimitExceeded {
        /// Items requested
        requested: usize,
        /// Configured maximum
        max: usize,
    },

    /// The operation is not legal from the transaction's current status
    #[error("cannot {operation} a transaction in status {status:?}")]
    InvalidStatus {
        /// The attempted operation
        operation: &'static str,
        /// The transaction's current status
        status: TransactionStatus,
    },

    /// The transaction has already been fully returned
    #[error("transaction {0} is already returned")]
    AlreadyReturned(TransactionId),

    /// The actor is not allowed to perform the operation
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Store layer failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Unexpected failure
    #[error("internal error: {0}")]
    Internal(String),
}

fn format_faults(faults: &[ApprovalFault]) -> String {
    faults
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl CirculationError {
    /// Maps the error onto the coarse taxonomy recorded in audit entries
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::ApprovalRejected { .. } | Self::UserInactive(_) => {
                ErrorKind::Validation
            }
            Self::BookNotFound(_)
            | Self::CopyNotFound(_)
            | Self::UserNotFound(_)
            | Self::TransactionNotFound(_)
            | Self::AnnualSetNotFound(_) => ErrorKind::NotFound,
            Self::CopyUnavailable { .. }
            | Self::DuplicateCopy { .. }
            | Self::DuplicateAnnualSetBorrowing { .. }
            | Self::InsufficientCopies { .. }
            | Self::AllocationContention => ErrorKind::Conflict,
            Self::LimitExceeded { .. } => ErrorKind::LimitExceeded,
            Self::InvalidStatus { .. } | Self::AlreadyReturned(_) => ErrorKind::InvalidStatus,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Store(StoreError::VersionConflict { .. }) => ErrorKind::Conflict,
            Self::Store(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Result alias for circulation operations
pub type CirculationResult<T> = Result<T, CirculationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_taxonomy() {
        assert_eq!(
            CirculationError::Validation("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            CirculationError::CopyNotFound(CopyId::new()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            CirculationError::DuplicateCopy { copy_id: CopyId::new() }.kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            CirculationError::LimitExceeded { requested: 11, max: 10 }.kind(),
            ErrorKind::LimitExceeded
        );
        assert_eq!(
            CirculationError::AlreadyReturned(TransactionId::from_raw("borrow-1".into())).kind(),
            ErrorKind::InvalidStatus
        );
        assert_eq!(
            CirculationError::Forbidden("not the requester".into()).kind(),
            ErrorKind::Forbidden
        );
        assert_eq!(
            CirculationError::Store(StoreError::Backend("io".into())).kind(),
            ErrorKind::Internal
        );
        assert_eq!(
            CirculationError::Store(StoreError::VersionConflict {
                expected: Version::new(1),
                actual: Version::new(2),
            })
            .kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn approval_faults_are_enumerated_in_the_message() {
        let error = CirculationError::ApprovalRejected {
            faults: vec![
                ApprovalFault {
                    item: None,
                    copy: Some(CopyId::new()),
                    reason: "copy not available".to_string(),
                },
                ApprovalFault {
                    item: None,
                    copy: None,
                    reason: "item has no assignment".to_string(),
                },
            ],
        };
        let message = error.to_string();
        assert!(message.contains("copy not available"));
        assert!(message.contains("item has no assignment"));
    }
}
