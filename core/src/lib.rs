//! # Circulation Core
//!
//! Domain model and abstractions for the library circulation engine.
//!
//! This crate defines the vocabulary the engine crate operates on:
//!
//! - **Entities**: [`book::Book`] with its physical [`book::BookCopy`]s,
//!   [`transaction::Transaction`] (the lending aggregate),
//!   [`annual_set::AnnualSet`] templates, and [`user::User`] with borrowing
//!   statistics.
//! - **Identifiers**: UUID-backed newtypes plus the kind-prefixed
//!   [`ids::TransactionId`].
//! - **Store traits**: typed, versioned repositories with compare-and-swap
//!   writes ([`store`]) — the serialization point that prevents two
//!   concurrent calls from lending the same copy twice.
//! - **Environment**: injected collaborators ([`environment`]) — clock,
//!   id generation, notification sink, audit sink.
//! - **Errors**: one closed taxonomy ([`error::CirculationError`]) where
//!   every rejection happens before any persistent mutation.
//!
//! Status fields are closed enums everywhere; string vocabularies exist only
//! at serde boundaries. Books and users are addressed by one canonical id;
//! legacy alternate keys (ISBN, library card number) resolve through
//! [`refs::BookRef`]/[`refs::UserRef`] at the store boundary, never inside
//! business logic.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod annual_set;
pub mod book;
pub mod config;
pub mod environment;
pub mod error;
pub mod ids;
pub mod money;
pub mod refs;
pub mod store;
pub mod transaction;
pub mod user;

pub use annual_set::{AnnualSet, AnnualSetEntry};
pub use book::{Book, BookCopy, CopyCondition, CopyStatus};
pub use config::CirculationConfig;
pub use environment::{
    AuditEntry, AuditOutcome, AuditSink, Clock, IdGenerator, Notice, NoticeKind, NotificationSink,
    Recipients, SystemClock, UuidIds,
};
pub use error::{CirculationError, CirculationResult, ErrorKind, StoreError};
pub use ids::{AnnualSetId, BookId, CopyId, RequestItemId, TransactionId, UserId};
pub use money::Money;
pub use refs::{Actor, BookRef, Role, UserRef};
pub use store::{AnnualSetStore, BookStore, TransactionStore, UserStore, Version, Versioned};
pub use transaction::{
    ItemStatus, Transaction, TransactionItem, TransactionKind, TransactionStatus,
};
pub use user::{User, UserBorrowingStats};
