//! Injected collaborators: clock, id generation, notification and audit sinks.
//!
//! Every external dependency of the engine is abstracted behind a trait and
//! injected via its environment, so operations stay deterministic under
//! test. The notification and audit sinks are best-effort collaborators: a
//! sink failure is logged and never fails the owning operation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::ids::{TransactionId, UserId};
use crate::refs::Role;
use crate::transaction::TransactionKind;

/// Clock trait - abstracts time operations for testability
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Produces globally unique, kind-prefixed transaction identifiers.
///
/// Also used to backfill legacy transaction records lacking an id (see
/// [`crate::transaction::Transaction::backfill_id`]).
pub trait IdGenerator: Send + Sync {
    /// A fresh transaction id carrying the kind prefix
    fn transaction_id(&self, kind: TransactionKind) -> TransactionId;
}

/// Production id generator: kind prefix plus a random UUID
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn transaction_id(&self, kind: TransactionKind) -> TransactionId {
        TransactionId::from_parts(kind, &Uuid::new_v4().to_string())
    }
}

/// Who a notification is addressed to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipients {
    /// Everyone holding one of these roles
    Roles(Vec<Role>),
    /// Specific users
    Users(Vec<UserId>),
}

/// Notification category, used by the delivery layer for styling/routing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// A new self-service request awaits staff action
    RequestSubmitted,
    /// A request was approved and copies issued
    RequestApproved,
    /// A request was rejected
    RequestRejected,
    /// Copies were issued directly by staff
    CopiesIssued,
    /// Copies came back
    CopiesReturned,
}

/// A notification payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    /// Short title
    pub title: String,
    /// Human-readable body
    pub message: String,
    /// Category
    pub kind: NoticeKind,
    /// The transaction the notice refers to
    pub transaction_id: Option<TransactionId>,
}

/// Best-effort notification delivery
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Delivers a notice to the recipients
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails; callers log and continue.
    async fn notify(&self, recipients: Recipients, notice: Notice) -> Result<(), String>;

    /// Archives notices referring to a transaction (e.g. after a cancel)
    ///
    /// # Errors
    ///
    /// Returns an error if archival fails; callers log and continue.
    async fn archive_for_transaction(&self, transaction_id: &TransactionId) -> Result<(), String>;
}

/// Outcome recorded with an audit entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The operation succeeded
    Success,
    /// The operation was rejected or failed
    Failure {
        /// Taxonomy classification of the failure
        kind: ErrorKind,
        /// Preserved error message
        message: String,
    },
}

/// One audit record: an operation, its inputs, and its outcome
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Who performed the operation
    pub actor: UserId,
    /// Operation name (`borrow`, `approve`, …)
    pub operation: &'static str,
    /// Success or classified failure
    pub outcome: AuditOutcome,
    /// Structured detail: offending items, shortages, reasons
    pub detail: serde_json::Value,
    /// The transaction acted on, when one exists
    pub transaction_id: Option<TransactionId>,
    /// When the operation ran
    pub at: DateTime<Utc>,
}

/// Best-effort audit recording
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Records an audit entry
    ///
    /// # Errors
    ///
    /// Returns an error if recording fails; callers log and continue.
    async fn record(&self, entry: AuditEntry) -> Result<(), String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_ids_carry_the_kind_prefix() {
        let ids = UuidIds;
        let regular = ids.transaction_id(TransactionKind::Regular);
        let annual = ids.transaction_id(TransactionKind::AnnualSet);
        assert!(regular.as_str().starts_with("borrow-"));
        assert!(annual.as_str().starts_with("annual-"));
        assert_ne!(regular, annual);
    }

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
