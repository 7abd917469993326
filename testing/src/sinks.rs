//! Recording notification and audit sinks.

use async_trait::async_trait;
use circulation_core::environment::{
    AuditEntry, AuditSink, Notice, NotificationSink, Recipients,
};
use circulation_core::ids::TransactionId;
use std::sync::Mutex;

fn lock_recovering<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // A panicked test thread must not hide what the sink recorded
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Notification sink capturing every notice and archival request
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Recipients, Notice)>>,
    archived: Mutex<Vec<TransactionId>>,
}

impl RecordingNotifier {
    /// Creates an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every notice delivered so far, in order
    #[must_use]
    pub fn sent(&self) -> Vec<(Recipients, Notice)> {
        lock_recovering(&self.sent).clone()
    }

    /// Every transaction whose notices were archived, in order
    #[must_use]
    pub fn archived(&self) -> Vec<TransactionId> {
        lock_recovering(&self.archived).clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, recipients: Recipients, notice: Notice) -> Result<(), String> {
        lock_recovering(&self.sent).push((recipients, notice));
        Ok(())
    }

    async fn archive_for_transaction(&self, transaction_id: &TransactionId) -> Result<(), String> {
        lock_recovering(&self.archived).push(transaction_id.clone());
        Ok(())
    }
}

/// Notification sink that always fails, for best-effort delivery tests
#[derive(Debug, Default)]
pub struct FailingNotifier;

#[async_trait]
impl NotificationSink for FailingNotifier {
    async fn notify(&self, _recipients: Recipients, _notice: Notice) -> Result<(), String> {
        Err("notification channel down".to_string())
    }

    async fn archive_for_transaction(&self, _transaction_id: &TransactionId) -> Result<(), String> {
        Err("notification channel down".to_string())
    }
}

/// Audit sink capturing every entry
#[derive(Debug, Default)]
pub struct RecordingAudit {
    entries: Mutex<Vec<AuditEntry>>,
}

impl RecordingAudit {
    /// Creates an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every audit entry recorded so far, in order
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        lock_recovering(&self.entries).clone()
    }

    /// Entries recorded for one operation name
    #[must_use]
    pub fn entries_for(&self, operation: &str) -> Vec<AuditEntry> {
        lock_recovering(&self.entries)
            .iter()
            .filter(|e| e.operation == operation)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditSink for RecordingAudit {
    async fn record(&self, entry: AuditEntry) -> Result<(), String> {
        lock_recovering(&self.entries).push(entry);
        Ok(())
    }
}
