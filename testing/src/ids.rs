//! Deterministic id generation for tests.

use circulation_core::environment::IdGenerator;
use circulation_core::ids::TransactionId;
use circulation_core::transaction::TransactionKind;
use std::sync::atomic::{AtomicU64, Ordering};

/// Id generator producing `borrow-1`, `annual-2`, … in call order
#[derive(Debug, Default)]
pub struct SequentialIds {
    counter: AtomicU64,
}

impl SequentialIds {
    /// Creates a generator starting at 1
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for SequentialIds {
    fn transaction_id(&self, kind: TransactionKind) -> TransactionId {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        TransactionId::from_parts(kind, &n.to_string())
    }
}
