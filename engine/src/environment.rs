//! The engine's environment: injected stores, collaborators and config.
//!
//! Everything the engine talks to arrives here as an `Arc<dyn Trait>`, so
//! production wiring and the in-memory test stack are interchangeable.

use circulation_core::config::CirculationConfig;
use circulation_core::environment::{AuditSink, Clock, IdGenerator, NotificationSink};
use circulation_core::store::{AnnualSetStore, BookStore, TransactionStore, UserStore};
use std::sync::Arc;

/// Injected dependencies of the circulation engine
#[derive(Clone)]
pub struct Environment {
    /// Book collection (copies live inside their book)
    pub books: Arc<dyn BookStore>,
    /// Transaction collection
    pub transactions: Arc<dyn TransactionStore>,
    /// User collection
    pub users: Arc<dyn UserStore>,
    /// Annual set collection
    pub annual_sets: Arc<dyn AnnualSetStore>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Transaction id generation
    pub ids: Arc<dyn IdGenerator>,
    /// Best-effort notification delivery
    pub notifier: Arc<dyn NotificationSink>,
    /// Best-effort audit recording
    pub audit: Arc<dyn AuditSink>,
    /// Fine and limit parameters
    pub config: CirculationConfig,
}
