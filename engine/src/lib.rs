//! # Circulation Engine
//!
//! The lending engine over the circulation core: copy allocation, the
//! transaction state machine, overdue fines, and annual-set bulk issuance.
//!
//! The engine is a set of async operations over injected stores
//! ([`environment::Environment`]): every operation resolves references at
//! the boundary, validates everything before mutating anything, and commits
//! copy state through the compare-and-swap [`ledger::CopyLedger`]. Pure
//! decisions live in pure modules ([`allocator`], [`fine`]) so they are
//! testable without any store.
//!
//! ## Operations
//!
//! - [`engine::CirculationEngine::borrow`]: staff lend copies in one call
//! - [`engine::CirculationEngine::request`]: self-service request, no copies
//!   bound
//! - [`engine::CirculationEngine::approve`] /
//!   [`engine::CirculationEngine::reject`] /
//!   [`engine::CirculationEngine::cancel`]: request lifecycle
//! - [`engine::CirculationEngine::return_copies`]: partial or full return
//!   with fines
//! - [`engine::CirculationEngine::renew`]: due-date extension
//! - [`engine::CirculationEngine::issue_annual_set`]: one bulk transaction
//!   per student per set

pub mod allocator;
pub mod annual_set;
pub mod engine;
pub mod environment;
pub mod fine;
pub mod ledger;
pub mod returns;

pub use allocator::{
    allocate, AllocationError, AllocationItem, AllocationPlan, Assignment, BookAllocation,
    Shortage, ShortagePolicy,
};
pub use annual_set::IssueOutcome;
pub use engine::{
    BorrowItem, BorrowRequest, CirculationEngine, CopyAssignment, RequestSubmission,
};
pub use environment::Environment;
pub use fine::{fine_for_return, late_days};
pub use ledger::{BookWrite, CommitOutcome, CopyLedger};
pub use returns::ReturnReceipt;
