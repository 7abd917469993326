//! # Circulation Testing
//!
//! Deterministic test doubles for the circulation engine:
//!
//! - [`store::InMemoryLibrary`]: all four store traits over in-memory maps
//!   with real version bookkeeping and a maintained copy→book index, so
//!   compare-and-swap conflicts behave exactly like a production store.
//! - [`clock::FixedClock`]: settable, advanceable clock.
//! - [`ids::SequentialIds`]: deterministic `borrow-1`, `annual-2`, …
//! - [`sinks::RecordingNotifier`] / [`sinks::RecordingAudit`]: capture every
//!   notice and audit entry for assertion; [`sinks::FailingNotifier`] for
//!   best-effort delivery tests.
//! - [`fixtures`]: builders that keep derived counts consistent.

pub mod clock;
pub mod fixtures;
pub mod ids;
pub mod sinks;
pub mod store;

pub use clock::FixedClock;
pub use ids::SequentialIds;
pub use sinks::{FailingNotifier, RecordingAudit, RecordingNotifier};
pub use store::InMemoryLibrary;

/// Initializes a compact tracing subscriber for test output.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .compact()
        .try_init();
}
