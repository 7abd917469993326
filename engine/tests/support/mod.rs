//! Shared wiring for engine integration tests: an engine over the full
//! in-memory stack with a frozen clock and recording sinks.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use circulation_core::book::Book;
use circulation_core::config::CirculationConfig;
use circulation_core::refs::Actor;
use circulation_core::store::{AnnualSetStore, BookStore, UserStore};
use circulation_core::user::User;
use circulation_engine::{CirculationEngine, Environment};
use circulation_testing::fixtures;
use circulation_testing::{
    init_test_tracing, FixedClock, InMemoryLibrary, RecordingAudit, RecordingNotifier,
    SequentialIds,
};
use std::sync::Arc;

/// The instant every test world starts at: 2025-01-01 12:00 UTC
pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0)
        .single()
        .expect("valid instant")
}

pub struct World {
    pub store: Arc<InMemoryLibrary>,
    pub clock: Arc<FixedClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub audit: Arc<RecordingAudit>,
    pub engine: CirculationEngine,
}

pub fn world() -> World {
    world_with(CirculationConfig::default())
}

pub fn world_with(config: CirculationConfig) -> World {
    init_test_tracing();
    let store = Arc::new(InMemoryLibrary::new());
    let clock = Arc::new(FixedClock::at(start()));
    let notifier = Arc::new(RecordingNotifier::new());
    let audit = Arc::new(RecordingAudit::new());
    let env = Environment {
        books: store.clone(),
        transactions: store.clone(),
        users: store.clone(),
        annual_sets: store.clone(),
        clock: clock.clone(),
        ids: Arc::new(SequentialIds::new()),
        notifier: notifier.clone(),
        audit: audit.clone(),
        config,
    };
    World {
        engine: CirculationEngine::new(env),
        store,
        clock,
        notifier,
        audit,
    }
}

impl World {
    pub async fn seed_book(&self, title: &str, copies: u32) -> Book {
        let book = fixtures::book_with_copies(title, copies, start());
        self.store
            .insert_book(book.clone())
            .await
            .expect("seed book");
        book
    }

    pub async fn seed_student(&self, name: &str) -> User {
        let user = fixtures::student(name);
        self.store
            .insert_user(user.clone())
            .await
            .expect("seed student");
        user
    }

    pub async fn seed_librarian(&self, name: &str) -> Actor {
        let user = fixtures::librarian(name);
        self.store
            .insert_user(user.clone())
            .await
            .expect("seed librarian");
        Actor::new(user.id, user.role)
    }

    pub async fn seed_annual_set(
        &self,
        name: &str,
        entries: Vec<circulation_core::annual_set::AnnualSetEntry>,
    ) -> circulation_core::annual_set::AnnualSet {
        let set = fixtures::annual_set(name, entries);
        self.store
            .insert_annual_set(set.clone())
            .await
            .expect("seed annual set");
        set
    }
}

pub fn actor_for(user: &User) -> Actor {
    Actor::new(user.id, user.role)
}
