//! Fixture builders keeping derived counts and indexes consistent.

use chrono::{DateTime, Utc};
use circulation_core::annual_set::{AnnualSet, AnnualSetEntry};
use circulation_core::book::Book;
use circulation_core::ids::{AnnualSetId, BookId, UserId};
use circulation_core::refs::Role;
use circulation_core::user::User;

/// Builds a book with `copies` fresh available copies
#[must_use]
pub fn book_with_copies(title: &str, copies: u32, now: DateTime<Utc>) -> Book {
    let mut book = Book::new(
        BookId::new(),
        title.to_string(),
        "Test Author".to_string(),
        Some(format!("isbn-{title}")),
        now,
    );
    book.add_copies(copies, now);
    book
}

/// Builds an active student
#[must_use]
pub fn student(name: &str) -> User {
    User::new(
        UserId::new(),
        name.to_string(),
        Some(format!("card-{name}")),
        Role::Student,
    )
}

/// Builds an active librarian
#[must_use]
pub fn librarian(name: &str) -> User {
    User::new(UserId::new(), name.to_string(), None, Role::Librarian)
}

/// Builds an annual set from entries
#[must_use]
pub fn annual_set(name: &str, entries: Vec<AnnualSetEntry>) -> AnnualSet {
    AnnualSet {
        id: AnnualSetId::new(),
        name: name.to_string(),
        academic_year: "2025/26".to_string(),
        entries,
    }
}
