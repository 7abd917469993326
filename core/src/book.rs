//! Catalogue books and their physical copies.
//!
//! A [`Book`] owns an ordered list of [`BookCopy`]; the order is the fill
//! order the allocator uses when no explicit copy is requested.
//! `total_copies` and `available_copies` are derived counts: after every
//! mutation they must equal the tally over copy statuses ([`Book::recount`]
//! re-derives them, [`Book::counts_consistent`] checks the invariant).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BookId, CopyId, UserId};

/// Physical availability state of a copy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyStatus {
    /// On the shelf, available for lending
    Available,
    /// Out on loan
    Borrowed,
    /// Reported lost
    Lost,
    /// Damaged beyond lending
    Damaged,
    /// Pulled for repair or re-binding
    Maintenance,
}

impl CopyStatus {
    /// Whether the copy can be bound to a new loan
    #[must_use]
    pub const fn is_available(self) -> bool {
        matches!(self, Self::Available)
    }
}

/// Physical condition grade, overwritten at each return
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyCondition {
    /// Unused or like new
    New,
    /// Normal shelf wear
    #[default]
    Good,
    /// Heavily used but lendable
    Worn,
    /// Visible damage, still lendable
    Poor,
}

/// One physical, individually trackable instance of a book
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookCopy {
    /// Globally unique copy identifier
    pub id: CopyId,
    /// Current availability status
    pub status: CopyStatus,
    /// Condition grade, updated on return
    pub condition: CopyCondition,
    /// Shelf or room location
    pub location: Option<String>,
    /// Borrower currently holding the copy, if any
    pub borrowed_by: Option<UserId>,
    /// When the current loan started, if any
    pub borrowed_at: Option<DateTime<Utc>>,
    /// When the copy record was created
    pub created_at: DateTime<Utc>,
    /// When the copy record last changed
    pub updated_at: DateTime<Utc>,
}

impl BookCopy {
    /// Creates a new available copy
    #[must_use]
    pub const fn new(id: CopyId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            status: CopyStatus::Available,
            condition: CopyCondition::Good,
            location: None,
            borrowed_by: None,
            borrowed_at: None,
            created_at,
            updated_at: created_at,
        }
    }
}

/// A catalogue entry owning its physical copies
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    /// Canonical book identifier
    pub id: BookId,
    /// Title
    pub title: String,
    /// Author
    pub author: String,
    /// ISBN, kept as an alternate lookup key only
    pub isbn: Option<String>,
    /// Physical copies in stored (fill) order
    pub copies: Vec<BookCopy>,
    /// Derived: total number of copies
    pub total_copies: u32,
    /// Derived: number of copies with status `Available`
    pub available_copies: u32,
    /// When the book record was created
    pub created_at: DateTime<Utc>,
}

impl Book {
    /// Creates a book with no copies yet
    #[must_use]
    pub const fn new(
        id: BookId,
        title: String,
        author: String,
        isbn: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            title,
            author,
            isbn,
            copies: Vec::new(),
            total_copies: 0,
            available_copies: 0,
            created_at,
        }
    }

    /// Appends `count` fresh available copies, keeping derived counts in sync
    pub fn add_copies(&mut self, count: u32, now: DateTime<Utc>) -> Vec<CopyId> {
        let ids: Vec<CopyId> = (0..count).map(|_| CopyId::new()).collect();
        for id in &ids {
            self.copies.push(BookCopy::new(*id, now));
        }
        self.recount();
        ids
    }

    /// Finds a copy by id
    #[must_use]
    pub fn copy(&self, copy_id: CopyId) -> Option<&BookCopy> {
        self.copies.iter().find(|c| c.id == copy_id)
    }

    /// Finds a copy by id, mutably
    pub fn copy_mut(&mut self, copy_id: CopyId) -> Option<&mut BookCopy> {
        self.copies.iter_mut().find(|c| c.id == copy_id)
    }

    /// Copies currently available, in stored order
    pub fn available_copy_ids(&self) -> impl Iterator<Item = CopyId> + '_ {
        self.copies
            .iter()
            .filter(|c| c.status.is_available())
            .map(|c| c.id)
    }

    /// Re-derives `total_copies` and `available_copies` from the copy tally
    pub fn recount(&mut self) {
        #[allow(clippy::cast_possible_truncation)]
        {
            self.total_copies = self.copies.len() as u32;
            self.available_copies = self
                .copies
                .iter()
                .filter(|c| c.status.is_available())
                .count() as u32;
        }
    }

    /// Checks the derived-count invariant without mutating
    #[must_use]
    pub fn counts_consistent(&self) -> bool {
        let available = self
            .copies
            .iter()
            .filter(|c| c.status.is_available())
            .count();
        self.total_copies as usize == self.copies.len()
            && self.available_copies as usize == available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book_with_copies(n: u32) -> Book {
        let now = Utc::now();
        let mut book = Book::new(
            BookId::new(),
            "Algebra I".to_string(),
            "N. Bourbaki".to_string(),
            Some("978-3-540-64243-5".to_string()),
            now,
        );
        book.add_copies(n, now);
        book
    }

    #[test]
    fn add_copies_keeps_counts_consistent() {
        let book = book_with_copies(3);
        assert_eq!(book.total_copies, 3);
        assert_eq!(book.available_copies, 3);
        assert!(book.counts_consistent());
    }

    #[test]
    fn recount_tracks_status_changes() {
        let mut book = book_with_copies(3);
        let first = book.copies[0].id;
        if let Some(copy) = book.copy_mut(first) {
            copy.status = CopyStatus::Borrowed;
        }
        assert!(!book.counts_consistent());
        book.recount();
        assert_eq!(book.available_copies, 2);
        assert!(book.counts_consistent());
    }

    #[test]
    fn available_copy_ids_preserve_stored_order() {
        let mut book = book_with_copies(3);
        let ids: Vec<CopyId> = book.copies.iter().map(|c| c.id).collect();
        if let Some(copy) = book.copy_mut(ids[1]) {
            copy.status = CopyStatus::Maintenance;
        }
        book.recount();
        let available: Vec<CopyId> = book.available_copy_ids().collect();
        assert_eq!(available, vec![ids[0], ids[2]]);
    }
}
