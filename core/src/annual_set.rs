//! Annual set templates.
//!
//! An annual set is a named template of required and optional book entries
//! assigned to a cohort, issued as one multi-book transaction per student
//! per academic year.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ids::{AnnualSetId, BookId, CopyId};
use crate::refs::BookRef;

/// One book entry of an annual set
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnualSetEntry {
    /// The book, possibly referenced by an alternate key
    pub book: BookRef,
    /// How many copies each student receives (>= 1)
    pub quantity: u32,
    /// Optional allow-list restricting which copies may be issued
    pub copy_ids: Option<BTreeSet<CopyId>>,
    /// Whether a shortage of this book fails the whole issuance
    pub required: bool,
    /// Free-form staff notes
    pub notes: Option<String>,
}

impl AnnualSetEntry {
    /// Creates a required entry with no allow-list
    #[must_use]
    pub const fn required(book: BookRef, quantity: u32) -> Self {
        Self {
            book,
            quantity,
            copy_ids: None,
            required: true,
            notes: None,
        }
    }

    /// Creates an optional entry with no allow-list
    #[must_use]
    pub const fn optional(book: BookRef, quantity: u32) -> Self {
        Self {
            book,
            quantity,
            copy_ids: None,
            required: false,
            notes: None,
        }
    }
}

/// A named template of book entries for one cohort and academic year
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnualSet {
    /// Canonical set identifier
    pub id: AnnualSetId,
    /// Display name, e.g. "Grade 10 Sciences 2025/26"
    pub name: String,
    /// Academic year label, tracked externally for lending windows
    pub academic_year: String,
    /// Book entries in issuance order
    pub entries: Vec<AnnualSetEntry>,
}

impl AnnualSet {
    /// Merges duplicate entries for the same canonical book.
    ///
    /// The caller supplies the canonical [`BookId`] resolved for each entry
    /// (in entry order). Quantities are summed, allow-lists unioned (an
    /// entry without an allow-list lifts the restriction entirely),
    /// `required` is OR-ed, and notes joined. Order of first appearance is
    /// preserved. Invariant afterwards: one entry per book.
    #[must_use]
    pub fn merge_entries(
        entries: &[AnnualSetEntry],
        canonical: &[BookId],
    ) -> Vec<(BookId, AnnualSetEntry)> {
        debug_assert_eq!(entries.len(), canonical.len());
        let mut merged: Vec<(BookId, AnnualSetEntry)> = Vec::with_capacity(entries.len());
        for (entry, book_id) in entries.iter().zip(canonical) {
            if let Some((_, existing)) = merged.iter_mut().find(|(id, _)| id == book_id) {
                existing.quantity += entry.quantity;
                existing.required |= entry.required;
                existing.copy_ids = match (existing.copy_ids.take(), entry.copy_ids.clone()) {
                    (Some(a), Some(b)) => Some(a.union(&b).copied().collect()),
                    // One side unrestricted: the merged entry is unrestricted
                    _ => None,
                };
                existing.notes = match (existing.notes.take(), entry.notes.clone()) {
                    (Some(a), Some(b)) => Some(format!("{a}; {b}")),
                    (a, b) => a.or(b),
                };
            } else {
                merged.push((*book_id, entry.clone()));
            }
        }
        merged
    }
}
