//! Alternate-key references and the acting principal.
//!
//! Books and users carry exactly one canonical identifier. Callers may still
//! address them through legacy alternate keys (ISBN, library card number);
//! those resolve to canonical ids once, at the store boundary, via
//! [`crate::store::BookStore::resolve`] / [`crate::store::UserStore::resolve`].
//! Core logic never probes multiple candidate fields.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{BookId, UserId};

/// A book reference as supplied by a caller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookRef {
    /// Canonical identifier
    Id(BookId),
    /// Legacy alternate key
    Isbn(String),
}

impl fmt::Display for BookRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Isbn(isbn) => write!(f, "isbn:{isbn}"),
        }
    }
}

/// A user reference as supplied by a caller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRef {
    /// Canonical identifier
    Id(UserId),
    /// Legacy alternate key
    CardNumber(String),
}

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::CardNumber(card) => write!(f, "card:{card}"),
        }
    }
}

/// User role, used for permission checks and notification routing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular borrower
    Student,
    /// Circulation staff
    Librarian,
    /// Administrator
    Admin,
}

impl Role {
    /// Whether the role may act on other users' transactions
    #[must_use]
    pub const fn is_privileged(self) -> bool {
        matches!(self, Self::Librarian | Self::Admin)
    }
}

/// The principal performing an engine operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// The acting user
    pub user_id: UserId,
    /// The acting user's role
    pub role: Role,
}

impl Actor {
    /// Creates an actor
    #[must_use]
    pub const fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    /// Whether the actor may act on transactions they do not own
    #[must_use]
    pub const fn is_privileged(&self) -> bool {
        self.role.is_privileged()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staff_roles_are_privileged() {
        assert!(!Role::Student.is_privileged());
        assert!(Role::Librarian.is_privileged());
        assert!(Role::Admin.is_privileged());
    }
}
