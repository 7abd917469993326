//! In-memory implementation of every store trait.
//!
//! Behaves like a production document store in the ways the engine relies
//! on: per-document versions with compare-and-swap writes, a maintained
//! copy→book secondary index, and alternate-key (ISBN / card number)
//! resolution. Everything lives behind one `RwLock`, which is plenty for
//! tests while still letting CAS conflicts be provoked deliberately.

use async_trait::async_trait;
use circulation_core::annual_set::AnnualSet;
use circulation_core::book::Book;
use circulation_core::error::StoreError;
use circulation_core::ids::{AnnualSetId, BookId, CopyId, TransactionId, UserId};
use circulation_core::refs::{BookRef, UserRef};
use circulation_core::store::{
    AnnualSetStore, BookStore, StoreResult, TransactionStore, UserStore, Version, Versioned,
};
use circulation_core::transaction::Transaction;
use circulation_core::user::User;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    books: HashMap<BookId, (Book, Version)>,
    copy_index: HashMap<CopyId, BookId>,
    isbn_index: HashMap<String, BookId>,
    transactions: HashMap<String, (Transaction, Version)>,
    transaction_order: Vec<TransactionId>,
    users: HashMap<UserId, (User, Version)>,
    card_index: HashMap<String, UserId>,
    annual_sets: HashMap<AnnualSetId, AnnualSet>,
}

impl Inner {
    fn index_book(&mut self, book: &Book) {
        for copy in &book.copies {
            self.copy_index.insert(copy.id, book.id);
        }
        if let Some(isbn) = &book.isbn {
            self.isbn_index.insert(isbn.clone(), book.id);
        }
    }
}

/// In-memory library backing store
#[derive(Default)]
pub struct InMemoryLibrary {
    inner: RwLock<Inner>,
}

impl InMemoryLibrary {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: loads a book without caring about its version
    pub async fn book_unchecked(&self, id: BookId) -> Option<Book> {
        self.inner.read().await.books.get(&id).map(|(b, _)| b.clone())
    }

    /// Test hook: loads a transaction without caring about its version
    pub async fn transaction_unchecked(&self, id: &TransactionId) -> Option<Transaction> {
        self.inner
            .read()
            .await
            .transactions
            .get(id.as_str())
            .map(|(t, _)| t.clone())
    }

    /// Test hook: loads a user without caring about its version
    pub async fn user_unchecked(&self, id: UserId) -> Option<User> {
        self.inner.read().await.users.get(&id).map(|(u, _)| u.clone())
    }
}

#[async_trait]
impl BookStore for InMemoryLibrary {
    async fn book(&self, id: BookId) -> StoreResult<Option<Versioned<Book>>> {
        Ok(self
            .inner
            .read()
            .await
            .books
            .get(&id)
            .map(|(book, version)| Versioned::new(book.clone(), *version)))
    }

    async fn resolve(&self, book: &BookRef) -> StoreResult<Option<BookId>> {
        let inner = self.inner.read().await;
        Ok(match book {
            BookRef::Id(id) => inner.books.contains_key(id).then_some(*id),
            BookRef::Isbn(isbn) => inner.isbn_index.get(isbn).copied(),
        })
    }

    async fn book_by_copy(&self, copy_id: CopyId) -> StoreResult<Option<BookId>> {
        Ok(self.inner.read().await.copy_index.get(&copy_id).copied())
    }

    async fn insert_book(&self, book: Book) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.books.contains_key(&book.id) {
            return Err(StoreError::DuplicateId(book.id.to_string()));
        }
        inner.index_book(&book);
        inner.books.insert(book.id, (book, Version::initial()));
        Ok(())
    }

    async fn put_book(&self, book: Book, expected: Version) -> StoreResult<Version> {
        let mut inner = self.inner.write().await;
        let Some((_, current)) = inner.books.get(&book.id) else {
            return Err(StoreError::Backend(format!("no such book: {}", book.id)));
        };
        if *current != expected {
            return Err(StoreError::VersionConflict {
                expected,
                actual: *current,
            });
        }
        let next = expected.next();
        inner.index_book(&book);
        inner.books.insert(book.id, (book, next));
        Ok(next)
    }
}

#[async_trait]
impl TransactionStore for InMemoryLibrary {
    async fn transaction(&self, id: &TransactionId) -> StoreResult<Option<Versioned<Transaction>>> {
        Ok(self
            .inner
            .read()
            .await
            .transactions
            .get(id.as_str())
            .map(|(tx, version)| Versioned::new(tx.clone(), *version)))
    }

    async fn insert_transaction(&self, transaction: Transaction) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let key = transaction.id.as_str().to_string();
        if inner.transactions.contains_key(&key) {
            return Err(StoreError::DuplicateId(key));
        }
        inner.transaction_order.push(transaction.id.clone());
        inner
            .transactions
            .insert(key, (transaction, Version::initial()));
        Ok(())
    }

    async fn put_transaction(
        &self,
        transaction: Transaction,
        expected: Version,
    ) -> StoreResult<Version> {
        let mut inner = self.inner.write().await;
        let key = transaction.id.as_str().to_string();
        let Some((_, current)) = inner.transactions.get(&key) else {
            return Err(StoreError::Backend(format!("no such transaction: {key}")));
        };
        if *current != expected {
            return Err(StoreError::VersionConflict {
                expected,
                actual: *current,
            });
        }
        let next = expected.next();
        inner.transactions.insert(key, (transaction, next));
        Ok(next)
    }

    async fn transactions_for_user(&self, user_id: UserId) -> StoreResult<Vec<Transaction>> {
        let inner = self.inner.read().await;
        Ok(inner
            .transaction_order
            .iter()
            .filter_map(|id| inner.transactions.get(id.as_str()))
            .map(|(tx, _)| tx)
            .filter(|tx| tx.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn active_annual_set_borrowing(
        &self,
        user_id: UserId,
        annual_set_id: AnnualSetId,
    ) -> StoreResult<Option<TransactionId>> {
        let inner = self.inner.read().await;
        Ok(inner
            .transaction_order
            .iter()
            .filter_map(|id| inner.transactions.get(id.as_str()))
            .map(|(tx, _)| tx)
            .find(|tx| {
                tx.user_id == user_id
                    && tx.annual_set_id == Some(annual_set_id)
                    && tx.is_active()
            })
            .map(|tx| tx.id.clone()))
    }
}

#[async_trait]
impl UserStore for InMemoryLibrary {
    async fn user(&self, id: UserId) -> StoreResult<Option<Versioned<User>>> {
        Ok(self
            .inner
            .read()
            .await
            .users
            .get(&id)
            .map(|(user, version)| Versioned::new(user.clone(), *version)))
    }

    async fn resolve(&self, user: &UserRef) -> StoreResult<Option<UserId>> {
        let inner = self.inner.read().await;
        Ok(match user {
            UserRef::Id(id) => inner.users.contains_key(id).then_some(*id),
            UserRef::CardNumber(card) => inner.card_index.get(card).copied(),
        })
    }

    async fn insert_user(&self, user: User) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.users.contains_key(&user.id) {
            return Err(StoreError::DuplicateId(user.id.to_string()));
        }
        if let Some(card) = &user.card_number {
            inner.card_index.insert(card.clone(), user.id);
        }
        inner.users.insert(user.id, (user, Version::initial()));
        Ok(())
    }

    async fn put_user(&self, user: User, expected: Version) -> StoreResult<Version> {
        let mut inner = self.inner.write().await;
        let Some((_, current)) = inner.users.get(&user.id) else {
            return Err(StoreError::Backend(format!("no such user: {}", user.id)));
        };
        if *current != expected {
            return Err(StoreError::VersionConflict {
                expected,
                actual: *current,
            });
        }
        let next = expected.next();
        inner.users.insert(user.id, (user, next));
        Ok(next)
    }
}

#[async_trait]
impl AnnualSetStore for InMemoryLibrary {
    async fn annual_set(&self, id: AnnualSetId) -> StoreResult<Option<AnnualSet>> {
        Ok(self.inner.read().await.annual_sets.get(&id).cloned())
    }

    async fn insert_annual_set(&self, set: AnnualSet) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.annual_sets.contains_key(&set.id) {
            return Err(StoreError::DuplicateId(set.id.to_string()));
        }
        inner.annual_sets.insert(set.id, set);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_book() -> Book {
        let now = Utc::now();
        let mut book = Book::new(
            BookId::new(),
            "Discrete Mathematics".to_string(),
            "K. Rosen".to_string(),
            Some("978-0-07-338309-5".to_string()),
            now,
        );
        book.add_copies(2, now);
        book
    }

    #[tokio::test]
    async fn cas_rejects_stale_writes() {
        let store = InMemoryLibrary::new();
        let book = sample_book();
        let id = book.id;
        store.insert_book(book).await.expect("insert");

        let first = BookStore::book(&store, id).await.expect("read").expect("some");
        let second = first.clone();

        let v2 = store
            .put_book(first.doc, first.version)
            .await
            .expect("first write lands");
        assert_eq!(v2, first.version.next());

        let err = store
            .put_book(second.doc, second.version)
            .await
            .expect_err("stale write must fail");
        assert!(matches!(err, StoreError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn copy_and_isbn_indexes_are_maintained() {
        let store = InMemoryLibrary::new();
        let book = sample_book();
        let id = book.id;
        let copy = book.copies[0].id;
        let isbn = book.isbn.clone().expect("isbn");
        store.insert_book(book).await.expect("insert");

        assert_eq!(store.book_by_copy(copy).await.expect("index"), Some(id));
        assert_eq!(
            BookStore::resolve(&store, &BookRef::Isbn(isbn)).await.expect("resolve"),
            Some(id)
        );
        assert_eq!(
            store.book_by_copy(CopyId::new()).await.expect("index"),
            None
        );
    }
}
