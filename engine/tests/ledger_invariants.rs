//! Cross-operation invariants: counts, exclusivity, concurrency.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod support;

use circulation_core::book::{CopyCondition, CopyStatus};
use circulation_core::error::CirculationError;
use circulation_core::refs::{BookRef, UserRef};
use circulation_core::store::TransactionStore;
use circulation_core::transaction::ItemStatus;
use circulation_engine::{BorrowItem, BorrowRequest};
use support::world;

#[tokio::test]
async fn a_copy_is_never_in_two_active_transactions() {
    let w = world();
    let book = w.seed_book("Physics", 1).await;
    let mira = w.seed_student("mira").await;
    let omar = w.seed_student("omar").await;
    let staff = w.seed_librarian("ines").await;

    let first = w
        .engine
        .borrow(
            staff,
            BorrowRequest {
                user: UserRef::Id(mira.id),
                items: vec![BorrowItem::any(BookRef::Id(book.id))],
            },
        )
        .await
        .expect("first borrow");

    // Anonymous request: no copies left
    let err = w
        .engine
        .borrow(
            staff,
            BorrowRequest {
                user: UserRef::Id(omar.id),
                items: vec![BorrowItem::any(BookRef::Id(book.id))],
            },
        )
        .await
        .expect_err("must fail");
    assert!(matches!(err, CirculationError::InsufficientCopies { .. }));

    // After the return the copy circulates again
    w.engine
        .return_copies(staff, &first.id, None, CopyCondition::Good)
        .await
        .expect("return");
    w.engine
        .borrow(
            staff,
            BorrowRequest {
                user: UserRef::Id(omar.id),
                items: vec![BorrowItem::any(BookRef::Id(book.id))],
            },
        )
        .await
        .expect("borrow after return");
}

#[tokio::test]
async fn concurrent_borrows_of_the_last_copy_never_double_lend() {
    let w = world();
    let book = w.seed_book("Physics", 1).await;
    let mira = w.seed_student("mira").await;
    let omar = w.seed_student("omar").await;
    let staff = w.seed_librarian("ines").await;

    let for_mira = w.engine.borrow(
        staff,
        BorrowRequest {
            user: UserRef::Id(mira.id),
            items: vec![BorrowItem::any(BookRef::Id(book.id))],
        },
    );
    let for_omar = w.engine.borrow(
        staff,
        BorrowRequest {
            user: UserRef::Id(omar.id),
            items: vec![BorrowItem::any(BookRef::Id(book.id))],
        },
    );
    let (a, b) = tokio::join!(for_mira, for_omar);

    // Exactly one loan wins the copy
    assert_eq!(u8::from(a.is_ok()) + u8::from(b.is_ok()), 1);
    let stored = w.store.book_unchecked(book.id).await.expect("book");
    assert_eq!(stored.available_copies, 0);
    assert!(stored.counts_consistent());

    // The copy appears in exactly one active transaction
    let copy_id = book.copies[0].id;
    let mut holders = 0;
    for user_id in [mira.id, omar.id] {
        for tx in w
            .store
            .transactions_for_user(user_id)
            .await
            .expect("history")
        {
            if tx.is_active()
                && tx
                    .items
                    .iter()
                    .any(|i| i.copy_id == Some(copy_id) && i.status == ItemStatus::Borrowed)
            {
                holders += 1;
            }
        }
    }
    assert_eq!(holders, 1);
}

#[tokio::test]
async fn derived_counts_stay_consistent_through_a_full_lifecycle() {
    let w = world();
    let book = w.seed_book("Physics", 3).await;
    let student = w.seed_student("mira").await;
    let staff = w.seed_librarian("ines").await;

    for _ in 0..3 {
        let tx = w
            .engine
            .borrow(
                staff,
                BorrowRequest {
                    user: UserRef::Id(student.id),
                    items: vec![
                        BorrowItem::any(BookRef::Id(book.id)),
                        BorrowItem::any(BookRef::Id(book.id)),
                    ],
                },
            )
            .await
            .expect("borrow");
        let stored = w.store.book_unchecked(book.id).await.expect("book");
        assert!(stored.counts_consistent());
        assert_eq!(stored.available_copies, 1);

        let copies: Vec<_> = tx.items.iter().filter_map(|i| i.copy_id).collect();
        w.engine
            .return_copies(staff, &tx.id, Some(vec![copies[0]]), CopyCondition::Good)
            .await
            .expect("partial return");
        let stored = w.store.book_unchecked(book.id).await.expect("book");
        assert!(stored.counts_consistent());
        assert_eq!(stored.available_copies, 2);

        w.engine
            .return_copies(staff, &tx.id, None, CopyCondition::Good)
            .await
            .expect("final return");
        let stored = w.store.book_unchecked(book.id).await.expect("book");
        assert!(stored.counts_consistent());
        assert_eq!(stored.available_copies, 3);
    }
}

#[tokio::test]
async fn a_failed_multi_book_borrow_leaves_no_copy_stamped() {
    let w = world();
    let physics = w.seed_book("Physics", 2).await;
    let chemistry = w.seed_book("Chemistry", 1).await;
    let mira = w.seed_student("mira").await;
    let omar = w.seed_student("omar").await;
    let staff = w.seed_librarian("ines").await;

    // Chemistry's only copy goes out first
    w.engine
        .borrow(
            staff,
            BorrowRequest {
                user: UserRef::Id(omar.id),
                items: vec![BorrowItem::any(BookRef::Id(chemistry.id))],
            },
        )
        .await
        .expect("pre-borrow");

    let err = w
        .engine
        .borrow(
            staff,
            BorrowRequest {
                user: UserRef::Id(mira.id),
                items: vec![
                    BorrowItem::any(BookRef::Id(physics.id)),
                    BorrowItem::any(BookRef::Id(chemistry.id)),
                ],
            },
        )
        .await
        .expect_err("must fail");
    assert!(matches!(err, CirculationError::InsufficientCopies { .. }));

    let stored = w.store.book_unchecked(physics.id).await.expect("book");
    assert_eq!(stored.available_copies, 2);
    assert!(stored
        .copies
        .iter()
        .all(|c| c.status == CopyStatus::Available && c.borrowed_by.is_none()));
}

#[tokio::test]
async fn condition_grades_are_stamped_per_return_call() {
    let w = world();
    let book = w.seed_book("Physics", 2).await;
    let student = w.seed_student("mira").await;
    let staff = w.seed_librarian("ines").await;

    let tx = w
        .engine
        .borrow(
            staff,
            BorrowRequest {
                user: UserRef::Id(student.id),
                items: vec![
                    BorrowItem::any(BookRef::Id(book.id)),
                    BorrowItem::any(BookRef::Id(book.id)),
                ],
            },
        )
        .await
        .expect("borrow");
    let copies: Vec<_> = tx.items.iter().filter_map(|i| i.copy_id).collect();

    w.engine
        .return_copies(staff, &tx.id, Some(vec![copies[0]]), CopyCondition::Poor)
        .await
        .expect("return poor");
    w.engine
        .return_copies(staff, &tx.id, Some(vec![copies[1]]), CopyCondition::New)
        .await
        .expect("return new");

    let stored = w.store.book_unchecked(book.id).await.expect("book");
    assert_eq!(stored.copy(copies[0]).expect("copy").condition, CopyCondition::Poor);
    assert_eq!(stored.copy(copies[1]).expect("copy").condition, CopyCondition::New);
}
