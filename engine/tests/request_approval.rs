//! Self-service request lifecycle: submit, approve, reject, cancel.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod support;

use circulation_core::book::CopyStatus;
use circulation_core::environment::{AuditOutcome, NoticeKind, Recipients};
use circulation_core::error::{CirculationError, ErrorKind};
use circulation_core::refs::{BookRef, Role, UserRef};
use circulation_core::transaction::{ItemStatus, TransactionStatus};
use circulation_engine::{CopyAssignment, RequestSubmission};
use support::{actor_for, start, world};

#[tokio::test]
async fn request_binds_no_copies() {
    let w = world();
    let book = w.seed_book("Physics", 3).await;
    let student = w.seed_student("mira").await;

    let tx = w
        .engine
        .request(
            actor_for(&student),
            RequestSubmission {
                user: UserRef::Id(student.id),
                books: vec![BookRef::Id(book.id), BookRef::Id(book.id)],
            },
        )
        .await
        .expect("request");

    assert_eq!(tx.status, TransactionStatus::Requested);
    assert!(tx.due_date.is_none());
    assert!(tx.items.iter().all(|i| i.copy_id.is_none()));
    assert!(tx.items.iter().all(|i| i.status == ItemStatus::Requested));

    // Stock untouched, staff notified
    let stored = w.store.book_unchecked(book.id).await.expect("book");
    assert_eq!(stored.available_copies, 3);
    let sent = w.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].0,
        Recipients::Roles(vec![Role::Librarian, Role::Admin])
    );
    assert_eq!(sent[0].1.kind, NoticeKind::RequestSubmitted);
}

#[tokio::test]
async fn students_cannot_request_for_others() {
    let w = world();
    let book = w.seed_book("Physics", 1).await;
    let mira = w.seed_student("mira").await;
    let omar = w.seed_student("omar").await;

    let err = w
        .engine
        .request(
            actor_for(&mira),
            RequestSubmission {
                user: UserRef::Id(omar.id),
                books: vec![BookRef::Id(book.id)],
            },
        )
        .await
        .expect_err("must fail");
    assert!(matches!(err, CirculationError::Forbidden(_)));
}

#[tokio::test]
async fn approval_issues_the_assigned_copies() {
    let w = world();
    let physics = w.seed_book("Physics", 2).await;
    let chemistry = w.seed_book("Chemistry", 1).await;
    let student = w.seed_student("mira").await;
    let staff = w.seed_librarian("ines").await;

    let tx = w
        .engine
        .request(
            actor_for(&student),
            RequestSubmission {
                user: UserRef::Id(student.id),
                books: vec![BookRef::Id(physics.id), BookRef::Id(chemistry.id)],
            },
        )
        .await
        .expect("request");

    // One assignment names its item explicitly, the other auto-matches
    let physics_item = tx.items[0].request_item_id;
    let approved = w
        .engine
        .approve(
            staff,
            &tx.id,
            vec![
                CopyAssignment {
                    request_item_id: Some(physics_item),
                    copy_id: physics.copies[1].id,
                },
                CopyAssignment {
                    request_item_id: None,
                    copy_id: chemistry.copies[0].id,
                },
            ],
        )
        .await
        .expect("approve");

    assert_eq!(approved.status, TransactionStatus::Borrowed);
    assert_eq!(approved.borrow_date, start());
    assert_eq!(
        approved.due_date,
        Some(start() + chrono::Duration::days(14))
    );
    assert!(approved.items.iter().all(|i| i.status == ItemStatus::Borrowed));
    assert_eq!(approved.items[0].copy_id, Some(physics.copies[1].id));
    assert_eq!(approved.items[1].copy_id, Some(chemistry.copies[0].id));

    let stored = w.store.book_unchecked(physics.id).await.expect("book");
    assert_eq!(stored.available_copies, 1);
    assert_eq!(
        stored.copy(physics.copies[1].id).expect("copy").status,
        CopyStatus::Borrowed
    );

    let user = w.store.user_unchecked(student.id).await.expect("user");
    assert_eq!(user.stats.currently_borrowed, 2);

    let kinds: Vec<NoticeKind> = w.notifier.sent().iter().map(|(_, n)| n.kind).collect();
    assert!(kinds.contains(&NoticeKind::RequestApproved));
}

#[tokio::test]
async fn approval_enumerates_every_fault_and_mutates_nothing() {
    let w = world();
    let physics = w.seed_book("Physics", 1).await;
    let chemistry = w.seed_book("Chemistry", 1).await;
    let mira = w.seed_student("mira").await;
    let omar = w.seed_student("omar").await;
    let staff = w.seed_librarian("ines").await;

    // Physics' only copy goes out to someone else first
    w.engine
        .borrow(
            staff,
            circulation_engine::BorrowRequest {
                user: UserRef::Id(omar.id),
                items: vec![circulation_engine::BorrowItem::any(BookRef::Id(physics.id))],
            },
        )
        .await
        .expect("pre-borrow");

    let tx = w
        .engine
        .request(
            actor_for(&mira),
            RequestSubmission {
                user: UserRef::Id(mira.id),
                books: vec![BookRef::Id(physics.id), BookRef::Id(chemistry.id)],
            },
        )
        .await
        .expect("request");

    // One assignment targets the lent copy; the chemistry item has none
    let err = w
        .engine
        .approve(
            staff,
            &tx.id,
            vec![CopyAssignment {
                request_item_id: None,
                copy_id: physics.copies[0].id,
            }],
        )
        .await
        .expect_err("must fail");
    let CirculationError::ApprovalRejected { faults } = err else {
        panic!("expected ApprovalRejected");
    };
    assert_eq!(faults.len(), 2);
    assert!(faults.iter().any(|f| f.reason.contains("not available")));
    assert!(faults.iter().any(|f| f.reason.contains("no assignment")));

    // Nothing moved: request still open, chemistry stock untouched
    let fresh = w.store.transaction_unchecked(&tx.id).await.expect("tx");
    assert_eq!(fresh.status, TransactionStatus::Requested);
    let stored = w.store.book_unchecked(chemistry.id).await.expect("book");
    assert_eq!(stored.available_copies, 1);
}

#[tokio::test]
async fn approval_rejects_copies_of_the_wrong_book() {
    let w = world();
    let physics = w.seed_book("Physics", 1).await;
    let chemistry = w.seed_book("Chemistry", 1).await;
    let student = w.seed_student("mira").await;
    let staff = w.seed_librarian("ines").await;

    let tx = w
        .engine
        .request(
            actor_for(&student),
            RequestSubmission {
                user: UserRef::Id(student.id),
                books: vec![BookRef::Id(physics.id)],
            },
        )
        .await
        .expect("request");

    let err = w
        .engine
        .approve(
            staff,
            &tx.id,
            vec![CopyAssignment {
                request_item_id: Some(tx.items[0].request_item_id),
                copy_id: chemistry.copies[0].id,
            }],
        )
        .await
        .expect_err("must fail");
    let CirculationError::ApprovalRejected { faults } = err else {
        panic!("expected ApprovalRejected");
    };
    assert!(faults.iter().any(|f| f.reason.contains("different book")));
}

#[tokio::test]
async fn approving_twice_hits_an_invalid_status() {
    let w = world();
    let book = w.seed_book("Physics", 2).await;
    let student = w.seed_student("mira").await;
    let staff = w.seed_librarian("ines").await;

    let tx = w
        .engine
        .request(
            actor_for(&student),
            RequestSubmission {
                user: UserRef::Id(student.id),
                books: vec![BookRef::Id(book.id)],
            },
        )
        .await
        .expect("request");
    let assignment = vec![CopyAssignment {
        request_item_id: None,
        copy_id: book.copies[0].id,
    }];
    w.engine
        .approve(staff, &tx.id, assignment.clone())
        .await
        .expect("first approve");
    let err = w
        .engine
        .approve(staff, &tx.id, assignment)
        .await
        .expect_err("second must fail");
    assert!(matches!(
        err,
        CirculationError::InvalidStatus {
            operation: "approve",
            status: TransactionStatus::Borrowed,
        }
    ));
}

#[tokio::test]
async fn rejection_records_reason_and_notifies_the_requester() {
    let w = world();
    let book = w.seed_book("Physics", 1).await;
    let student = w.seed_student("mira").await;
    let staff = w.seed_librarian("ines").await;

    let tx = w
        .engine
        .request(
            actor_for(&student),
            RequestSubmission {
                user: UserRef::Id(student.id),
                books: vec![BookRef::Id(book.id)],
            },
        )
        .await
        .expect("request");
    let rejected = w
        .engine
        .reject(staff, &tx.id, "title reserved for coursework".to_string())
        .await
        .expect("reject");

    assert_eq!(rejected.status, TransactionStatus::Rejected);
    assert_eq!(
        rejected.closed_reason.as_deref(),
        Some("title reserved for coursework")
    );
    assert_eq!(rejected.closed_by, Some(staff.user_id));

    let sent = w.notifier.sent();
    let notice = &sent.last().expect("notice").1;
    assert_eq!(notice.kind, NoticeKind::RequestRejected);
    assert!(notice.message.contains("title reserved for coursework"));
}

#[tokio::test]
async fn cancel_is_for_the_requester_or_staff_only() {
    let w = world();
    let book = w.seed_book("Physics", 1).await;
    let mira = w.seed_student("mira").await;
    let omar = w.seed_student("omar").await;

    let tx = w
        .engine
        .request(
            actor_for(&mira),
            RequestSubmission {
                user: UserRef::Id(mira.id),
                books: vec![BookRef::Id(book.id)],
            },
        )
        .await
        .expect("request");

    let err = w
        .engine
        .cancel(actor_for(&omar), &tx.id, None)
        .await
        .expect_err("strangers cannot cancel");
    assert!(matches!(err, CirculationError::Forbidden(_)));

    let cancelled = w
        .engine
        .cancel(actor_for(&mira), &tx.id, Some("found a copy".to_string()))
        .await
        .expect("cancel");
    assert_eq!(cancelled.status, TransactionStatus::Cancelled);
    assert_eq!(cancelled.closed_by, Some(mira.id));
    // Pending notifications for the request are archived
    assert_eq!(w.notifier.archived(), vec![tx.id.clone()]);
}

#[tokio::test]
async fn cancel_after_issuance_is_rejected() {
    let w = world();
    let book = w.seed_book("Physics", 1).await;
    let student = w.seed_student("mira").await;
    let staff = w.seed_librarian("ines").await;

    let tx = w
        .engine
        .request(
            actor_for(&student),
            RequestSubmission {
                user: UserRef::Id(student.id),
                books: vec![BookRef::Id(book.id)],
            },
        )
        .await
        .expect("request");
    w.engine
        .approve(
            staff,
            &tx.id,
            vec![CopyAssignment {
                request_item_id: None,
                copy_id: book.copies[0].id,
            }],
        )
        .await
        .expect("approve");

    let err = w
        .engine
        .cancel(actor_for(&student), &tx.id, None)
        .await
        .expect_err("must fail");
    assert!(matches!(
        err,
        CirculationError::InvalidStatus {
            operation: "cancel",
            status: TransactionStatus::Borrowed,
        }
    ));
}

#[tokio::test]
async fn failures_are_audited_with_their_kind() {
    let w = world();
    let book = w.seed_book("Physics", 1).await;
    let mira = w.seed_student("mira").await;

    let tx = w
        .engine
        .request(
            actor_for(&mira),
            RequestSubmission {
                user: UserRef::Id(mira.id),
                books: vec![BookRef::Id(book.id)],
            },
        )
        .await
        .expect("request");

    // A student approving their own request is forbidden, and audited as such
    let _ = w
        .engine
        .approve(actor_for(&mira), &tx.id, Vec::new())
        .await
        .expect_err("forbidden");

    let entries = w.audit.entries_for("approve");
    assert_eq!(entries.len(), 1);
    assert!(matches!(
        entries[0].outcome,
        AuditOutcome::Failure {
            kind: ErrorKind::Forbidden,
            ..
        }
    ));
    assert_eq!(entries[0].transaction_id, Some(tx.id.clone()));

    // Successful operations are audited too
    let request_entries = w.audit.entries_for("request");
    assert_eq!(request_entries.len(), 1);
    assert!(matches!(request_entries[0].outcome, AuditOutcome::Success));
}
