use circulation_core::clock::MS_PER_DAY;
use circulation_core::db::DbError;
use circulation_core::{
    BookSnapshot, BorrowRequest, CirculationError, CirculationServices, Identity, LedgerStatus,
    ManualClock, NewCopy, NotificationKind, Outcome, ReservationStatus, Store,
};
use std::sync::Arc;

const DAY0: i64 = 20_000 * MS_PER_DAY + 9 * 3_600_000;

type Fixture = (CirculationServices, Arc<ManualClock>, Arc<Store>);

fn services_with_copies(book_id: &str, copies: u32) -> Fixture {
    let store = Arc::new(Store::in_memory().unwrap());
    let clock = Arc::new(ManualClock::new(DAY0));
    let services = CirculationServices::new(Arc::clone(&store), clock.clone(), Default::default());
    let admin = Identity::admin("librarian");
    for number in 1..=copies {
        services
            .inventory
            .add_copy(&admin, &NewCopy::new(book_id, number))
            .unwrap();
    }
    (services, clock, store)
}

fn request(book_id: &str) -> BorrowRequest {
    BorrowRequest::new(book_id, BookSnapshot::new("Dune", "Frank Herbert"))
}

#[test]
fn single_copy_borrow_reserve_return_notify_scenario() {
    let (services, _clock, _store) = services_with_copies("book-x", 1);
    let alice = Identity::user("alice");
    let bob = Identity::user("bob");

    let receipt = services.allocator.borrow(&alice, &request("book-x")).unwrap();
    assert_eq!(receipt.due_at(), DAY0 + 14 * MS_PER_DAY);
    assert_eq!(receipt.availability.available, 0);

    let err = services.allocator.borrow(&bob, &request("book-x")).unwrap_err();
    assert!(matches!(err, CirculationError::NoAvailableCopy(_)));
    assert_eq!(err.outcome(), Outcome::Conflict);

    let reservation = services
        .reservations
        .reserve(&bob, "book-x", Some(&BookSnapshot::new("Dune", "Frank Herbert")))
        .unwrap();
    assert_eq!(reservation.expires_at, DAY0 + 7 * MS_PER_DAY);

    let returned = services.allocator.return_book(&alice, "book-x").unwrap();
    assert_eq!(returned.availability.available, 1);
    assert_eq!(returned.entry.id, receipt.entry.id);
    assert_eq!(returned.entry.status, LedgerStatus::Returned);
    assert!(services.allocator.list_open(&alice).unwrap().is_empty());

    let first = services.reservations.availability_sweep().unwrap();
    assert_eq!(first.applied, 1);
    let second = services.reservations.availability_sweep().unwrap();
    assert_eq!(second.applied, 0);

    let inbox = services.inbox.list(&bob).unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, NotificationKind::ReservationAvailable);
    assert_eq!(inbox[0].related_id, reservation.id);
}

#[test]
fn borrowing_fulfils_the_borrowers_active_reservation() {
    let (services, _clock, _store) = services_with_copies("book-x", 1);
    let alice = Identity::user("alice");
    let bob = Identity::user("bob");

    services.allocator.borrow(&alice, &request("book-x")).unwrap();
    services
        .reservations
        .reserve(&bob, "book-x", Some(&BookSnapshot::new("Dune", "Frank Herbert")))
        .unwrap();
    services.allocator.return_book(&alice, "book-x").unwrap();
    services.allocator.borrow(&bob, &request("book-x")).unwrap();

    assert!(services.reservations.list_active(&bob).unwrap().is_empty());
    let history = services.reservations.list_history(&bob).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ReservationStatus::Fulfilled);
}

#[test]
fn notified_waiter_still_competes_for_the_copy() {
    let (services, _clock, _store) = services_with_copies("book-x", 1);
    let alice = Identity::user("alice");
    let bob = Identity::user("bob");
    let carol = Identity::user("carol");

    services.allocator.borrow(&alice, &request("book-x")).unwrap();
    services
        .reservations
        .reserve(&bob, "book-x", Some(&BookSnapshot::new("Dune", "Frank Herbert")))
        .unwrap();
    services.allocator.return_book(&alice, "book-x").unwrap();
    assert_eq!(services.reservations.availability_sweep().unwrap().applied, 1);

    services.allocator.borrow(&carol, &request("book-x")).unwrap();
    let err = services.allocator.borrow(&bob, &request("book-x")).unwrap_err();
    assert!(matches!(err, CirculationError::NoAvailableCopy(_)));
}

#[test]
fn return_then_reborrow_by_another_user_succeeds() {
    let (services, _clock, _store) = services_with_copies("book-y", 1);
    let alice = Identity::user("alice");
    let bob = Identity::user("bob");

    services.allocator.borrow(&alice, &request("book-y")).unwrap();
    services.allocator.return_book(&alice, "book-y").unwrap();
    let receipt = services.allocator.borrow(&bob, &request("book-y")).unwrap();

    assert_eq!(receipt.entry.user_id, "bob");
    let availability = services.inventory.availability("book-y").unwrap();
    assert_eq!(availability.total, 1);
    assert_eq!(availability.borrowed, 1);
    assert_eq!(availability.available, 0);
}

#[test]
fn returning_without_open_loan_is_nothing_to_return() {
    let (services, _clock, _store) = services_with_copies("book-x", 1);
    let alice = Identity::user("alice");

    let err = services.allocator.return_book(&alice, "book-x").unwrap_err();
    assert!(matches!(err, CirculationError::NothingToReturn { .. }));

    services.allocator.borrow(&alice, &request("book-x")).unwrap();
    services.allocator.return_book(&alice, "book-x").unwrap();
    let err = services.allocator.return_book(&alice, "book-x").unwrap_err();
    assert!(matches!(err, CirculationError::NothingToReturn { .. }));
    assert_eq!(services.inventory.availability("book-x").unwrap().available, 1);
}

#[test]
fn failed_ledger_write_rolls_back_the_claimed_copy() {
    let (services, _clock, store) = services_with_copies("book-x", 1);
    store
        .with_connection(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER reject_ledger_insert
                 BEFORE INSERT ON ledger_entries
                 BEGIN
                     SELECT RAISE(ABORT, 'ledger unavailable');
                 END;",
            )
            .map_err(DbError::from)
        })
        .unwrap();

    let alice = Identity::user("alice");
    let err = services.allocator.borrow(&alice, &request("book-x")).unwrap_err();
    assert!(matches!(err, CirculationError::TransientStoreFailure(_)));
    assert_eq!(err.outcome(), Outcome::Transient);

    let availability = services.inventory.availability("book-x").unwrap();
    assert_eq!(availability.available, 1);
    assert_eq!(availability.borrowed, 0);
    assert!(services.allocator.list_history(&alice).unwrap().is_empty());
}

#[test]
fn admin_borrow_and_return_by_entry_id() {
    let (services, _clock, _store) = services_with_copies("book-x", 2);
    let admin = Identity::admin("librarian");
    let alice = Identity::user("alice");

    let receipt = services
        .allocator
        .admin_borrow(&admin, "alice", &request("book-x"))
        .unwrap();
    assert_eq!(receipt.entry.user_id, "alice");
    assert_eq!(services.allocator.list_open(&alice).unwrap().len(), 1);
    assert_eq!(services.allocator.list_open_admin(&admin).unwrap().len(), 1);

    let returned = services
        .allocator
        .admin_return(&admin, receipt.entry.id)
        .unwrap();
    assert_eq!(returned.availability.available, 2);

    let err = services
        .allocator
        .admin_return(&admin, receipt.entry.id)
        .unwrap_err();
    assert!(matches!(err, CirculationError::ResourceNotFound(_)));
    assert_eq!(services.allocator.list_all_admin(&admin).unwrap().len(), 1);
}

#[test]
fn same_user_holding_two_copies_returns_one_at_a_time() {
    let (services, clock, _store) = services_with_copies("book-x", 2);
    let alice = Identity::user("alice");

    let first = services.allocator.borrow(&alice, &request("book-x")).unwrap();
    clock.advance_ms(1_000);
    let second = services.allocator.borrow(&alice, &request("book-x")).unwrap();

    let returned = services.allocator.return_book(&alice, "book-x").unwrap();
    assert_eq!(returned.entry.id, first.entry.id);
    assert_eq!(returned.availability.borrowed, 1);

    let open = services.allocator.list_open(&alice).unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, second.entry.id);
}

#[test]
fn malformed_ids_are_validation_errors() {
    let (services, _clock, _store) = services_with_copies("book-x", 1);
    let err = services
        .allocator
        .borrow(&Identity::user("alice"), &request("bad id; DROP"))
        .unwrap_err();
    assert_eq!(err.outcome(), Outcome::Invalid);

    let err = services
        .allocator
        .admin_borrow(&Identity::admin("librarian"), "", &request("book-x"))
        .unwrap_err();
    assert!(matches!(err, CirculationError::Validation(_)));
}
