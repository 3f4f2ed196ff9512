use circulation_core::{
    BookSnapshot, BorrowRequest, CirculationError, CirculationServices, CopyDetails, CopyStatus,
    Identity, ManualClock, NewCopy, Store,
};
use std::sync::Arc;
use uuid::Uuid;

fn services() -> CirculationServices {
    CirculationServices::new(
        Arc::new(Store::in_memory().unwrap()),
        Arc::new(ManualClock::new(1_700_000_000_000)),
        Default::default(),
    )
}

fn shelved(book_id: &str, copy_number: u32, location: &str) -> NewCopy {
    NewCopy {
        location: location.to_string(),
        acquired_date: Some("2023-09-01".to_string()),
        ..NewCopy::new(book_id, copy_number)
    }
}

#[test]
fn copies_are_listed_in_copy_number_order() {
    let services = services();
    let admin = Identity::admin("librarian");
    for number in [3, 1, 2] {
        services
            .inventory
            .add_copy(&admin, &shelved("book-a", number, "A-1"))
            .unwrap();
    }
    services
        .inventory
        .add_copy(&admin, &shelved("book-0", 1, "B-2"))
        .unwrap();

    let numbers: Vec<u32> = services
        .inventory
        .list_copies("book-a")
        .unwrap()
        .iter()
        .map(|copy| copy.copy_number)
        .collect();
    assert_eq!(numbers, vec![1, 2, 3]);

    let all = services.inventory.list_all_copies(&admin).unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(all[0].book_id, "book-0");
    assert!(all.iter().all(|copy| copy.status == CopyStatus::Available));

    let err = services
        .inventory
        .list_all_copies(&Identity::user("alice"))
        .unwrap_err();
    assert!(matches!(err, CirculationError::NotAuthorized { .. }));
}

#[test]
fn borrowed_copy_cannot_be_deleted() {
    let services = services();
    let admin = Identity::admin("librarian");
    let copy = services
        .inventory
        .add_copy(&admin, &shelved("book-a", 1, "A-1"))
        .unwrap();
    let receipt = services
        .allocator
        .borrow(
            &Identity::user("alice"),
            &BorrowRequest::new("book-a", BookSnapshot::new("Beloved", "Toni Morrison")),
        )
        .unwrap();
    assert_eq!(receipt.copy_id, copy.id);

    let err = services.inventory.delete_copy(&admin, copy.id).unwrap_err();
    assert!(matches!(err, CirculationError::CopyInUse(id) if id == copy.id));

    services
        .allocator
        .return_book(&Identity::user("alice"), "book-a")
        .unwrap();
    services.inventory.delete_copy(&admin, copy.id).unwrap();

    let availability = services.inventory.availability("book-a").unwrap();
    assert_eq!(availability.total, 0);
    let err = services.inventory.delete_copy(&admin, copy.id).unwrap_err();
    assert!(matches!(err, CirculationError::ResourceNotFound(_)));
}

#[test]
fn detail_edits_never_touch_status() {
    let services = services();
    let admin = Identity::admin("librarian");
    let copy = services
        .inventory
        .add_copy(&admin, &shelved("book-a", 1, "A-1"))
        .unwrap();
    services
        .allocator
        .borrow(
            &Identity::user("alice"),
            &BorrowRequest::new("book-a", BookSnapshot::new("Beloved", "Toni Morrison")),
        )
        .unwrap();

    let updated = services
        .inventory
        .update_copy_details(
            &admin,
            copy.id,
            &CopyDetails {
                location: "Repair desk".to_string(),
                acquired_date: None,
                notes: "spine damaged".to_string(),
            },
        )
        .unwrap();
    assert_eq!(updated.status, CopyStatus::Borrowed);
    assert_eq!(updated.location, "Repair desk");
    assert_eq!(updated.acquired_date, None);

    let err = services
        .inventory
        .update_copy_details(&admin, Uuid::new_v4(), &CopyDetails::default())
        .unwrap_err();
    assert!(matches!(err, CirculationError::ResourceNotFound(_)));
}

#[test]
fn availability_always_sums_to_total() {
    let services = services();
    let admin = Identity::admin("librarian");
    for number in 1..=4 {
        services
            .inventory
            .add_copy(&admin, &shelved("book-s", number, "S-1"))
            .unwrap();
    }

    for reader in ["r1", "r2", "r3"] {
        services
            .allocator
            .borrow(
                &Identity::user(reader),
                &BorrowRequest::new("book-s", BookSnapshot::new("Ubik", "Philip K. Dick")),
            )
            .unwrap();
        let counts = services.inventory.availability("book-s").unwrap();
        assert_eq!(counts.available + counts.borrowed, counts.total);
    }

    let counts = services.inventory.availability("book-s").unwrap();
    assert_eq!((counts.total, counts.available, counts.borrowed), (4, 1, 3));
}
