use circulation_core::{
    AuthGuard, BookSnapshot, BorrowRequest, CirculationError, CirculationServices, Identity,
    InMemoryIdentityProvider, ManualClock, NewCopy, Outcome, Store,
};
use std::sync::Arc;

fn guarded_services() -> (AuthGuard, CirculationServices) {
    let provider = InMemoryIdentityProvider::new();
    provider.insert_session("user-token", Identity::user("alice"));
    provider.insert_session("admin-token", Identity::admin("librarian"));
    let guard = AuthGuard::new(Arc::new(provider));

    let services = CirculationServices::new(
        Arc::new(Store::in_memory().unwrap()),
        Arc::new(ManualClock::new(1_700_000_000_000)),
        Default::default(),
    );
    (guard, services)
}

#[test]
fn resolved_identities_drive_self_service_and_admin_paths() {
    let (guard, services) = guarded_services();
    let admin = guard.authenticate_admin(Some("Bearer admin-token")).unwrap();
    services
        .inventory
        .add_copy(&admin, &NewCopy::new("book-g", 1))
        .unwrap();

    let alice = guard.authenticate(Some("Bearer user-token")).unwrap();
    let request = BorrowRequest::new("book-g", BookSnapshot::new("Piranesi", "Susanna Clarke"));
    let receipt = services.allocator.borrow(&alice, &request).unwrap();

    let err = services
        .allocator
        .admin_return(&alice, receipt.entry.id)
        .unwrap_err();
    assert_eq!(err.outcome(), Outcome::Forbidden);

    services.allocator.admin_return(&admin, receipt.entry.id).unwrap();
    assert!(services.allocator.list_open(&alice).unwrap().is_empty());
}

#[test]
fn regular_user_token_fails_admin_gate() {
    let (guard, _services) = guarded_services();
    let err = guard.authenticate_admin(Some("user-token")).unwrap_err();
    assert!(matches!(err, CirculationError::NotAuthorized { .. }));
}

#[test]
fn revoked_session_is_unauthenticated() {
    let provider = Arc::new(InMemoryIdentityProvider::new());
    provider.insert_session("t-1", Identity::user("alice"));
    let guard = AuthGuard::new(provider.clone());

    assert!(guard.authenticate(Some("t-1")).is_ok());
    assert!(provider.revoke_session("t-1"));

    let err = guard.authenticate(Some("t-1")).unwrap_err();
    assert_eq!(err.outcome(), Outcome::Unauthenticated);
}
