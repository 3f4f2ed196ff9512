//! Reservation queue and its two periodic sweeps.
//!
//! # Responsibility
//! - Accept reservations only for fully checked-out titles.
//! - Expire stale reservations.
//! - Tell waiters, oldest first, when a copy of their title is back.
//!
//! # Invariants
//! - At most one active reservation per (user, book).
//! - The availability sweep informs but never claims a copy; a notified
//!   waiter competes for the next borrow like anyone else.
//! - Sweeps never write copy status.

use crate::clock::{add_days, Clock};
use crate::config::CirculationPolicy;
use crate::db::Store;
use crate::error::{CirculationError, CirculationResult, Resource};
use crate::model::identity::Identity;
use crate::model::ids::{validate_book_id, BookSnapshot, ReservationId};
use crate::model::notification::NotificationEvent;
use crate::model::reservation::Reservation;
use crate::repo::copy_repo::{book_is_registered, CopyRegistry, SqliteCopyRegistry};
use crate::repo::ledger_repo::{Ledger, SqliteLedger};
use crate::repo::notification_repo::{NotificationStore, SqliteNotificationStore};
use crate::repo::reservation_repo::{ReservationRepository, SqliteReservationRepository};
use crate::repo::RepoError;
use crate::service::{in_write_transaction, read, SweepReport};
use log::{debug, info, warn};
use std::sync::Arc;

pub struct ReservationQueue {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    policy: CirculationPolicy,
}

impl ReservationQueue {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>, policy: CirculationPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// Queues the caller for `book_id`.
    ///
    /// Without a `snapshot` the title and author come from the book's most
    /// recent loan; a fully checked-out book always has one.
    ///
    /// # Errors
    /// - `ReservationNotNeeded` while any copy is available.
    /// - `AlreadyReserved` when the caller already waits for the book.
    pub fn reserve(
        &self,
        caller: &Identity,
        book_id: &str,
        snapshot: Option<&BookSnapshot>,
    ) -> CirculationResult<Reservation> {
        validate_book_id(book_id)?;
        if let Some(snapshot) = snapshot {
            snapshot.validate()?;
        }

        let now = self.clock.now_ms();
        let expires_at = add_days(now, self.policy.reservation_days);
        let user_id = caller.user_id.as_str();

        let result = in_write_transaction(&self.store, |tx| {
            if !book_is_registered(tx, book_id)? {
                return Err(CirculationError::ResourceNotFound(Resource::Book(
                    book_id.to_string(),
                )));
            }

            let available = SqliteCopyRegistry::new(tx).count_available(book_id)?;
            if available > 0 {
                return Err(CirculationError::ReservationNotNeeded {
                    book_id: book_id.to_string(),
                    available,
                });
            }

            let reservations = SqliteReservationRepository::new(tx);
            if reservations.has_active(user_id, book_id)? {
                return Err(already_reserved(book_id));
            }

            let snapshot = match snapshot {
                Some(snapshot) => snapshot.clone(),
                None => SqliteLedger::new(tx)
                    .latest_snapshot_for_book(book_id)?
                    .ok_or_else(|| {
                        RepoError::InvalidData(format!(
                            "no loan records a title for checked-out book {book_id}"
                        ))
                    })?,
            };

            reservations
                .insert(user_id, book_id, &snapshot, now, expires_at)
                .map_err(|err| match err {
                    RepoError::UniqueViolation(_) => already_reserved(book_id),
                    other => other.into(),
                })
        });

        match &result {
            Ok(reservation) => info!(
                "event=reserve module=reservations status=ok user_id={} book_id={} reservation_id={}",
                user_id, book_id, reservation.id
            ),
            Err(err) => warn!(
                "event=reserve module=reservations status=error user_id={} book_id={} error_code={}",
                user_id,
                book_id,
                err.code()
            ),
        }
        result
    }

    /// Cancels one of the caller's active reservations.
    pub fn cancel(&self, caller: &Identity, reservation_id: ReservationId) -> CirculationResult<()> {
        let cancelled = in_write_transaction(&self.store, |tx| {
            Ok(SqliteReservationRepository::new(tx).cancel(reservation_id, &caller.user_id)?)
        })?;

        if !cancelled {
            debug!(
                "event=cancel_reservation module=reservations status=error user_id={} reservation_id={} error_code=resource_not_found",
                caller.user_id, reservation_id
            );
            return Err(CirculationError::ResourceNotFound(Resource::Reservation(
                reservation_id,
            )));
        }

        info!(
            "event=cancel_reservation module=reservations status=ok user_id={} reservation_id={}",
            caller.user_id, reservation_id
        );
        Ok(())
    }

    pub fn list_active(&self, caller: &Identity) -> CirculationResult<Vec<Reservation>> {
        read(&self.store, |conn| {
            Ok(SqliteReservationRepository::new(conn).list_active(&caller.user_id)?)
        })
    }

    /// Every reservation of the caller, newest first.
    pub fn list_history(&self, caller: &Identity) -> CirculationResult<Vec<Reservation>> {
        read(&self.store, |conn| {
            Ok(SqliteReservationRepository::new(conn).list_for_user(&caller.user_id)?)
        })
    }

    /// Moves every active reservation past `expires_at` to `expired`.
    pub fn expire_sweep(&self) -> CirculationResult<SweepReport> {
        let now = self.clock.now_ms();
        let expired = in_write_transaction(&self.store, |tx| {
            Ok(SqliteReservationRepository::new(tx).expire_due(now)?)
        })?;

        for id in &expired {
            debug!(
                "event=reservation_expired module=reservations status=ok reservation_id={}",
                id
            );
        }
        info!(
            "event=expire_sweep module=reservations status=ok expired={}",
            expired.len()
        );
        Ok(SweepReport {
            examined: expired.len(),
            applied: expired.len(),
            failed: 0,
        })
    }

    /// Emits `reservation_available` to each waiter whose title has an
    /// available copy, oldest reservation first.
    pub fn availability_sweep(&self) -> CirculationResult<SweepReport> {
        let candidates = read(&self.store, |conn| {
            Ok(SqliteReservationRepository::new(conn).list_notifiable()?)
        })?;

        let mut report = SweepReport {
            examined: candidates.len(),
            ..SweepReport::default()
        };
        for reservation in &candidates {
            match self.notify_waiter(reservation) {
                Ok(true) => report.applied += 1,
                Ok(false) => {}
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        "event=availability_notify module=reservations status=error reservation_id={} error_code={} error={}",
                        reservation.id,
                        err.code(),
                        err
                    );
                }
            }
        }

        info!(
            "event=availability_sweep module=reservations status=ok examined={} notified={} failed={}",
            report.examined, report.applied, report.failed
        );
        Ok(report)
    }

    fn notify_waiter(&self, reservation: &Reservation) -> CirculationResult<bool> {
        let now = self.clock.now_ms();
        in_write_transaction(&self.store, |tx| {
            let reservations = SqliteReservationRepository::new(tx);
            // Borrow, cancel or expiry may have won since the scan.
            if !reservations.is_notifiable(reservation.id)? {
                return Ok(false);
            }

            let event = NotificationEvent::reservation_available(reservation);
            let notifications = SqliteNotificationStore::new(tx);
            let inserted = if notifications.exists(&event.user_id, event.kind, event.related_id)? {
                false
            } else {
                notifications.insert(&event, now)?
            };
            reservations.mark_notified(reservation.id)?;

            debug!(
                "event=availability_notify module=reservations status={} user_id={} book_id={} reservation_id={}",
                if inserted { "ok" } else { "skip" },
                reservation.user_id,
                reservation.book_id,
                reservation.id
            );
            Ok(inserted)
        })
    }
}

fn already_reserved(book_id: &str) -> CirculationError {
    CirculationError::AlreadyReserved {
        book_id: book_id.to_string(),
    }
}
