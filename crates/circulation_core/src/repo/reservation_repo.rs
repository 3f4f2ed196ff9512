//! Reservation queue persistence.
//!
//! # Responsibility
//! - Insert, cancel, fulfil and expire reservations.
//! - Find waiters whose title has an available copy, oldest first.
//!
//! # Invariants
//! - Every transition is guarded by `status = 'active'`, so re-running a
//!   transition is a no-op.
//! - The partial unique index `uq_reservations_active_user_book` backs the
//!   one-active-reservation-per-(user, book) rule.

use crate::model::ids::{BookSnapshot, ReservationId};
use crate::model::reservation::{Reservation, ReservationStatus};
use crate::repo::{bool_to_int, int_to_bool, is_unique_violation, parse_uuid, RepoError, RepoResult};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

const RESERVATION_SELECT_SQL: &str = "SELECT
    r.id,
    r.user_id,
    r.book_id,
    r.title,
    r.author,
    r.reserved_at,
    r.expires_at,
    r.status,
    r.notified
FROM reservations r";

/// Reservation contract used by the queue service and sweeps.
pub trait ReservationRepository {
    fn insert(
        &self,
        user_id: &str,
        book_id: &str,
        snapshot: &BookSnapshot,
        reserved_at: i64,
        expires_at: i64,
    ) -> RepoResult<Reservation>;
    fn get(&self, id: ReservationId) -> RepoResult<Option<Reservation>>;
    fn has_active(&self, user_id: &str, book_id: &str) -> RepoResult<bool>;
    /// Cancels an active reservation owned by `user_id`.
    fn cancel(&self, id: ReservationId, user_id: &str) -> RepoResult<bool>;
    /// Marks the user's active reservation for the book fulfilled.
    fn fulfil_active(&self, user_id: &str, book_id: &str) -> RepoResult<usize>;
    fn list_active(&self, user_id: &str) -> RepoResult<Vec<Reservation>>;
    fn list_for_user(&self, user_id: &str) -> RepoResult<Vec<Reservation>>;
    /// Expires active reservations with `expires_at < now_ms`.
    fn expire_due(&self, now_ms: i64) -> RepoResult<Vec<ReservationId>>;
    /// Active, un-notified reservations whose book has an available copy,
    /// ordered by `reserved_at ASC`.
    fn list_notifiable(&self) -> RepoResult<Vec<Reservation>>;
    /// Returns whether this one reservation still qualifies for notification.
    fn is_notifiable(&self, id: ReservationId) -> RepoResult<bool>;
    fn mark_notified(&self, id: ReservationId) -> RepoResult<bool>;
}

/// SQLite-backed reservation repository.
pub struct SqliteReservationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteReservationRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn query(&self, sql: &str, user_id: Option<&str>) -> RepoResult<Vec<Reservation>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = match user_id {
            Some(user_id) => stmt.query([user_id])?,
            None => stmt.query([])?,
        };
        let mut reservations = Vec::new();
        while let Some(row) = rows.next()? {
            reservations.push(parse_reservation_row(row)?);
        }
        Ok(reservations)
    }
}

impl ReservationRepository for SqliteReservationRepository<'_> {
    fn insert(
        &self,
        user_id: &str,
        book_id: &str,
        snapshot: &BookSnapshot,
        reserved_at: i64,
        expires_at: i64,
    ) -> RepoResult<Reservation> {
        let reservation = Reservation {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            book_id: book_id.to_string(),
            title: snapshot.title.clone(),
            author: snapshot.author.clone(),
            reserved_at,
            expires_at,
            status: ReservationStatus::Active,
            notified: false,
        };

        let inserted = self.conn.execute(
            "INSERT INTO reservations (
                id,
                user_id,
                book_id,
                title,
                author,
                reserved_at,
                expires_at,
                status,
                notified
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'active', ?8);",
            params![
                reservation.id.to_string(),
                reservation.user_id.as_str(),
                reservation.book_id.as_str(),
                reservation.title.as_str(),
                reservation.author.as_str(),
                reservation.reserved_at,
                reservation.expires_at,
                bool_to_int(reservation.notified),
            ],
        );

        match inserted {
            Ok(_) => Ok(reservation),
            Err(err) if is_unique_violation(&err) => Err(RepoError::UniqueViolation(
                "reservations(user_id, book_id) where active",
            )),
            Err(err) => Err(err.into()),
        }
    }

    fn get(&self, id: ReservationId) -> RepoResult<Option<Reservation>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{RESERVATION_SELECT_SQL} WHERE r.id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_reservation_row(row)?));
        }
        Ok(None)
    }

    fn has_active(&self, user_id: &str, book_id: &str) -> RepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM reservations
                WHERE user_id = ?1 AND book_id = ?2 AND status = 'active'
            );",
            [user_id, book_id],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn cancel(&self, id: ReservationId, user_id: &str) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE reservations
             SET status = 'cancelled'
             WHERE id = ?1 AND user_id = ?2 AND status = 'active';",
            params![id.to_string(), user_id],
        )?;
        Ok(changed == 1)
    }

    fn fulfil_active(&self, user_id: &str, book_id: &str) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE reservations
             SET status = 'fulfilled'
             WHERE user_id = ?1 AND book_id = ?2 AND status = 'active';",
            [user_id, book_id],
        )?;
        Ok(changed)
    }

    fn list_active(&self, user_id: &str) -> RepoResult<Vec<Reservation>> {
        self.query(
            &format!(
                "{RESERVATION_SELECT_SQL}
                 WHERE r.user_id = ?1 AND r.status = 'active'
                 ORDER BY r.reserved_at DESC, r.id ASC;"
            ),
            Some(user_id),
        )
    }

    fn list_for_user(&self, user_id: &str) -> RepoResult<Vec<Reservation>> {
        self.query(
            &format!(
                "{RESERVATION_SELECT_SQL}
                 WHERE r.user_id = ?1
                 ORDER BY r.reserved_at DESC, r.id ASC;"
            ),
            Some(user_id),
        )
    }

    fn expire_due(&self, now_ms: i64) -> RepoResult<Vec<ReservationId>> {
        let mut stmt = self.conn.prepare(
            "UPDATE reservations
             SET status = 'expired'
             WHERE status = 'active' AND expires_at < ?1
             RETURNING id;",
        )?;
        let mut rows = stmt.query([now_ms])?;
        let mut expired = Vec::new();
        while let Some(row) = rows.next()? {
            let id_text: String = row.get(0)?;
            expired.push(parse_uuid(&id_text, "reservations.id")?);
        }
        Ok(expired)
    }

    fn list_notifiable(&self) -> RepoResult<Vec<Reservation>> {
        self.query(
            &format!(
                "{RESERVATION_SELECT_SQL}
                 WHERE r.status = 'active'
                   AND r.notified = 0
                   AND EXISTS (
                       SELECT 1
                       FROM book_copies c
                       WHERE c.book_id = r.book_id AND c.status = 'available'
                   )
                 ORDER BY r.reserved_at ASC, r.id ASC;"
            ),
            None,
        )
    }

    fn is_notifiable(&self, id: ReservationId) -> RepoResult<bool> {
        let qualifies: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM reservations r
                WHERE r.id = ?1
                  AND r.status = 'active'
                  AND r.notified = 0
                  AND EXISTS (
                      SELECT 1
                      FROM book_copies c
                      WHERE c.book_id = r.book_id AND c.status = 'available'
                  )
            );",
            [id.to_string()],
            |row| row.get(0),
        )?;
        Ok(qualifies == 1)
    }

    fn mark_notified(&self, id: ReservationId) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE reservations
             SET notified = 1
             WHERE id = ?1 AND status = 'active' AND notified = 0;",
            [id.to_string()],
        )?;
        Ok(changed == 1)
    }
}

fn parse_reservation_row(row: &Row<'_>) -> RepoResult<Reservation> {
    let id_text: String = row.get("id")?;
    let status_text: String = row.get("status")?;
    let status = parse_reservation_status(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid reservation status `{status_text}` in reservations.status"
        ))
    })?;

    Ok(Reservation {
        id: parse_uuid(&id_text, "reservations.id")?,
        user_id: row.get("user_id")?,
        book_id: row.get("book_id")?,
        title: row.get("title")?,
        author: row.get("author")?,
        reserved_at: row.get("reserved_at")?,
        expires_at: row.get("expires_at")?,
        status,
        notified: int_to_bool(row.get("notified")?, "reservations.notified")?,
    })
}

fn parse_reservation_status(value: &str) -> Option<ReservationStatus> {
    match value {
        "active" => Some(ReservationStatus::Active),
        "cancelled" => Some(ReservationStatus::Cancelled),
        "expired" => Some(ReservationStatus::Expired),
        "fulfilled" => Some(ReservationStatus::Fulfilled),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{ReservationRepository, SqliteReservationRepository};
    use crate::db::open_db_in_memory;
    use crate::model::ids::BookSnapshot;
    use crate::model::reservation::ReservationStatus;
    use crate::repo::RepoError;

    fn snapshot() -> BookSnapshot {
        BookSnapshot::new("Dune", "Frank Herbert")
    }

    #[test]
    fn second_active_reservation_hits_unique_index() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteReservationRepository::new(&conn);
        let first = repo.insert("alice", "b1", &snapshot(), 0, 10).unwrap();
        let err = repo.insert("alice", "b1", &snapshot(), 1, 11).unwrap_err();
        assert!(matches!(err, RepoError::UniqueViolation(_)));

        assert!(repo.cancel(first.id, "alice").unwrap());
        repo.insert("alice", "b1", &snapshot(), 2, 12).unwrap();
    }

    #[test]
    fn cancel_requires_owner_and_active_status() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteReservationRepository::new(&conn);
        let reservation = repo.insert("alice", "b1", &snapshot(), 0, 10).unwrap();

        assert!(!repo.cancel(reservation.id, "mallory").unwrap());
        assert!(repo.cancel(reservation.id, "alice").unwrap());
        assert!(!repo.cancel(reservation.id, "alice").unwrap());
        let stored = repo.get(reservation.id).unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Cancelled);
    }

    #[test]
    fn expire_due_is_strict_and_idempotent() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteReservationRepository::new(&conn);
        let due = repo.insert("alice", "b1", &snapshot(), 0, 10).unwrap();
        let boundary = repo.insert("bob", "b1", &snapshot(), 0, 20).unwrap();

        assert_eq!(repo.expire_due(20).unwrap(), vec![due.id]);
        assert!(repo.expire_due(20).unwrap().is_empty());
        assert!(repo.get(boundary.id).unwrap().unwrap().is_active());
    }
}
