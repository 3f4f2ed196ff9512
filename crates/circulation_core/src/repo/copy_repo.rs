//! Copy registry: authoritative status of every physical copy.
//!
//! # Responsibility
//! - Count, claim and release copies of a book.
//! - Register, edit and remove copies for inventory administration.
//!
//! # Invariants
//! - `claim_one` and `release_one` flip exactly one row in a single
//!   statement; callers run them inside a write-locked transaction.
//! - `delete_copy` never removes a borrowed copy.

use crate::model::copy::{BookCopy, CopyAvailability, CopyDetails, CopyStatus, NewCopy};
use crate::model::ids::CopyId;
use crate::repo::{is_unique_violation, parse_uuid, RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

const COPY_SELECT_SQL: &str = "SELECT
    id,
    book_id,
    copy_number,
    status,
    location,
    acquired_date,
    notes
FROM book_copies";

/// Registry contract used by the allocator and inventory administration.
pub trait CopyRegistry {
    fn count_available(&self, book_id: &str) -> RepoResult<u32>;
    fn availability(&self, book_id: &str) -> RepoResult<CopyAvailability>;
    /// Flips one available copy to borrowed; `None` when none qualify.
    fn claim_one(&self, book_id: &str, now_ms: i64) -> RepoResult<Option<CopyId>>;
    /// Flips one borrowed copy back to available; `None` when none qualify.
    fn release_one(&self, book_id: &str, now_ms: i64) -> RepoResult<Option<CopyId>>;
    fn add_copy(&self, copy: &NewCopy, now_ms: i64) -> RepoResult<BookCopy>;
    fn get_copy(&self, id: CopyId) -> RepoResult<Option<BookCopy>>;
    fn list_copies(&self, book_id: &str) -> RepoResult<Vec<BookCopy>>;
    fn list_all_copies(&self) -> RepoResult<Vec<BookCopy>>;
    fn update_details(&self, id: CopyId, details: &CopyDetails, now_ms: i64) -> RepoResult<bool>;
    /// Deletes an available copy; returns `false` when absent or borrowed.
    fn delete_copy(&self, id: CopyId) -> RepoResult<bool>;
}

/// SQLite-backed copy registry.
pub struct SqliteCopyRegistry<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCopyRegistry<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl CopyRegistry for SqliteCopyRegistry<'_> {
    fn count_available(&self, book_id: &str) -> RepoResult<u32> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM book_copies WHERE book_id = ?1 AND status = 'available';",
            [book_id],
            |row| row.get::<_, u32>(0),
        )?;
        Ok(count)
    }

    fn availability(&self, book_id: &str) -> RepoResult<CopyAvailability> {
        let availability = self.conn.query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'available' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'borrowed' THEN 1 ELSE 0 END), 0)
             FROM book_copies
             WHERE book_id = ?1;",
            [book_id],
            |row| {
                Ok(CopyAvailability {
                    total: row.get(0)?,
                    available: row.get(1)?,
                    borrowed: row.get(2)?,
                })
            },
        )?;
        Ok(availability)
    }

    fn claim_one(&self, book_id: &str, now_ms: i64) -> RepoResult<Option<CopyId>> {
        let claimed = self
            .conn
            .query_row(
                "UPDATE book_copies
                 SET status = 'borrowed', updated_at = ?2
                 WHERE id = (
                     SELECT id
                     FROM book_copies
                     WHERE book_id = ?1 AND status = 'available'
                     ORDER BY copy_number ASC
                     LIMIT 1
                 )
                 RETURNING id;",
                params![book_id, now_ms],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        claimed
            .map(|id| parse_uuid(&id, "book_copies.id"))
            .transpose()
    }

    fn release_one(&self, book_id: &str, now_ms: i64) -> RepoResult<Option<CopyId>> {
        let released = self
            .conn
            .query_row(
                "UPDATE book_copies
                 SET status = 'available', updated_at = ?2
                 WHERE id = (
                     SELECT id
                     FROM book_copies
                     WHERE book_id = ?1 AND status = 'borrowed'
                     ORDER BY copy_number ASC
                     LIMIT 1
                 )
                 RETURNING id;",
                params![book_id, now_ms],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        released
            .map(|id| parse_uuid(&id, "book_copies.id"))
            .transpose()
    }

    fn add_copy(&self, copy: &NewCopy, now_ms: i64) -> RepoResult<BookCopy> {
        let id = Uuid::new_v4();
        let inserted = self.conn.execute(
            "INSERT INTO book_copies (
                id,
                book_id,
                copy_number,
                status,
                location,
                acquired_date,
                notes,
                updated_at
            ) VALUES (?1, ?2, ?3, 'available', ?4, ?5, ?6, ?7);",
            params![
                id.to_string(),
                copy.book_id.as_str(),
                copy.copy_number,
                copy.location.as_str(),
                copy.acquired_date.as_deref(),
                copy.notes.as_str(),
                now_ms,
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(RepoError::UniqueViolation("book_copies(book_id, copy_number)"));
            }
            Err(err) => return Err(err.into()),
        }

        Ok(BookCopy {
            id,
            book_id: copy.book_id.clone(),
            copy_number: copy.copy_number,
            status: CopyStatus::Available,
            location: copy.location.clone(),
            acquired_date: copy.acquired_date.clone(),
            notes: copy.notes.clone(),
        })
    }

    fn get_copy(&self, id: CopyId) -> RepoResult<Option<BookCopy>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{COPY_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_copy_row(row)?));
        }
        Ok(None)
    }

    fn list_copies(&self, book_id: &str) -> RepoResult<Vec<BookCopy>> {
        let mut stmt = self.conn.prepare(&format!(
            "{COPY_SELECT_SQL} WHERE book_id = ?1 ORDER BY copy_number ASC;"
        ))?;
        let mut rows = stmt.query([book_id])?;
        let mut copies = Vec::new();
        while let Some(row) = rows.next()? {
            copies.push(parse_copy_row(row)?);
        }
        Ok(copies)
    }

    fn list_all_copies(&self) -> RepoResult<Vec<BookCopy>> {
        let mut stmt = self.conn.prepare(&format!(
            "{COPY_SELECT_SQL} ORDER BY book_id ASC, copy_number ASC;"
        ))?;
        let mut rows = stmt.query([])?;
        let mut copies = Vec::new();
        while let Some(row) = rows.next()? {
            copies.push(parse_copy_row(row)?);
        }
        Ok(copies)
    }

    fn update_details(&self, id: CopyId, details: &CopyDetails, now_ms: i64) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE book_copies
             SET
                location = ?2,
                acquired_date = ?3,
                notes = ?4,
                updated_at = ?5
             WHERE id = ?1;",
            params![
                id.to_string(),
                details.location.as_str(),
                details.acquired_date.as_deref(),
                details.notes.as_str(),
                now_ms,
            ],
        )?;
        Ok(changed == 1)
    }

    fn delete_copy(&self, id: CopyId) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM book_copies WHERE id = ?1 AND status = 'available';",
            [id.to_string()],
        )?;
        Ok(changed == 1)
    }
}

/// Returns whether any copy of the book is registered.
pub fn book_is_registered(conn: &Connection, book_id: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM book_copies WHERE book_id = ?1);",
        [book_id],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn parse_copy_row(row: &Row<'_>) -> RepoResult<BookCopy> {
    let id_text: String = row.get("id")?;
    let status_text: String = row.get("status")?;
    let status = parse_copy_status(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid copy status `{status_text}` in book_copies.status"
        ))
    })?;

    Ok(BookCopy {
        id: parse_uuid(&id_text, "book_copies.id")?,
        book_id: row.get("book_id")?,
        copy_number: row.get("copy_number")?,
        status,
        location: row.get("location")?,
        acquired_date: row.get("acquired_date")?,
        notes: row.get("notes")?,
    })
}

fn parse_copy_status(value: &str) -> Option<CopyStatus> {
    match value {
        "available" => Some(CopyStatus::Available),
        "borrowed" => Some(CopyStatus::Borrowed),
        _ => None,
    }
}
