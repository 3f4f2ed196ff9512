//! Circulation ledger persistence.
//!
//! # Responsibility
//! - Open and close borrow-to-return records.
//! - Serve user/admin listings and the due-date scans used by sweeps.
//!
//! # Invariants
//! - `close` transitions at most one open entry and never touches a
//!   returned one, so a repeated close reports `None` instead of
//!   double-closing.
//! - Listings are ordered by `borrowed_at DESC, id ASC`.

use crate::clock::MS_PER_DAY;
use crate::model::ids::{BookSnapshot, LedgerEntryId};
use crate::model::ledger::{CloseFilter, LedgerEntry, LedgerStatus};
use crate::repo::{parse_uuid, RepoError, RepoResult};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

const LEDGER_COLUMNS: &str = "id,
    user_id,
    book_id,
    title,
    author,
    borrowed_at,
    due_at,
    returned_at,
    status";

const LISTING_ORDER: &str = " ORDER BY borrowed_at DESC, id ASC";

/// Ledger contract used by the allocator, listings and sweeps.
pub trait Ledger {
    /// Records a new open entry. The caller has already claimed a copy.
    fn open(
        &self,
        user_id: &str,
        book_id: &str,
        snapshot: &BookSnapshot,
        borrowed_at: i64,
        due_at: i64,
    ) -> RepoResult<LedgerEntry>;
    /// Closes the open entry matched by `filter`; `None` when none matched.
    fn close(&self, filter: &CloseFilter, returned_at: i64) -> RepoResult<Option<LedgerEntry>>;
    fn get(&self, id: LedgerEntryId) -> RepoResult<Option<LedgerEntry>>;
    fn list_open(&self, user_id: &str) -> RepoResult<Vec<LedgerEntry>>;
    fn list_all(&self, user_id: &str) -> RepoResult<Vec<LedgerEntry>>;
    fn list_open_admin(&self) -> RepoResult<Vec<LedgerEntry>>;
    fn list_all_admin(&self) -> RepoResult<Vec<LedgerEntry>>;
    fn count_open_for_book(&self, book_id: &str) -> RepoResult<u32>;
    /// Open entries whose due day is strictly before `today`.
    fn list_overdue(&self, today: i64) -> RepoResult<Vec<LedgerEntry>>;
    /// Open entries whose due day equals `day`.
    fn list_due_on(&self, day: i64) -> RepoResult<Vec<LedgerEntry>>;
    /// Title and author recorded on the book's most recent loan.
    fn latest_snapshot_for_book(&self, book_id: &str) -> RepoResult<Option<BookSnapshot>>;
}

/// SQLite-backed circulation ledger.
pub struct SqliteLedger<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteLedger<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn query_entries(&self, filter_sql: &str, bind_values: Vec<Value>) -> RepoResult<Vec<LedgerEntry>> {
        let sql = format!("SELECT {LEDGER_COLUMNS} FROM ledger_entries {filter_sql}{LISTING_ORDER};");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(parse_entry_row(row)?);
        }
        Ok(entries)
    }
}

impl Ledger for SqliteLedger<'_> {
    fn open(
        &self,
        user_id: &str,
        book_id: &str,
        snapshot: &BookSnapshot,
        borrowed_at: i64,
        due_at: i64,
    ) -> RepoResult<LedgerEntry> {
        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            book_id: book_id.to_string(),
            title: snapshot.title.clone(),
            author: snapshot.author.clone(),
            borrowed_at,
            due_at,
            returned_at: None,
            status: LedgerStatus::Borrowed,
        };

        self.conn.execute(
            "INSERT INTO ledger_entries (
                id,
                user_id,
                book_id,
                title,
                author,
                borrowed_at,
                due_at,
                returned_at,
                status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, 'borrowed');",
            params![
                entry.id.to_string(),
                entry.user_id.as_str(),
                entry.book_id.as_str(),
                entry.title.as_str(),
                entry.author.as_str(),
                entry.borrowed_at,
                entry.due_at,
            ],
        )?;

        Ok(entry)
    }

    fn close(&self, filter: &CloseFilter, returned_at: i64) -> RepoResult<Option<LedgerEntry>> {
        let closed = match filter {
            CloseFilter::UserBook { user_id, book_id } => self
                .conn
                .query_row(
                    &format!(
                        "UPDATE ledger_entries
                         SET status = 'returned', returned_at = ?3
                         WHERE id = (
                             SELECT id
                             FROM ledger_entries
                             WHERE user_id = ?1 AND book_id = ?2 AND status = 'borrowed'
                             ORDER BY borrowed_at ASC, id ASC
                             LIMIT 1
                         )
                         RETURNING {LEDGER_COLUMNS};"
                    ),
                    params![user_id.as_str(), book_id.as_str(), returned_at],
                    |row| Ok(parse_entry_row(row)),
                )
                .optional()?,
            CloseFilter::EntryId(id) => self
                .conn
                .query_row(
                    &format!(
                        "UPDATE ledger_entries
                         SET status = 'returned', returned_at = ?2
                         WHERE id = ?1 AND status = 'borrowed'
                         RETURNING {LEDGER_COLUMNS};"
                    ),
                    params![id.to_string(), returned_at],
                    |row| Ok(parse_entry_row(row)),
                )
                .optional()?,
        };

        closed.transpose()
    }

    fn get(&self, id: LedgerEntryId) -> RepoResult<Option<LedgerEntry>> {
        let mut entries =
            self.query_entries("WHERE id = ?", vec![Value::Text(id.to_string())])?;
        Ok(entries.pop())
    }

    fn list_open(&self, user_id: &str) -> RepoResult<Vec<LedgerEntry>> {
        self.query_entries(
            "WHERE user_id = ? AND status = 'borrowed'",
            vec![Value::Text(user_id.to_string())],
        )
    }

    fn list_all(&self, user_id: &str) -> RepoResult<Vec<LedgerEntry>> {
        self.query_entries("WHERE user_id = ?", vec![Value::Text(user_id.to_string())])
    }

    fn list_open_admin(&self) -> RepoResult<Vec<LedgerEntry>> {
        self.query_entries("WHERE status = 'borrowed'", Vec::new())
    }

    fn list_all_admin(&self) -> RepoResult<Vec<LedgerEntry>> {
        self.query_entries("", Vec::new())
    }

    fn count_open_for_book(&self, book_id: &str) -> RepoResult<u32> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM ledger_entries WHERE book_id = ?1 AND status = 'borrowed';",
            [book_id],
            |row| row.get::<_, u32>(0),
        )?;
        Ok(count)
    }

    fn list_overdue(&self, today: i64) -> RepoResult<Vec<LedgerEntry>> {
        // Due day is derived in SQL with the same floor division as `epoch_day`
        // for the non-negative timestamps the ledger stores.
        self.query_entries(
            "WHERE status = 'borrowed' AND (due_at / ?) < ?",
            vec![Value::Integer(MS_PER_DAY), Value::Integer(today)],
        )
    }

    fn list_due_on(&self, day: i64) -> RepoResult<Vec<LedgerEntry>> {
        self.query_entries(
            "WHERE status = 'borrowed' AND (due_at / ?) = ?",
            vec![Value::Integer(MS_PER_DAY), Value::Integer(day)],
        )
    }

    fn latest_snapshot_for_book(&self, book_id: &str) -> RepoResult<Option<BookSnapshot>> {
        let snapshot = self
            .conn
            .query_row(
                "SELECT title, author FROM ledger_entries
                 WHERE book_id = ?1
                 ORDER BY borrowed_at DESC, id ASC
                 LIMIT 1;",
                [book_id],
                |row| Ok(BookSnapshot::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(snapshot)
    }
}

fn parse_entry_row(row: &Row<'_>) -> RepoResult<LedgerEntry> {
    let id_text: String = row.get("id")?;
    let status_text: String = row.get("status")?;
    let status = parse_ledger_status(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid ledger status `{status_text}` in ledger_entries.status"
        ))
    })?;
    let returned_at: Option<i64> = row.get("returned_at")?;
    if (status == LedgerStatus::Borrowed) != returned_at.is_none() {
        return Err(RepoError::InvalidData(format!(
            "ledger entry `{id_text}` has status `{status_text}` inconsistent with returned_at"
        )));
    }

    Ok(LedgerEntry {
        id: parse_uuid(&id_text, "ledger_entries.id")?,
        user_id: row.get("user_id")?,
        book_id: row.get("book_id")?,
        title: row.get("title")?,
        author: row.get("author")?,
        borrowed_at: row.get("borrowed_at")?,
        due_at: row.get("due_at")?,
        returned_at,
        status,
    })
}

fn parse_ledger_status(value: &str) -> Option<LedgerStatus> {
    match value {
        "borrowed" => Some(LedgerStatus::Borrowed),
        "returned" => Some(LedgerStatus::Returned),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{Ledger, SqliteLedger};
    use crate::clock::MS_PER_DAY;
    use crate::db::open_db_in_memory;
    use crate::model::ids::BookSnapshot;
    use crate::model::ledger::{CloseFilter, LedgerStatus};

    fn snapshot() -> BookSnapshot {
        BookSnapshot::new("Dune", "Frank Herbert")
    }

    #[test]
    fn close_by_user_book_closes_oldest_open_entry_once() {
        let conn = open_db_in_memory().unwrap();
        let ledger = SqliteLedger::new(&conn);
        let older = ledger.open("alice", "b1", &snapshot(), 10, 100).unwrap();
        let newer = ledger.open("alice", "b1", &snapshot(), 20, 200).unwrap();

        let filter = CloseFilter::UserBook {
            user_id: "alice".to_string(),
            book_id: "b1".to_string(),
        };
        let closed = ledger.close(&filter, 30).unwrap().unwrap();
        assert_eq!(closed.id, older.id);
        assert_eq!(closed.status, LedgerStatus::Returned);
        assert_eq!(closed.returned_at, Some(30));

        let open = ledger.list_open("alice").unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, newer.id);

        ledger.close(&filter, 40).unwrap().unwrap();
        assert!(ledger.close(&filter, 50).unwrap().is_none());
    }

    #[test]
    fn close_by_id_never_double_closes() {
        let conn = open_db_in_memory().unwrap();
        let ledger = SqliteLedger::new(&conn);
        let entry = ledger.open("bob", "b2", &snapshot(), 10, 100).unwrap();

        let filter = CloseFilter::EntryId(entry.id);
        assert!(ledger.close(&filter, 20).unwrap().is_some());
        assert!(ledger.close(&filter, 30).unwrap().is_none());
        let stored = ledger.get(entry.id).unwrap().unwrap();
        assert_eq!(stored.returned_at, Some(20));
    }

    #[test]
    fn due_scans_compare_calendar_days() {
        let conn = open_db_in_memory().unwrap();
        let ledger = SqliteLedger::new(&conn);
        let day = |d: i64| d * MS_PER_DAY;
        let overdue = ledger.open("u1", "b1", &snapshot(), 0, day(9) + 5).unwrap();
        let due_today = ledger.open("u2", "b1", &snapshot(), 0, day(10) + 1).unwrap();
        let due_in_three = ledger.open("u3", "b1", &snapshot(), 0, day(13) + 7).unwrap();

        let overdue_ids: Vec<_> = ledger.list_overdue(10).unwrap().iter().map(|e| e.id).collect();
        assert_eq!(overdue_ids, vec![overdue.id]);

        let soon_ids: Vec<_> = ledger.list_due_on(13).unwrap().iter().map(|e| e.id).collect();
        assert_eq!(soon_ids, vec![due_in_three.id]);
        assert!(ledger.list_due_on(10).unwrap().iter().any(|e| e.id == due_today.id));
    }

    #[test]
    fn latest_snapshot_follows_newest_loan_of_the_book() {
        let conn = open_db_in_memory().unwrap();
        let ledger = SqliteLedger::new(&conn);
        assert!(ledger.latest_snapshot_for_book("b1").unwrap().is_none());

        ledger.open("u1", "b1", &snapshot(), 10, 100).unwrap();
        let renamed = BookSnapshot::new("Dune (2nd ed.)", "Frank Herbert");
        ledger.open("u2", "b1", &renamed, 20, 200).unwrap();
        ledger.open("u3", "b2", &BookSnapshot::new("Emma", "Jane Austen"), 30, 300).unwrap();

        assert_eq!(ledger.latest_snapshot_for_book("b1").unwrap(), Some(renamed));
    }
}
