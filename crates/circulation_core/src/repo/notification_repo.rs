//! Notification outbox persistence.
//!
//! # Responsibility
//! - Store events emitted by sweeps for the delivery collaborator.
//! - Serve the owner-scoped inbox reads and read-state updates.
//!
//! # Invariants
//! - `(user_id, kind, related_id)` is unique; `insert` reports `false`
//!   instead of storing a duplicate.
//! - Every inbox mutation is constrained to the owner's rows.
//! - Deleting from the inbox only hides a row. Hidden rows still count for
//!   `exists` and the unique index, so a deleted event is never re-emitted.

use crate::model::ids::NotificationId;
use crate::model::notification::{Notification, NotificationEvent, NotificationKind};
use crate::repo::{int_to_bool, parse_uuid, RepoError, RepoResult};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

/// Outbox contract used by sweeps and the inbox service.
pub trait NotificationStore {
    fn exists(&self, user_id: &str, kind: NotificationKind, related_id: Uuid) -> RepoResult<bool>;
    /// Stores the event; `false` when an identical triple already exists.
    fn insert(&self, event: &NotificationEvent, created_at: i64) -> RepoResult<bool>;
    fn list_for_user(&self, user_id: &str, limit: u32) -> RepoResult<Vec<Notification>>;
    fn unread_count(&self, user_id: &str) -> RepoResult<u32>;
    fn mark_read(&self, user_id: &str, id: NotificationId) -> RepoResult<bool>;
    fn mark_all_read(&self, user_id: &str) -> RepoResult<usize>;
    /// Hides the row from the inbox; `false` when absent or already hidden.
    fn delete(&self, user_id: &str, id: NotificationId) -> RepoResult<bool>;
}

/// SQLite-backed notification outbox.
pub struct SqliteNotificationStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteNotificationStore<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl NotificationStore for SqliteNotificationStore<'_> {
    fn exists(&self, user_id: &str, kind: NotificationKind, related_id: Uuid) -> RepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM notifications
                WHERE user_id = ?1 AND kind = ?2 AND related_id = ?3
            );",
            params![user_id, kind.as_str(), related_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn insert(&self, event: &NotificationEvent, created_at: i64) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO notifications (
                id,
                user_id,
                kind,
                title,
                message,
                related_id,
                is_read,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7);",
            params![
                Uuid::new_v4().to_string(),
                event.user_id.as_str(),
                event.kind.as_str(),
                event.title.as_str(),
                event.message.as_str(),
                event.related_id.to_string(),
                created_at,
            ],
        )?;
        Ok(changed == 1)
    }

    fn list_for_user(&self, user_id: &str, limit: u32) -> RepoResult<Vec<Notification>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, kind, title, message, related_id, is_read, created_at
             FROM notifications
             WHERE user_id = ?1 AND is_deleted = 0
             ORDER BY created_at DESC, id ASC
             LIMIT ?2;",
        )?;
        let mut rows = stmt.query(params![user_id, limit])?;
        let mut notifications = Vec::new();
        while let Some(row) = rows.next()? {
            notifications.push(parse_notification_row(row)?);
        }
        Ok(notifications)
    }

    fn unread_count(&self, user_id: &str) -> RepoResult<u32> {
        let count = self.conn.query_row(
            "SELECT COUNT(*)
             FROM notifications
             WHERE user_id = ?1 AND is_read = 0 AND is_deleted = 0;",
            [user_id],
            |row| row.get::<_, u32>(0),
        )?;
        Ok(count)
    }

    fn mark_read(&self, user_id: &str, id: NotificationId) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE notifications
             SET is_read = 1
             WHERE id = ?1 AND user_id = ?2 AND is_deleted = 0;",
            params![id.to_string(), user_id],
        )?;
        Ok(changed == 1)
    }

    fn mark_all_read(&self, user_id: &str) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE notifications
             SET is_read = 1
             WHERE user_id = ?1 AND is_read = 0 AND is_deleted = 0;",
            [user_id],
        )?;
        Ok(changed)
    }

    fn delete(&self, user_id: &str, id: NotificationId) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE notifications
             SET is_deleted = 1
             WHERE id = ?1 AND user_id = ?2 AND is_deleted = 0;",
            params![id.to_string(), user_id],
        )?;
        Ok(changed == 1)
    }
}

fn parse_notification_row(row: &Row<'_>) -> RepoResult<Notification> {
    let id_text: String = row.get("id")?;
    let related_text: String = row.get("related_id")?;
    let kind_text: String = row.get("kind")?;
    let kind = NotificationKind::parse(&kind_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid notification kind `{kind_text}` in notifications.kind"
        ))
    })?;

    Ok(Notification {
        id: parse_uuid(&id_text, "notifications.id")?,
        user_id: row.get("user_id")?,
        kind,
        title: row.get("title")?,
        message: row.get("message")?,
        related_id: parse_uuid(&related_text, "notifications.related_id")?,
        is_read: int_to_bool(row.get("is_read")?, "notifications.is_read")?,
        created_at: row.get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::{NotificationStore, SqliteNotificationStore};
    use crate::db::open_db_in_memory;
    use crate::model::notification::{NotificationEvent, NotificationKind};
    use uuid::Uuid;

    fn event(user: &str, kind: NotificationKind, related_id: Uuid) -> NotificationEvent {
        NotificationEvent {
            user_id: user.to_string(),
            kind,
            title: "subject".to_string(),
            message: "body".to_string(),
            related_id,
        }
    }

    #[test]
    fn duplicate_triple_is_ignored() {
        let conn = open_db_in_memory().unwrap();
        let store = SqliteNotificationStore::new(&conn);
        let related = Uuid::new_v4();

        assert!(store.insert(&event("alice", NotificationKind::Overdue, related), 1).unwrap());
        assert!(!store.insert(&event("alice", NotificationKind::Overdue, related), 2).unwrap());
        assert!(store.insert(&event("alice", NotificationKind::DueSoon, related), 3).unwrap());
        assert!(store.exists("alice", NotificationKind::Overdue, related).unwrap());
        assert_eq!(store.unread_count("alice").unwrap(), 2);
    }

    #[test]
    fn inbox_mutations_are_owner_scoped() {
        let conn = open_db_in_memory().unwrap();
        let store = SqliteNotificationStore::new(&conn);
        store
            .insert(&event("alice", NotificationKind::Overdue, Uuid::new_v4()), 1)
            .unwrap();
        let stored = store.list_for_user("alice", 50).unwrap().remove(0);

        assert!(!store.mark_read("bob", stored.id).unwrap());
        assert!(!store.delete("bob", stored.id).unwrap());
        assert!(store.mark_read("alice", stored.id).unwrap());
        assert_eq!(store.unread_count("alice").unwrap(), 0);
        assert!(store.delete("alice", stored.id).unwrap());
        assert!(store.list_for_user("alice", 50).unwrap().is_empty());
        assert!(!store.delete("alice", stored.id).unwrap());
    }

    #[test]
    fn hidden_row_still_blocks_reemission() {
        let conn = open_db_in_memory().unwrap();
        let store = SqliteNotificationStore::new(&conn);
        let related = Uuid::new_v4();
        store
            .insert(&event("alice", NotificationKind::Overdue, related), 1)
            .unwrap();
        let stored = store.list_for_user("alice", 50).unwrap().remove(0);
        store.mark_all_read("alice").unwrap();
        assert!(store.delete("alice", stored.id).unwrap());

        assert!(store.exists("alice", NotificationKind::Overdue, related).unwrap());
        assert!(!store.insert(&event("alice", NotificationKind::Overdue, related), 2).unwrap());
        assert_eq!(store.unread_count("alice").unwrap(), 0);
        assert!(!store.mark_read("alice", stored.id).unwrap());
    }
}
