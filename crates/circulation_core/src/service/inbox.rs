//! Owner-scoped read side of the notification outbox.

use crate::db::Store;
use crate::error::{CirculationError, CirculationResult, Resource};
use crate::model::identity::Identity;
use crate::model::ids::NotificationId;
use crate::model::notification::Notification;
use crate::repo::notification_repo::{NotificationStore, SqliteNotificationStore};
use crate::service::{in_write_transaction, read};
use log::info;
use std::sync::Arc;

/// Maximum notifications returned by one listing.
pub const INBOX_PAGE_LIMIT: u32 = 50;

pub struct NotificationInbox {
    store: Arc<Store>,
}

impl NotificationInbox {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Newest first, capped at [`INBOX_PAGE_LIMIT`].
    pub fn list(&self, caller: &Identity) -> CirculationResult<Vec<Notification>> {
        read(&self.store, |conn| {
            Ok(SqliteNotificationStore::new(conn).list_for_user(&caller.user_id, INBOX_PAGE_LIMIT)?)
        })
    }

    pub fn unread_count(&self, caller: &Identity) -> CirculationResult<u32> {
        read(&self.store, |conn| {
            Ok(SqliteNotificationStore::new(conn).unread_count(&caller.user_id)?)
        })
    }

    pub fn mark_read(&self, caller: &Identity, id: NotificationId) -> CirculationResult<()> {
        let changed = in_write_transaction(&self.store, |tx| {
            Ok(SqliteNotificationStore::new(tx).mark_read(&caller.user_id, id)?)
        })?;
        if !changed {
            return Err(not_found(id));
        }
        Ok(())
    }

    /// Returns how many notifications flipped to read.
    pub fn mark_all_read(&self, caller: &Identity) -> CirculationResult<usize> {
        let changed = in_write_transaction(&self.store, |tx| {
            Ok(SqliteNotificationStore::new(tx).mark_all_read(&caller.user_id)?)
        })?;
        info!(
            "event=mark_all_read module=inbox status=ok user_id={} changed={}",
            caller.user_id, changed
        );
        Ok(changed)
    }

    /// Removes the notification from the caller's inbox. The emission record
    /// is kept, so sweeps never raise the same event again.
    pub fn delete(&self, caller: &Identity, id: NotificationId) -> CirculationResult<()> {
        let deleted = in_write_transaction(&self.store, |tx| {
            Ok(SqliteNotificationStore::new(tx).delete(&caller.user_id, id)?)
        })?;
        if !deleted {
            return Err(not_found(id));
        }
        info!(
            "event=delete_notification module=inbox status=ok user_id={} notification_id={}",
            caller.user_id, id
        );
        Ok(())
    }
}

fn not_found(id: NotificationId) -> CirculationError {
    CirculationError::ResourceNotFound(Resource::Notification(id))
}
