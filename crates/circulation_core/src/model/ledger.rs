//! Circulation ledger entries: one record per borrow-to-return cycle.
//!
//! # Invariants
//! - `status == Borrowed` exactly when `returned_at` is `None`.
//! - Entries are created by a borrow and closed by a return; never deleted.

use crate::clock::epoch_day;
use crate::model::ids::{BookId, LedgerEntryId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Borrowed,
    Returned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub user_id: UserId,
    pub book_id: BookId,
    /// Title snapshot taken at borrow time.
    pub title: String,
    /// Author snapshot taken at borrow time.
    pub author: String,
    pub borrowed_at: i64,
    pub due_at: i64,
    pub returned_at: Option<i64>,
    pub status: LedgerStatus,
}

impl LedgerEntry {
    pub fn is_open(&self) -> bool {
        self.status == LedgerStatus::Borrowed
    }

    /// UTC epoch day of the due date.
    pub fn due_day(&self) -> i64 {
        epoch_day(self.due_at)
    }
}

/// Selects the open entry a return closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseFilter {
    /// Self-service: the caller's oldest open entry for the book.
    UserBook { user_id: UserId, book_id: BookId },
    /// Administrative: one entry by id.
    EntryId(LedgerEntryId),
}
