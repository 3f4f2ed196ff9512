//! Notification events emitted by the core.
//!
//! # Invariants
//! - At most one event per `(user_id, kind, related_id)` is ever stored.

use crate::model::ids::{NotificationId, UserId};
use crate::model::ledger::LedgerEntry;
use crate::model::reservation::Reservation;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Related id is a ledger entry.
    Overdue,
    /// Related id is a ledger entry.
    DueSoon,
    /// Related id is a reservation.
    ReservationAvailable,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Overdue => "overdue",
            Self::DueSoon => "due_soon",
            Self::ReservationAvailable => "reservation_available",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "overdue" => Some(Self::Overdue),
            "due_soon" => Some(Self::DueSoon),
            "reservation_available" => Some(Self::ReservationAvailable),
            _ => None,
        }
    }
}

/// Event handed to the notification store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub user_id: UserId,
    pub kind: NotificationKind,
    /// Subject line.
    pub title: String,
    pub message: String,
    pub related_id: Uuid,
}

impl NotificationEvent {
    pub fn overdue(entry: &LedgerEntry) -> Self {
        Self {
            user_id: entry.user_id.clone(),
            kind: NotificationKind::Overdue,
            title: "Book overdue".to_string(),
            message: format!(
                "\"{}\" is overdue. Please return it as soon as possible.",
                entry.title
            ),
            related_id: entry.id,
        }
    }

    pub fn due_soon(entry: &LedgerEntry, lead_days: u32) -> Self {
        Self {
            user_id: entry.user_id.clone(),
            kind: NotificationKind::DueSoon,
            title: "Return due soon".to_string(),
            message: format!("\"{}\" is due back in {lead_days} days.", entry.title),
            related_id: entry.id,
        }
    }

    pub fn reservation_available(reservation: &Reservation) -> Self {
        Self {
            user_id: reservation.user_id.clone(),
            kind: NotificationKind::ReservationAvailable,
            title: "Reserved book available".to_string(),
            message: format!(
                "\"{}\" can be borrowed now. Copies are lent first come, first served.",
                reservation.title
            ),
            related_id: reservation.id,
        }
    }
}

/// Stored notification as read back from the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub related_id: Uuid,
    pub is_read: bool,
    pub created_at: i64,
}
