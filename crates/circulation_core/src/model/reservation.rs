//! Reservation queue records.
//!
//! # Invariants
//! - A user holds at most one `Active` reservation per book.
//! - Reservations leave the queue by status transition only.

use crate::model::ids::{BookId, ReservationId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Waiting for a copy.
    Active,
    /// Withdrawn by its owner.
    Cancelled,
    /// `expires_at` passed while still active.
    Expired,
    /// The owner borrowed the book while the reservation was active.
    Fulfilled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub user_id: UserId,
    pub book_id: BookId,
    pub title: String,
    pub author: String,
    pub reserved_at: i64,
    pub expires_at: i64,
    pub status: ReservationStatus,
    /// Set once a `reservation_available` event was emitted.
    pub notified: bool,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }
}
