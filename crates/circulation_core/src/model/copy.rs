//! Physical copy records.
//!
//! # Invariants
//! - `(book_id, copy_number)` is unique.
//! - `status` only changes through the copy allocator.

use crate::model::ids::{validate_book_id, BookId, CopyId, ValidationError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyStatus {
    /// On the shelf, claimable by the next borrow.
    Available,
    /// Claimed by exactly one open ledger entry of its book.
    Borrowed,
}

/// One physical, independently loanable instance of a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookCopy {
    pub id: CopyId,
    pub book_id: BookId,
    /// Ordinal number, unique per book, starting at 1.
    pub copy_number: u32,
    pub status: CopyStatus,
    pub location: String,
    /// Free-text `YYYY-MM-DD` acquisition date.
    pub acquired_date: Option<String>,
    pub notes: String,
}

/// Input for registering a new copy. New copies start available.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewCopy {
    pub book_id: BookId,
    pub copy_number: u32,
    pub location: String,
    pub acquired_date: Option<String>,
    pub notes: String,
}

impl NewCopy {
    pub fn new(book_id: impl Into<BookId>, copy_number: u32) -> Self {
        Self {
            book_id: book_id.into(),
            copy_number,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_book_id(&self.book_id)?;
        if self.copy_number == 0 {
            return Err(ValidationError::InvalidCopyNumber(self.copy_number));
        }
        Ok(())
    }
}

/// Descriptive attributes an administrator may edit. Status is not one of
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CopyDetails {
    pub location: String,
    pub acquired_date: Option<String>,
    pub notes: String,
}

/// Per-book copy counts. `available + borrowed == total` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyAvailability {
    pub total: u32,
    pub available: u32,
    pub borrowed: u32,
}
