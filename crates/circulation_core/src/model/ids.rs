//! Identifier aliases and request-level validation.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// User identifier resolved by the identity provider.
pub type UserId = String;
/// Book identifier owned by the catalog.
pub type BookId = String;
/// Physical copy identifier.
pub type CopyId = Uuid;
/// Ledger entry identifier.
pub type LedgerEntryId = Uuid;
/// Reservation identifier.
pub type ReservationId = Uuid;
/// Notification identifier.
pub type NotificationId = Uuid;

static EXTERNAL_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:-]{0,63}$").expect("valid external id regex")
});

/// Rejected request input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    InvalidUserId(String),
    InvalidBookId(String),
    BlankTitle,
    BlankAuthor,
    InvalidCopyNumber(u32),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidUserId(value) => write!(f, "invalid user id: `{value}`"),
            Self::InvalidBookId(value) => write!(f, "invalid book id: `{value}`"),
            Self::BlankTitle => write!(f, "title must not be blank"),
            Self::BlankAuthor => write!(f, "author must not be blank"),
            Self::InvalidCopyNumber(value) => {
                write!(f, "copy number must be at least 1, got {value}")
            }
        }
    }
}

impl Error for ValidationError {}

pub fn validate_user_id(value: &str) -> Result<(), ValidationError> {
    if EXTERNAL_ID_RE.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidUserId(value.to_string()))
    }
}

pub fn validate_book_id(value: &str) -> Result<(), ValidationError> {
    if EXTERNAL_ID_RE.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidBookId(value.to_string()))
    }
}

/// Catalog fields denormalized into ledger entries and reservations, so
/// history stays stable when the catalog changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub title: String,
    pub author: String,
}

impl BookSnapshot {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::BlankTitle);
        }
        if self.author.trim().is_empty() {
            return Err(ValidationError::BlankAuthor);
        }
        Ok(())
    }
}
