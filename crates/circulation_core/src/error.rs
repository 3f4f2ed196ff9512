//! Use-case error taxonomy shared by every circulation service.
//!
//! # Invariants
//! - Callers see typed failures, never raw storage error text.
//! - Every variant maps onto exactly one stable [`Outcome`].

use crate::db::DbError;
use crate::model::identity::Role;
use crate::model::ids::{
    BookId, CopyId, LedgerEntryId, NotificationId, ReservationId, ValidationError,
};
use crate::repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type CirculationResult<T> = Result<T, CirculationError>;

/// Entity a not-found failure refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Book(BookId),
    Copy(CopyId),
    LedgerEntry(LedgerEntryId),
    Reservation(ReservationId),
    Notification(NotificationId),
}

impl Display for Resource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Book(id) => write!(f, "book {id}"),
            Self::Copy(id) => write!(f, "copy {id}"),
            Self::LedgerEntry(id) => write!(f, "ledger entry {id}"),
            Self::Reservation(id) => write!(f, "reservation {id}"),
            Self::Notification(id) => write!(f, "notification {id}"),
        }
    }
}

/// Stable caller-facing outcome class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Unauthenticated,
    Forbidden,
    Invalid,
    NotFound,
    Conflict,
    Transient,
}

#[derive(Debug)]
pub enum CirculationError {
    /// Missing, invalid or expired session.
    NotAuthenticated,
    /// Authenticated, but the role check failed.
    NotAuthorized { required: Role },
    /// Malformed request input.
    Validation(ValidationError),
    ResourceNotFound(Resource),
    /// Every copy of the book is currently borrowed.
    NoAvailableCopy(BookId),
    /// The user already holds an active reservation for the book.
    AlreadyReserved { book_id: BookId },
    /// Reservation rejected because the book can be borrowed right now.
    ReservationNotNeeded { book_id: BookId, available: u32 },
    /// The caller has no open loan of the book.
    NothingToReturn { book_id: BookId },
    /// A borrowed copy cannot be removed from inventory.
    CopyInUse(CopyId),
    DuplicateCopy { book_id: BookId, copy_number: u32 },
    /// Connection, lock or transaction failure; the whole protocol rolled
    /// back and the caller may retry.
    TransientStoreFailure(RepoError),
}

impl CirculationError {
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::NotAuthenticated => Outcome::Unauthenticated,
            Self::NotAuthorized { .. } => Outcome::Forbidden,
            Self::Validation(_) => Outcome::Invalid,
            Self::ResourceNotFound(_) | Self::NothingToReturn { .. } => Outcome::NotFound,
            Self::NoAvailableCopy(_)
            | Self::AlreadyReserved { .. }
            | Self::ReservationNotNeeded { .. }
            | Self::CopyInUse(_)
            | Self::DuplicateCopy { .. } => Outcome::Conflict,
            Self::TransientStoreFailure(_) => Outcome::Transient,
        }
    }

    /// Short stable code for log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "not_authenticated",
            Self::NotAuthorized { .. } => "not_authorized",
            Self::Validation(_) => "validation_error",
            Self::ResourceNotFound(_) => "resource_not_found",
            Self::NoAvailableCopy(_) => "no_available_copy",
            Self::AlreadyReserved { .. } => "already_reserved",
            Self::ReservationNotNeeded { .. } => "reservation_not_needed",
            Self::NothingToReturn { .. } => "nothing_to_return",
            Self::CopyInUse(_) => "copy_in_use",
            Self::DuplicateCopy { .. } => "duplicate_copy",
            Self::TransientStoreFailure(_) => "transient_store_failure",
        }
    }
}

impl Display for CirculationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAuthenticated => write!(f, "authentication required"),
            Self::NotAuthorized { required } => {
                write!(f, "role `{}` required", required.as_str())
            }
            Self::Validation(err) => write!(f, "{err}"),
            Self::ResourceNotFound(resource) => write!(f, "{resource} not found"),
            Self::NoAvailableCopy(book_id) => write!(f, "no available copy of book {book_id}"),
            Self::AlreadyReserved { book_id } => {
                write!(f, "book {book_id} is already reserved by this user")
            }
            Self::ReservationNotNeeded { book_id, available } => write!(
                f,
                "book {book_id} has {available} available copies; borrow it instead"
            ),
            Self::NothingToReturn { book_id } => write!(f, "no open loan of book {book_id}"),
            Self::CopyInUse(id) => write!(f, "copy {id} is borrowed"),
            Self::DuplicateCopy {
                book_id,
                copy_number,
            } => write!(f, "book {book_id} already has copy number {copy_number}"),
            Self::TransientStoreFailure(err) => write!(f, "store failure: {err}"),
        }
    }
}

impl Error for CirculationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::TransientStoreFailure(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for CirculationError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for CirculationError {
    fn from(value: RepoError) -> Self {
        Self::TransientStoreFailure(value)
    }
}

impl From<DbError> for CirculationError {
    fn from(value: DbError) -> Self {
        Self::TransientStoreFailure(RepoError::Db(value))
    }
}

impl From<rusqlite::Error> for CirculationError {
    fn from(value: rusqlite::Error) -> Self {
        Self::TransientStoreFailure(RepoError::from(value))
    }
}
