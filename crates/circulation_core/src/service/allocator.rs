//! Copy allocator: the borrow/return state machine.
//!
//! # Responsibility
//! - Claim a copy and open a ledger entry as one atomic borrow.
//! - Close a ledger entry and release a copy as one atomic return.
//! - Serve ledger listings for users and administrators.
//!
//! # Invariants
//! - This is the only writer of copy status.
//! - Per book, `borrowed copies == open ledger entries` after every commit.
//! - Any failure after the claim rolls the whole transaction back, so a
//!   failed borrow leaves no trace.

use crate::clock::{add_days, Clock};
use crate::config::CirculationPolicy;
use crate::db::Store;
use crate::error::{CirculationError, CirculationResult, Resource};
use crate::model::copy::CopyAvailability;
use crate::model::identity::Identity;
use crate::model::ids::{
    validate_book_id, validate_user_id, BookId, BookSnapshot, CopyId, LedgerEntryId,
};
use crate::model::ledger::{CloseFilter, LedgerEntry};
use crate::repo::copy_repo::{book_is_registered, CopyRegistry, SqliteCopyRegistry};
use crate::repo::ledger_repo::{Ledger, SqliteLedger};
use crate::repo::reservation_repo::{ReservationRepository, SqliteReservationRepository};
use crate::repo::RepoError;
use crate::service::auth_guard::require_admin;
use crate::service::{in_write_transaction, read};
use log::{info, warn};
use std::sync::Arc;

/// Progress of one borrow attempt, reported in failure logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorrowStage {
    Requested,
    CopyClaimed,
    LedgerOpened,
    Committed,
}

impl BorrowStage {
    fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::CopyClaimed => "copy_claimed",
            Self::LedgerOpened => "ledger_opened",
            Self::Committed => "committed",
        }
    }
}

/// What a caller asks to borrow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorrowRequest {
    pub book_id: BookId,
    /// Catalog title/author, denormalized into the ledger entry.
    pub snapshot: BookSnapshot,
}

impl BorrowRequest {
    pub fn new(book_id: impl Into<BookId>, snapshot: BookSnapshot) -> Self {
        Self {
            book_id: book_id.into(),
            snapshot,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorrowReceipt {
    pub entry: LedgerEntry,
    /// Copy flipped to borrowed. Not persisted on the entry.
    pub copy_id: CopyId,
    pub availability: CopyAvailability,
}

impl BorrowReceipt {
    pub fn due_at(&self) -> i64 {
        self.entry.due_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnReceipt {
    pub entry: LedgerEntry,
    pub released_copy_id: CopyId,
    pub availability: CopyAvailability,
}

pub struct CopyAllocator {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    policy: CirculationPolicy,
}

impl CopyAllocator {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>, policy: CirculationPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// Self-service borrow on behalf of the caller.
    pub fn borrow(
        &self,
        caller: &Identity,
        request: &BorrowRequest,
    ) -> CirculationResult<BorrowReceipt> {
        self.execute_borrow(&caller.user_id, request, caller)
    }

    /// Administrative borrow for an explicit target user.
    pub fn admin_borrow(
        &self,
        caller: &Identity,
        target_user_id: &str,
        request: &BorrowRequest,
    ) -> CirculationResult<BorrowReceipt> {
        require_admin(caller)?;
        self.execute_borrow(target_user_id, request, caller)
    }

    /// Self-service return of the caller's oldest open loan of `book_id`.
    pub fn return_book(&self, caller: &Identity, book_id: &str) -> CirculationResult<ReturnReceipt> {
        validate_book_id(book_id)?;
        let filter = CloseFilter::UserBook {
            user_id: caller.user_id.clone(),
            book_id: book_id.to_string(),
        };
        self.execute_return(&filter, caller)
    }

    /// Administrative return by ledger entry id.
    pub fn admin_return(
        &self,
        caller: &Identity,
        entry_id: LedgerEntryId,
    ) -> CirculationResult<ReturnReceipt> {
        require_admin(caller)?;
        self.execute_return(&CloseFilter::EntryId(entry_id), caller)
    }

    /// The caller's current loans.
    pub fn list_open(&self, caller: &Identity) -> CirculationResult<Vec<LedgerEntry>> {
        read(&self.store, |conn| {
            Ok(SqliteLedger::new(conn).list_open(&caller.user_id)?)
        })
    }

    /// The caller's full borrow history.
    pub fn list_history(&self, caller: &Identity) -> CirculationResult<Vec<LedgerEntry>> {
        read(&self.store, |conn| {
            Ok(SqliteLedger::new(conn).list_all(&caller.user_id)?)
        })
    }

    pub fn list_open_admin(&self, caller: &Identity) -> CirculationResult<Vec<LedgerEntry>> {
        require_admin(caller)?;
        read(&self.store, |conn| Ok(SqliteLedger::new(conn).list_open_admin()?))
    }

    pub fn list_all_admin(&self, caller: &Identity) -> CirculationResult<Vec<LedgerEntry>> {
        require_admin(caller)?;
        read(&self.store, |conn| Ok(SqliteLedger::new(conn).list_all_admin()?))
    }

    fn execute_borrow(
        &self,
        user_id: &str,
        request: &BorrowRequest,
        actor: &Identity,
    ) -> CirculationResult<BorrowReceipt> {
        validate_user_id(user_id)?;
        validate_book_id(&request.book_id)?;
        request.snapshot.validate()?;

        let now = self.clock.now_ms();
        let due_at = add_days(now, self.policy.loan_days);
        let book_id = request.book_id.as_str();
        let mut stage = BorrowStage::Requested;

        let result = in_write_transaction(&self.store, |tx| {
            if !book_is_registered(tx, book_id)? {
                return Err(CirculationError::ResourceNotFound(Resource::Book(
                    book_id.to_string(),
                )));
            }

            let registry = SqliteCopyRegistry::new(tx);
            let copy_id = registry
                .claim_one(book_id, now)?
                .ok_or_else(|| CirculationError::NoAvailableCopy(book_id.to_string()))?;
            stage = BorrowStage::CopyClaimed;

            let entry =
                SqliteLedger::new(tx).open(user_id, book_id, &request.snapshot, now, due_at)?;
            stage = BorrowStage::LedgerOpened;

            SqliteReservationRepository::new(tx).fulfil_active(user_id, book_id)?;
            let availability = registry.availability(book_id)?;

            Ok(BorrowReceipt {
                entry,
                copy_id,
                availability,
            })
        });

        match result {
            Ok(receipt) => {
                stage = BorrowStage::Committed;
                info!(
                    "event=borrow module=allocator status=ok stage={} user_id={} book_id={} entry_id={} copy_id={} actor={} available={}",
                    stage.as_str(),
                    user_id,
                    book_id,
                    receipt.entry.id,
                    receipt.copy_id,
                    actor.user_id,
                    receipt.availability.available
                );
                Ok(receipt)
            }
            Err(err) => {
                warn!(
                    "event=borrow module=allocator status=error stage={} user_id={} book_id={} actor={} error_code={}",
                    stage.as_str(),
                    user_id,
                    book_id,
                    actor.user_id,
                    err.code()
                );
                Err(err)
            }
        }
    }

    fn execute_return(
        &self,
        filter: &CloseFilter,
        actor: &Identity,
    ) -> CirculationResult<ReturnReceipt> {
        let now = self.clock.now_ms();

        let result = in_write_transaction(&self.store, |tx| {
            let entry = SqliteLedger::new(tx)
                .close(filter, now)?
                .ok_or_else(|| nothing_to_return(filter))?;

            let registry = SqliteCopyRegistry::new(tx);
            // An open entry with no borrowed copy means the invariant was
            // already broken; abort rather than commit a one-sided return.
            let released_copy_id = registry.release_one(&entry.book_id, now)?.ok_or_else(|| {
                CirculationError::TransientStoreFailure(RepoError::InvalidData(format!(
                    "ledger entry {} has no borrowed copy of book {}",
                    entry.id, entry.book_id
                )))
            })?;
            let availability = registry.availability(&entry.book_id)?;

            Ok(ReturnReceipt {
                entry,
                released_copy_id,
                availability,
            })
        });

        match result {
            Ok(receipt) => {
                info!(
                    "event=return module=allocator status=ok user_id={} book_id={} entry_id={} copy_id={} actor={} available={}",
                    receipt.entry.user_id,
                    receipt.entry.book_id,
                    receipt.entry.id,
                    receipt.released_copy_id,
                    actor.user_id,
                    receipt.availability.available
                );
                Ok(receipt)
            }
            Err(err) => {
                warn!(
                    "event=return module=allocator status=error actor={} error_code={}",
                    actor.user_id,
                    err.code()
                );
                Err(err)
            }
        }
    }
}

fn nothing_to_return(filter: &CloseFilter) -> CirculationError {
    match filter {
        CloseFilter::UserBook { book_id, .. } => CirculationError::NothingToReturn {
            book_id: book_id.clone(),
        },
        CloseFilter::EntryId(id) => CirculationError::ResourceNotFound(Resource::LedgerEntry(*id)),
    }
}
