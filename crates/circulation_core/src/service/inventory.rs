//! Copy registry administration.
//!
//! # Responsibility
//! - Register, describe and retire physical copies.
//! - Report per-book availability figures.
//!
//! # Invariants
//! - Never changes copy status; only the allocator does.
//! - A borrowed copy cannot be retired.

use crate::clock::Clock;
use crate::db::Store;
use crate::error::{CirculationError, CirculationResult, Resource};
use crate::model::copy::{BookCopy, CopyAvailability, CopyDetails, CopyStatus, NewCopy};
use crate::model::identity::Identity;
use crate::model::ids::{validate_book_id, CopyId};
use crate::repo::copy_repo::{CopyRegistry, SqliteCopyRegistry};
use crate::repo::RepoError;
use crate::service::auth_guard::require_admin;
use crate::service::{in_write_transaction, read};
use log::{info, warn};
use std::sync::Arc;

pub struct InventoryService {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl InventoryService {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn add_copy(&self, caller: &Identity, copy: &NewCopy) -> CirculationResult<BookCopy> {
        require_admin(caller)?;
        copy.validate()?;
        let now = self.clock.now_ms();

        let result = in_write_transaction(&self.store, |tx| {
            SqliteCopyRegistry::new(tx)
                .add_copy(copy, now)
                .map_err(|err| match err {
                    RepoError::UniqueViolation(_) => CirculationError::DuplicateCopy {
                        book_id: copy.book_id.clone(),
                        copy_number: copy.copy_number,
                    },
                    other => other.into(),
                })
        });

        match &result {
            Ok(created) => info!(
                "event=add_copy module=inventory status=ok book_id={} copy_id={} copy_number={}",
                created.book_id, created.id, created.copy_number
            ),
            Err(err) => warn!(
                "event=add_copy module=inventory status=error book_id={} error_code={}",
                copy.book_id,
                err.code()
            ),
        }
        result
    }

    /// Edits descriptive attributes and returns the updated copy.
    pub fn update_copy_details(
        &self,
        caller: &Identity,
        id: CopyId,
        details: &CopyDetails,
    ) -> CirculationResult<BookCopy> {
        require_admin(caller)?;
        let now = self.clock.now_ms();

        in_write_transaction(&self.store, |tx| {
            let registry = SqliteCopyRegistry::new(tx);
            if !registry.update_details(id, details, now)? {
                return Err(copy_not_found(id));
            }
            registry.get_copy(id)?.ok_or_else(|| copy_not_found(id))
        })
    }

    pub fn delete_copy(&self, caller: &Identity, id: CopyId) -> CirculationResult<()> {
        require_admin(caller)?;

        in_write_transaction(&self.store, |tx| {
            let registry = SqliteCopyRegistry::new(tx);
            let copy = registry.get_copy(id)?.ok_or_else(|| copy_not_found(id))?;
            if copy.status == CopyStatus::Borrowed || !registry.delete_copy(id)? {
                return Err(CirculationError::CopyInUse(id));
            }
            Ok(())
        })?;

        info!("event=delete_copy module=inventory status=ok copy_id={}", id);
        Ok(())
    }

    /// Copies of one book, ordered by copy number.
    pub fn list_copies(&self, book_id: &str) -> CirculationResult<Vec<BookCopy>> {
        validate_book_id(book_id)?;
        read(&self.store, |conn| Ok(SqliteCopyRegistry::new(conn).list_copies(book_id)?))
    }

    pub fn list_all_copies(&self, caller: &Identity) -> CirculationResult<Vec<BookCopy>> {
        require_admin(caller)?;
        read(&self.store, |conn| Ok(SqliteCopyRegistry::new(conn).list_all_copies()?))
    }

    pub fn availability(&self, book_id: &str) -> CirculationResult<CopyAvailability> {
        validate_book_id(book_id)?;
        read(&self.store, |conn| Ok(SqliteCopyRegistry::new(conn).availability(book_id)?))
    }
}

fn copy_not_found(id: CopyId) -> CirculationError {
    CirculationError::ResourceNotFound(Resource::Copy(id))
}
