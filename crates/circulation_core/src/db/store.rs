//! Injected connection source shared by every circulation service.
//!
//! # Responsibility
//! - Own the location of the transactional store.
//! - Provide scoped connection acquisition per operation.
//!
//! # Invariants
//! - File stores open one fresh connection per operation and close it when
//!   the closure returns; no connection outlives a use-case call.
//! - In-memory stores serialize all callers on a single connection, since an
//!   in-memory SQLite database is private to the connection that created it.

use super::open::{connect, open_db, open_db_in_memory};
use super::{DbError, DbResult};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

enum StoreSource {
    File(PathBuf),
    Memory(Mutex<Connection>),
}

/// Handle to the transactional store, shared as `Arc<Store>`.
pub struct Store {
    source: StoreSource,
}

impl Store {
    /// Opens (and migrates) a database file.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        drop(open_db(&path)?);
        Ok(Self {
            source: StoreSource::File(path),
        })
    }

    /// Creates a migrated private in-memory database.
    pub fn in_memory() -> DbResult<Self> {
        Ok(Self {
            source: StoreSource::Memory(Mutex::new(open_db_in_memory()?)),
        })
    }

    /// Returns the backing file, or `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            StoreSource::File(path) => Some(path.as_path()),
            StoreSource::Memory(_) => None,
        }
    }

    /// Runs `op` with a connection scoped to this call.
    pub fn with_connection<T, E>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<DbError>,
    {
        match &self.source {
            StoreSource::File(path) => {
                let mut conn = connect(path)?;
                op(&mut conn)
            }
            StoreSource::Memory(shared) => {
                let mut guard = shared.lock().map_err(|_| DbError::ConnectionPoisoned)?;
                op(&mut guard)
            }
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            StoreSource::File(path) => f.debug_struct("Store").field("path", path).finish(),
            StoreSource::Memory(_) => f.debug_struct("Store").field("path", &":memory:").finish(),
        }
    }
}
