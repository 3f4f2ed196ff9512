//! Circulation use-case services.
//!
//! # Responsibility
//! - Orchestrate repositories into the borrow/return, reservation and
//!   notification protocols.
//! - Own transaction scope: every mutating protocol runs in one
//!   `BEGIN IMMEDIATE` transaction and commits or rolls back as a unit.
//!
//! # Invariants
//! - [`allocator::CopyAllocator`] is the only caller of copy status
//!   transitions.
//! - Sweeps read copy status but never write it.

use crate::clock::Clock;
use crate::config::CirculationPolicy;
use crate::db::Store;
use crate::error::CirculationResult;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::sync::Arc;

pub mod allocator;
pub mod auth_guard;
pub mod inbox;
pub mod inventory;
pub mod notifier;
pub mod reservation_queue;

use allocator::CopyAllocator;
use inbox::NotificationInbox;
use inventory::InventoryService;
use notifier::EventNotifier;
use reservation_queue::ReservationQueue;

/// Result of one sweep pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    /// Rows considered by the pass.
    pub examined: usize,
    /// State transitions or events actually written.
    pub applied: usize,
    /// Rows skipped because their own transaction failed.
    pub failed: usize,
}

/// Every circulation service wired to one store, clock and policy.
#[derive(Clone)]
pub struct CirculationServices {
    pub allocator: Arc<CopyAllocator>,
    pub reservations: Arc<ReservationQueue>,
    pub notifier: Arc<EventNotifier>,
    pub inbox: Arc<NotificationInbox>,
    pub inventory: Arc<InventoryService>,
}

impl CirculationServices {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>, policy: CirculationPolicy) -> Self {
        Self {
            allocator: Arc::new(CopyAllocator::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                policy,
            )),
            reservations: Arc::new(ReservationQueue::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                policy,
            )),
            notifier: Arc::new(EventNotifier::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                policy,
            )),
            inbox: Arc::new(NotificationInbox::new(Arc::clone(&store))),
            inventory: Arc::new(InventoryService::new(store, clock)),
        }
    }
}

/// Runs `op` inside a write-locked transaction.
///
/// The write lock is taken before the first read, so concurrent protocols
/// on the same store are serialized. Returning `Err` drops the transaction,
/// which rolls it back.
pub(crate) fn in_write_transaction<T>(
    store: &Store,
    op: impl FnOnce(&Transaction<'_>) -> CirculationResult<T>,
) -> CirculationResult<T> {
    store.with_connection(|conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = op(&tx)?;
        tx.commit()?;
        Ok(value)
    })
}

/// Runs a read-only `op` on a scoped connection.
pub(crate) fn read<T>(
    store: &Store,
    op: impl FnOnce(&Connection) -> CirculationResult<T>,
) -> CirculationResult<T> {
    store.with_connection(|conn| op(conn))
}
