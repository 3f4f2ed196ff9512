//! Core circulation logic for the library lending system.
//! This crate is the single source of truth for copy, loan and reservation
//! invariants.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod repo;
pub mod scheduler;
pub mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CirculationConfig, CirculationPolicy, ConfigError, SchedulerConfig};
pub use db::Store;
pub use error::{CirculationError, CirculationResult, Outcome, Resource};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::copy::{BookCopy, CopyAvailability, CopyDetails, CopyStatus, NewCopy};
pub use model::identity::{Identity, Role};
pub use model::ids::{BookSnapshot, ValidationError};
pub use model::ledger::{LedgerEntry, LedgerStatus};
pub use model::notification::{Notification, NotificationKind};
pub use model::reservation::{Reservation, ReservationStatus};
pub use scheduler::{CancellationToken, SchedulerHandle, Sweep, SweepScheduler};
pub use service::allocator::{BorrowReceipt, BorrowRequest, CopyAllocator, ReturnReceipt};
pub use service::auth_guard::{AuthGuard, IdentityProvider, InMemoryIdentityProvider};
pub use service::{CirculationServices, SweepReport};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
