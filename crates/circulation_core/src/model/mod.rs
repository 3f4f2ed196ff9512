//! Circulation domain model.
//!
//! # Responsibility
//! - Define the records owned by the circulation core: copies, ledger
//!   entries, reservations and emitted notification events.
//! - Model every role/status field as a closed enum.
//!
//! # Invariants
//! - Records are never physically deleted by circulation flows; lifecycle
//!   ends are status transitions.
//! - User and book identifiers are externally owned strings; everything the
//!   core creates is identified by a UUID.

pub mod copy;
pub mod identity;
pub mod ids;
pub mod ledger;
pub mod notification;
pub mod reservation;
