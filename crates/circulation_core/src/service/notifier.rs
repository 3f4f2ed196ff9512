//! Overdue and due-soon event emission.
//!
//! # Responsibility
//! - Scan open ledger entries against today's UTC calendar day.
//! - Emit at most one event per (user, kind, ledger entry).
//!
//! # Invariants
//! - Reads ledger and copy state only.
//! - One failing row is logged and skipped; the rest of the sweep proceeds.

use crate::clock::{epoch_day, Clock};
use crate::config::CirculationPolicy;
use crate::db::Store;
use crate::error::CirculationResult;
use crate::model::ledger::LedgerEntry;
use crate::model::notification::NotificationEvent;
use crate::repo::ledger_repo::{Ledger, SqliteLedger};
use crate::repo::notification_repo::{NotificationStore, SqliteNotificationStore};
use crate::service::{in_write_transaction, read, SweepReport};
use log::{debug, info, warn};
use std::sync::Arc;

pub struct EventNotifier {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    policy: CirculationPolicy,
}

impl EventNotifier {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>, policy: CirculationPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// Emits `overdue` for open entries due strictly before today.
    pub fn overdue_sweep(&self) -> CirculationResult<SweepReport> {
        let today = epoch_day(self.clock.now_ms());
        let candidates = read(&self.store, |conn| {
            Ok(SqliteLedger::new(conn).list_overdue(today)?)
        })?;
        Ok(self.emit_all("overdue_sweep", &candidates, NotificationEvent::overdue))
    }

    /// Emits `due_soon` for open entries due exactly `due_soon_lead_days`
    /// from today.
    pub fn due_soon_sweep(&self) -> CirculationResult<SweepReport> {
        let lead_days = self.policy.due_soon_lead_days;
        let target_day = epoch_day(self.clock.now_ms()) + i64::from(lead_days);
        let candidates = read(&self.store, |conn| {
            Ok(SqliteLedger::new(conn).list_due_on(target_day)?)
        })?;
        Ok(self.emit_all("due_soon_sweep", &candidates, |entry| {
            NotificationEvent::due_soon(entry, lead_days)
        }))
    }

    fn emit_all(
        &self,
        sweep: &str,
        entries: &[LedgerEntry],
        to_event: impl Fn(&LedgerEntry) -> NotificationEvent,
    ) -> SweepReport {
        let mut report = SweepReport {
            examined: entries.len(),
            ..SweepReport::default()
        };

        for entry in entries {
            let event = to_event(entry);
            match self.emit_once(&event) {
                Ok(true) => report.applied += 1,
                Ok(false) => {}
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        "event={} module=notifier status=error entry_id={} error_code={} error={}",
                        sweep,
                        entry.id,
                        err.code(),
                        err
                    );
                }
            }
        }

        info!(
            "event={} module=notifier status=ok examined={} emitted={} failed={}",
            sweep, report.examined, report.applied, report.failed
        );
        report
    }

    fn emit_once(&self, event: &NotificationEvent) -> CirculationResult<bool> {
        let now = self.clock.now_ms();
        in_write_transaction(&self.store, |tx| {
            let notifications = SqliteNotificationStore::new(tx);
            if notifications.exists(&event.user_id, event.kind, event.related_id)? {
                return Ok(false);
            }
            let inserted = notifications.insert(event, now)?;
            debug!(
                "event=emit module=notifier status=ok kind={} user_id={} related_id={}",
                event.kind.as_str(),
                event.user_id,
                event.related_id
            );
            Ok(inserted)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::EventNotifier;
    use crate::clock::{ManualClock, MS_PER_DAY};
    use crate::config::CirculationPolicy;
    use crate::db::Store;
    use crate::error::CirculationError;
    use crate::model::ids::BookSnapshot;
    use crate::repo::ledger_repo::{Ledger, SqliteLedger};
    use std::sync::Arc;

    const DAY0: i64 = 20_000 * MS_PER_DAY;

    fn notifier_with_loan(due_at: i64, now: i64) -> EventNotifier {
        let store = Store::in_memory().unwrap();
        store
            .with_connection(|conn| {
                SqliteLedger::new(conn).open(
                    "alice",
                    "b1",
                    &BookSnapshot::new("Dune", "Frank Herbert"),
                    DAY0,
                    due_at,
                )?;
                Ok::<_, CirculationError>(())
            })
            .unwrap();
        EventNotifier::new(
            Arc::new(store),
            Arc::new(ManualClock::new(now)),
            CirculationPolicy::default(),
        )
    }

    #[test]
    fn loan_due_today_is_not_overdue() {
        let notifier = notifier_with_loan(DAY0 + 10 * MS_PER_DAY, DAY0 + 10 * MS_PER_DAY + 5);
        assert_eq!(notifier.overdue_sweep().unwrap().applied, 0);
    }

    #[test]
    fn overdue_sweep_emits_once() {
        let notifier = notifier_with_loan(DAY0 + 10 * MS_PER_DAY, DAY0 + 11 * MS_PER_DAY);
        assert_eq!(notifier.overdue_sweep().unwrap().applied, 1);
        let again = notifier.overdue_sweep().unwrap();
        assert_eq!(again.examined, 1);
        assert_eq!(again.applied, 0);
    }

    #[test]
    fn due_soon_matches_exact_lead_day() {
        let due_at = DAY0 + 10 * MS_PER_DAY + 3_600_000;
        assert_eq!(
            notifier_with_loan(due_at, DAY0 + 7 * MS_PER_DAY)
                .due_soon_sweep()
                .unwrap()
                .applied,
            1
        );
        assert_eq!(
            notifier_with_loan(due_at, DAY0 + 6 * MS_PER_DAY)
                .due_soon_sweep()
                .unwrap()
                .applied,
            0
        );
    }
}
