//! Background sweep scheduling.
//!
//! # Responsibility
//! - Run each sweep job on its own named thread and fixed interval.
//! - Stop every job promptly through a shared [`CancellationToken`].
//! - Let callers trigger every sweep synchronously via
//!   [`SweepScheduler::run_all_once`].
//!
//! # Invariants
//! - Each job runs immediately at start, then once per interval.
//! - Sweeps inside one job run in registration order, so reservation
//!   expiry always precedes the availability pass of the same tick.
//! - A failed sweep is logged; the job keeps its schedule.

use crate::config::SchedulerConfig;
use crate::error::CirculationResult;
use crate::service::notifier::EventNotifier;
use crate::service::reservation_queue::ReservationQueue;
use crate::service::SweepReport;
use log::{error, info, warn};
use std::io;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// One periodic, idempotent scan.
pub trait Sweep: Send + Sync {
    fn name(&self) -> &'static str;
    fn run_once(&self) -> CirculationResult<SweepReport>;
}

pub struct OverdueSweep(pub Arc<EventNotifier>);

impl Sweep for OverdueSweep {
    fn name(&self) -> &'static str {
        "overdue"
    }

    fn run_once(&self) -> CirculationResult<SweepReport> {
        self.0.overdue_sweep()
    }
}

pub struct DueSoonSweep(pub Arc<EventNotifier>);

impl Sweep for DueSoonSweep {
    fn name(&self) -> &'static str {
        "due_soon"
    }

    fn run_once(&self) -> CirculationResult<SweepReport> {
        self.0.due_soon_sweep()
    }
}

pub struct ReservationExpirySweep(pub Arc<ReservationQueue>);

impl Sweep for ReservationExpirySweep {
    fn name(&self) -> &'static str {
        "reservation_expiry"
    }

    fn run_once(&self) -> CirculationResult<SweepReport> {
        self.0.expire_sweep()
    }
}

pub struct ReservationAvailabilitySweep(pub Arc<ReservationQueue>);

impl Sweep for ReservationAvailabilitySweep {
    fn name(&self) -> &'static str {
        "reservation_availability"
    }

    fn run_once(&self) -> CirculationResult<SweepReport> {
        self.0.availability_sweep()
    }
}

/// Cloneable stop signal shared by every sweep thread.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (cancelled, cv) = &*self.inner;
        *cancelled.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cv.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps up to `timeout`; returns `true` as soon as the token is
    /// cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (cancelled, cv) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut guard = cancelled.lock().unwrap_or_else(PoisonError::into_inner);
        while !*guard {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            guard = cv
                .wait_timeout(guard, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

struct SweepJob {
    name: String,
    interval: Duration,
    sweeps: Vec<Arc<dyn Sweep>>,
}

impl SweepJob {
    fn tick(&self) -> Vec<(&'static str, CirculationResult<SweepReport>)> {
        self.sweeps
            .iter()
            .map(|sweep| (sweep.name(), run_logged(sweep.as_ref())))
            .collect()
    }
}

#[derive(Default)]
pub struct SweepScheduler {
    jobs: Vec<SweepJob>,
}

impl SweepScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard wiring: notifier sweeps on the notification interval,
    /// reservation expiry then availability on the reservation interval.
    pub fn standard(
        notifier: Arc<EventNotifier>,
        reservations: Arc<ReservationQueue>,
        config: &SchedulerConfig,
    ) -> Self {
        let notification_sweeps: Vec<Arc<dyn Sweep>> = vec![
            Arc::new(OverdueSweep(Arc::clone(&notifier))),
            Arc::new(DueSoonSweep(notifier)),
        ];
        let reservation_sweeps: Vec<Arc<dyn Sweep>> = vec![
            Arc::new(ReservationExpirySweep(Arc::clone(&reservations))),
            Arc::new(ReservationAvailabilitySweep(reservations)),
        ];
        Self::new()
            .with_job(
                "notifications",
                config.notification_interval(),
                notification_sweeps,
            )
            .with_job(
                "reservations",
                config.reservation_interval(),
                reservation_sweeps,
            )
    }

    pub fn with_job(
        mut self,
        name: impl Into<String>,
        interval: Duration,
        sweeps: Vec<Arc<dyn Sweep>>,
    ) -> Self {
        self.jobs.push(SweepJob {
            name: name.into(),
            interval,
            sweeps,
        });
        self
    }

    /// Runs every sweep of every job once on the calling thread.
    pub fn run_all_once(&self) -> Vec<(&'static str, CirculationResult<SweepReport>)> {
        self.jobs.iter().flat_map(SweepJob::tick).collect()
    }

    /// Spawns one thread per job. On spawn failure the already started
    /// threads are stopped before the error is returned.
    pub fn start(self, token: CancellationToken) -> io::Result<SchedulerHandle> {
        let mut handle = SchedulerHandle {
            token: token.clone(),
            threads: Vec::with_capacity(self.jobs.len()),
        };

        for job in self.jobs {
            let job_token = token.clone();
            let thread_name = format!("sweep_{}", job.name);
            let spawned = thread::Builder::new()
                .name(thread_name)
                .spawn(move || run_job(&job, &job_token));
            match spawned {
                Ok(join) => handle.threads.push(join),
                Err(err) => {
                    error!(
                        "event=scheduler_start module=scheduler status=error error={}",
                        err
                    );
                    handle.shutdown();
                    return Err(err);
                }
            }
        }

        info!(
            "event=scheduler_start module=scheduler status=ok jobs={}",
            handle.threads.len()
        );
        Ok(handle)
    }
}

pub struct SchedulerHandle {
    token: CancellationToken,
    threads: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancels every job and waits for its thread to exit.
    pub fn shutdown(self) {
        self.token.cancel();
        for join in self.threads {
            let name = join.thread().name().unwrap_or("sweep").to_string();
            if join.join().is_err() {
                warn!(
                    "event=scheduler_stop module=scheduler status=error thread={} error=panicked",
                    name
                );
            }
        }
        info!("event=scheduler_stop module=scheduler status=ok");
    }
}

fn run_job(job: &SweepJob, token: &CancellationToken) {
    info!(
        "event=sweep_job module=scheduler status=start job={} interval_ms={}",
        job.name,
        job.interval.as_millis()
    );
    loop {
        if token.is_cancelled() {
            break;
        }
        job.tick();
        if token.wait_timeout(job.interval) {
            break;
        }
    }
    info!(
        "event=sweep_job module=scheduler status=stopped job={}",
        job.name
    );
}

fn run_logged(sweep: &dyn Sweep) -> CirculationResult<SweepReport> {
    let started_at = Instant::now();
    let result = sweep.run_once();
    match &result {
        Ok(report) => info!(
            "event=sweep module=scheduler status=ok sweep={} examined={} applied={} failed={} duration_ms={}",
            sweep.name(),
            report.examined,
            report.applied,
            report.failed,
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=sweep module=scheduler status=error sweep={} error_code={} duration_ms={}",
            sweep.name(),
            err.code(),
            started_at.elapsed().as_millis()
        ),
    }
    result
}
