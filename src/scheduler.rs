//! Scheduler supervisor: owns the recurring reminder trigger.
//!
//! Lifecycle: uninitialized -> initialized(stopped) <-> running. The
//! supervisor is an ordinary value owned by the composition root; clone
//! handles share one state. A single run lock serialises scheduled and
//! manual runs; an overlapping trigger is rejected with `RunInProgress`
//! instead of interleaving.

use crate::clock::Clock;
use crate::cron::Schedule;
use crate::model::ReminderRunStats;
use crate::reminder::ReminderBatchProcessor;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler has not been initialized")]
    NotInitialized,
    #[error("a reminder run is already in progress")]
    RunInProgress,
    #[error("invalid schedule expression: {0}")]
    InvalidSchedule(String),
    #[error("reminder run failed: {0}")]
    Batch(anyhow::Error),
}

/// Point-in-time snapshot of the supervisor, safe to hand to the status
/// surface. Reading it never touches the run lock.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerState {
    pub is_initialized: bool,
    pub is_running: bool,
    pub schedule: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub total_runs: u32,
    pub successful_runs: u32,
    pub failed_runs: u32,
    pub last_run_stats: Option<ReminderRunStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub error_rate: u32,
    pub detail: String,
}

#[derive(Default)]
struct StateCell {
    initialized: bool,
    running: bool,
    // Bumped on every start/stop so a superseded timer task can tell it
    // must exit instead of firing alongside its replacement.
    epoch: u64,
    schedule: Option<Schedule>,
    last_run_at: Option<DateTime<Utc>>,
    next_run_at: Option<DateTime<Utc>>,
    total_runs: u32,
    successful_runs: u32,
    failed_runs: u32,
    last_run_stats: Option<ReminderRunStats>,
}

struct Inner {
    processor: ReminderBatchProcessor,
    clock: Arc<dyn Clock>,
    utc_offset: FixedOffset,
    run_lock: tokio::sync::Mutex<()>,
    state: Mutex<StateCell>,
    wake: Notify,
}

impl Inner {
    fn cell(&self) -> MutexGuard<'_, StateCell> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Clone)]
pub struct SchedulerSupervisor {
    inner: Arc<Inner>,
}

impl SchedulerSupervisor {
    pub fn new(
        processor: ReminderBatchProcessor,
        clock: Arc<dyn Clock>,
        utc_offset: FixedOffset,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                processor,
                clock,
                utc_offset,
                run_lock: tokio::sync::Mutex::new(()),
                state: Mutex::new(StateCell::default()),
                wake: Notify::new(),
            }),
        }
    }

    /// Validate the trigger expression and move to initialized(stopped).
    /// An invalid expression is fatal: the process should refuse to start.
    pub fn initialize(&self, expression: &str) -> Result<(), SchedulerError> {
        let schedule = Schedule::parse(expression).map_err(SchedulerError::InvalidSchedule)?;
        let mut cell = self.inner.cell();
        if cell.initialized {
            warn!("scheduler already initialized; ignoring");
            return Ok(());
        }
        cell.schedule = Some(schedule);
        cell.initialized = true;
        info!(schedule = expression, "scheduler initialized");
        Ok(())
    }

    /// Arm the trigger. A no-op when already running.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let epoch = {
            let mut cell = self.inner.cell();
            if !cell.initialized {
                return Err(SchedulerError::NotInitialized);
            }
            if cell.running {
                info!("scheduler already running");
                return Ok(());
            }
            cell.running = true;
            cell.epoch += 1;
            cell.epoch
        };
        tokio::spawn(run_loop(self.inner.clone(), epoch));
        info!("scheduler started");
        Ok(())
    }

    /// Disarm the trigger. A no-op when already stopped; a batch run already
    /// in flight is left to finish.
    pub fn stop(&self) -> Result<(), SchedulerError> {
        {
            let mut cell = self.inner.cell();
            if !cell.initialized {
                return Err(SchedulerError::NotInitialized);
            }
            if !cell.running {
                info!("scheduler already stopped");
                return Ok(());
            }
            cell.running = false;
            cell.epoch += 1;
            cell.next_run_at = None;
        }
        self.inner.wake.notify_waiters();
        info!("scheduler stopped");
        Ok(())
    }

    pub fn restart(&self) -> Result<(), SchedulerError> {
        self.stop()?;
        self.start()
    }

    /// Operator-initiated catch-up run, outside the schedule but under the
    /// same no-overlap guarantee. A fetch-level failure is recorded in the
    /// run counters and re-raised to the caller.
    pub async fn trigger_manually(&self, reason: &str) -> Result<ReminderRunStats, SchedulerError> {
        if !self.inner.cell().initialized {
            return Err(SchedulerError::NotInitialized);
        }
        info!(reason, "manual reminder trigger");
        execute_run(&self.inner, reason).await
    }

    /// Snapshot of the supervisor state. Callable in any lifecycle phase and
    /// never blocked by a run in progress.
    pub fn status(&self) -> SchedulerState {
        let cell = self.inner.cell();
        SchedulerState {
            is_initialized: cell.initialized,
            is_running: cell.running,
            schedule: cell.schedule.as_ref().map(|s| s.expression().to_string()),
            last_run_at: cell.last_run_at,
            next_run_at: cell.next_run_at,
            total_runs: cell.total_runs,
            successful_runs: cell.successful_runs,
            failed_runs: cell.failed_runs,
            last_run_stats: cell.last_run_stats.clone(),
        }
    }

    /// Unhealthy when uninitialized, stopped, or when at least half of all
    /// runs failed. Zero runs counts as healthy.
    pub fn health_check(&self) -> HealthReport {
        let cell = self.inner.cell();
        if !cell.initialized {
            return HealthReport {
                status: HealthStatus::Unhealthy,
                error_rate: 0,
                detail: "scheduler not initialized".to_string(),
            };
        }
        if !cell.running {
            return HealthReport {
                status: HealthStatus::Unhealthy,
                error_rate: 0,
                detail: "scheduler stopped".to_string(),
            };
        }

        let error_rate = if cell.total_runs == 0 {
            0
        } else {
            cell.failed_runs * 100 / cell.total_runs
        };
        if cell.total_runs > 0 && cell.failed_runs * 2 >= cell.total_runs {
            HealthReport {
                status: HealthStatus::Unhealthy,
                error_rate,
                detail: format!("{} of {} runs failed", cell.failed_runs, cell.total_runs),
            }
        } else {
            HealthReport {
                status: HealthStatus::Healthy,
                error_rate,
                detail: "ok".to_string(),
            }
        }
    }
}

/// Timer loop spawned by `start`. Sleeps until the next firing, then funnels
/// into the same guarded entry point as the manual trigger.
async fn run_loop(inner: Arc<Inner>, my_epoch: u64) {
    loop {
        let schedule = {
            let cell = inner.cell();
            if !cell.running || cell.epoch != my_epoch {
                break;
            }
            match &cell.schedule {
                Some(schedule) => schedule.clone(),
                None => break,
            }
        };

        let now_local = inner.clock.now_utc().with_timezone(&inner.utc_offset);
        let next_utc = schedule.next_after(now_local).with_timezone(&Utc);
        {
            let mut cell = inner.cell();
            if !cell.running || cell.epoch != my_epoch {
                break;
            }
            cell.next_run_at = Some(next_utc);
        }

        let wait = (next_utc - inner.clock.now_utc())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = inner.wake.notified() => continue,
        }

        {
            let cell = inner.cell();
            if !cell.running || cell.epoch != my_epoch {
                break;
            }
        }

        match execute_run(&inner, "scheduled").await {
            Ok(_) => {}
            Err(SchedulerError::RunInProgress) => {
                warn!("previous reminder run still in progress; skipping this firing");
            }
            Err(err) => {
                error!(%err, "scheduled reminder run failed");
            }
        }
    }
}

/// The single guarded entry point for a batch run. Counters are bumped
/// before the batch; the outcome settles successful_runs/failed_runs.
async fn execute_run(inner: &Inner, reason: &str) -> Result<ReminderRunStats, SchedulerError> {
    let _guard = inner
        .run_lock
        .try_lock()
        .map_err(|_| SchedulerError::RunInProgress)?;

    let run_id = Uuid::new_v4();
    let target_date = inner.processor.default_target_date();
    {
        let mut cell = inner.cell();
        cell.last_run_at = Some(inner.clock.now_utc());
        cell.total_runs += 1;
    }
    info!(%run_id, reason, %target_date, "reminder run starting");

    match inner.processor.run_once(target_date).await {
        Ok(stats) => {
            let mut cell = inner.cell();
            cell.successful_runs += 1;
            cell.last_run_stats = Some(stats.clone());
            drop(cell);
            info!(%run_id, "reminder run succeeded");
            Ok(stats)
        }
        Err(err) => {
            inner.cell().failed_runs += 1;
            error!(%run_id, %err, "reminder run failed");
            Err(SchedulerError::Batch(err))
        }
    }
}
