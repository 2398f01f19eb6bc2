use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use portal_notify::appointments::AppointmentStore;
use portal_notify::clock::{operational_offset, FrozenClock};
use portal_notify::dispatcher::NotificationDispatcher;
use portal_notify::ledger::{LedgerError, NotificationLedger};
use portal_notify::mailer::MailTransport;
use portal_notify::model::{
    AppointmentSnapshot, NotificationDraft, NotificationRecord, NotificationStatus,
};
use portal_notify::reminder::ReminderBatchProcessor;
use portal_notify::scheduler::{HealthStatus, SchedulerError, SchedulerSupervisor};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Clone)]
struct NullMail;

#[async_trait]
impl MailTransport for NullMail {
    async fn send(&self, _: &str, _: &str, _: &str, _: Option<&str>) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
struct NullLedger;

#[async_trait]
impl NotificationLedger for NullLedger {
    async fn create(&self, draft: &NotificationDraft) -> Result<NotificationRecord, LedgerError> {
        Ok(NotificationRecord {
            id: 1,
            user_id: draft.user_id.clone(),
            appointment_id: draft.appointment_id.clone(),
            kind: draft.kind,
            channel: draft.channel,
            message: draft.message.clone(),
            status: NotificationStatus::Queued,
            sent_at: None,
            error_detail: None,
            created_at: Utc::now(),
        })
    }

    async fn update_status(
        &self,
        id: i64,
        _status: NotificationStatus,
        _sent_at: Option<DateTime<Utc>>,
        _error_detail: Option<&str>,
    ) -> Result<NotificationRecord, LedgerError> {
        Err(LedgerError::NotFound(id))
    }

    async fn count_for_user(&self, _user_id: &str) -> Result<i64, LedgerError> {
        Ok(0)
    }

    async fn reminder_already_sent(&self, _appointment_id: &str) -> Result<bool, LedgerError> {
        Ok(false)
    }

    async fn recent_for_user(
        &self,
        _user_id: &str,
        _limit: i64,
    ) -> Result<Vec<NotificationRecord>, LedgerError> {
        Ok(Vec::new())
    }
}

/// Appointment store that plays back a queue of fetch outcomes; defaults to
/// an empty day once the queue drains.
#[derive(Clone, Default)]
struct ScriptedStore {
    responses: Arc<Mutex<VecDeque<Result<Vec<AppointmentSnapshot>>>>>,
}

impl ScriptedStore {
    fn with_responses(responses: Vec<Result<Vec<AppointmentSnapshot>>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
        }
    }
}

#[async_trait]
impl AppointmentStore for ScriptedStore {
    async fn find_appointments_for_reminder(
        &self,
        _date: NaiveDate,
    ) -> Result<Vec<AppointmentSnapshot>> {
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or(Ok(Vec::new()))
    }
}

/// Store that holds the run open long enough to observe the run lock.
#[derive(Clone)]
struct SlowStore {
    delay: Duration,
}

#[async_trait]
impl AppointmentStore for SlowStore {
    async fn find_appointments_for_reminder(
        &self,
        _date: NaiveDate,
    ) -> Result<Vec<AppointmentSnapshot>> {
        tokio::time::sleep(self.delay).await;
        Ok(Vec::new())
    }
}

fn supervisor_with(store: Arc<dyn AppointmentStore>) -> SchedulerSupervisor {
    let clock = Arc::new(FrozenClock(
        Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap(),
    ));
    let offset = operational_offset(330);
    let ledger = Arc::new(NullLedger);
    let dispatcher = Arc::new(NotificationDispatcher::new(
        ledger.clone(),
        Arc::new(NullMail),
        clock.clone(),
        10,
        Duration::from_secs(2),
    ));
    let processor = ReminderBatchProcessor::new(store, ledger, dispatcher, clock.clone(), offset);
    SchedulerSupervisor::new(processor, clock, offset)
}

#[tokio::test]
async fn initialize_rejects_invalid_expressions() {
    let supervisor = supervisor_with(Arc::new(ScriptedStore::default()));
    assert!(matches!(
        supervisor.initialize("not a cron"),
        Err(SchedulerError::InvalidSchedule(_))
    ));
    assert!(matches!(
        supervisor.initialize("0 18 1 * *"),
        Err(SchedulerError::InvalidSchedule(_))
    ));
    assert!(matches!(
        supervisor.initialize("90 18 * * *"),
        Err(SchedulerError::InvalidSchedule(_))
    ));

    // A failed initialize leaves the supervisor unusable.
    assert!(matches!(
        supervisor.start(),
        Err(SchedulerError::NotInitialized)
    ));
}

#[tokio::test]
async fn control_methods_require_initialization() {
    let supervisor = supervisor_with(Arc::new(ScriptedStore::default()));

    assert!(matches!(
        supervisor.start(),
        Err(SchedulerError::NotInitialized)
    ));
    assert!(matches!(
        supervisor.stop(),
        Err(SchedulerError::NotInitialized)
    ));
    assert!(matches!(
        supervisor.trigger_manually("too early").await,
        Err(SchedulerError::NotInitialized)
    ));

    // Status and health always answer.
    let status = supervisor.status();
    assert!(!status.is_initialized);
    assert!(!status.is_running);
    let health = supervisor.health_check();
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert!(health.detail.contains("not initialized"));
}

#[tokio::test]
async fn start_and_stop_are_noop_when_repeated() {
    let supervisor = supervisor_with(Arc::new(ScriptedStore::default()));
    supervisor.initialize("30 18 * * *").unwrap();

    supervisor.start().unwrap();
    supervisor.start().unwrap();
    let status = supervisor.status();
    assert!(status.is_running);
    assert_eq!(status.schedule.as_deref(), Some("30 18 * * *"));

    supervisor.stop().unwrap();
    supervisor.stop().unwrap();
    let status = supervisor.status();
    assert!(!status.is_running);
    assert!(status.next_run_at.is_none());
}

#[tokio::test]
async fn restart_leaves_scheduler_running() {
    let supervisor = supervisor_with(Arc::new(ScriptedStore::default()));
    supervisor.initialize("30 18 * * *").unwrap();
    supervisor.start().unwrap();
    supervisor.restart().unwrap();
    assert!(supervisor.status().is_running);
}

#[tokio::test]
async fn manual_trigger_records_a_successful_run() {
    let supervisor = supervisor_with(Arc::new(ScriptedStore::default()));
    supervisor.initialize("30 18 * * *").unwrap();

    let stats = supervisor.trigger_manually("backfill").await.unwrap();
    assert_eq!(stats.total_appointments, 0);

    let status = supervisor.status();
    assert_eq!(status.total_runs, 1);
    assert_eq!(status.successful_runs, 1);
    assert_eq!(status.failed_runs, 0);
    assert!(status.last_run_at.is_some());
    assert!(status.last_run_stats.is_some());
}

#[tokio::test]
async fn overlapping_trigger_is_rejected() {
    let supervisor = supervisor_with(Arc::new(SlowStore {
        delay: Duration::from_millis(300),
    }));
    supervisor.initialize("30 18 * * *").unwrap();

    let background = supervisor.clone();
    let first = tokio::spawn(async move { background.trigger_manually("first").await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = supervisor.trigger_manually("second").await;
    assert!(matches!(second, Err(SchedulerError::RunInProgress)));

    first.await.unwrap().unwrap();
    // Exactly one run was admitted for the window.
    let status = supervisor.status();
    assert_eq!(status.total_runs, 1);
    assert_eq!(status.successful_runs, 1);
}

#[tokio::test]
async fn fetch_failure_surfaces_and_counts_as_failed_run() {
    let supervisor = supervisor_with(Arc::new(ScriptedStore::with_responses(vec![Err(anyhow!(
        "store unreachable"
    ))])));
    supervisor.initialize("30 18 * * *").unwrap();

    let err = supervisor.trigger_manually("backfill").await.unwrap_err();
    assert!(matches!(err, SchedulerError::Batch(_)));

    let status = supervisor.status();
    assert_eq!(status.total_runs, 1);
    assert_eq!(status.failed_runs, 1);
    assert_eq!(status.successful_runs, 0);
}

#[tokio::test]
async fn health_reflects_error_rate() {
    let mut responses: Vec<Result<Vec<AppointmentSnapshot>>> = Vec::new();
    for _ in 0..6 {
        responses.push(Err(anyhow!("flaky store")));
    }
    for _ in 0..4 {
        responses.push(Ok(Vec::new()));
    }
    let supervisor = supervisor_with(Arc::new(ScriptedStore::with_responses(responses)));
    supervisor.initialize("30 18 * * *").unwrap();
    supervisor.start().unwrap();

    for _ in 0..6 {
        let _ = supervisor.trigger_manually("drill").await.unwrap_err();
    }
    for _ in 0..4 {
        supervisor.trigger_manually("drill").await.unwrap();
    }

    let health = supervisor.health_check();
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert_eq!(health.error_rate, 60);

    let status = supervisor.status();
    assert_eq!(status.total_runs, 10);
    assert_eq!(status.failed_runs, 6);
}

#[tokio::test]
async fn healthy_when_running_with_no_runs_yet() {
    let supervisor = supervisor_with(Arc::new(ScriptedStore::default()));
    supervisor.initialize("30 18 * * *").unwrap();
    supervisor.start().unwrap();

    let health = supervisor.health_check();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.error_rate, 0);
}

#[tokio::test]
async fn stopped_scheduler_reports_unhealthy() {
    let supervisor = supervisor_with(Arc::new(ScriptedStore::default()));
    supervisor.initialize("30 18 * * *").unwrap();

    let health = supervisor.health_check();
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert!(health.detail.contains("stopped"));
}
