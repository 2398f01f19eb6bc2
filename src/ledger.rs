//! Durable store of notification attempts.
//!
//! The dispatcher and batch processor talk to the ledger through the
//! `NotificationLedger` trait so tests can substitute fakes; `SqliteLedger`
//! is the production implementation over the shared portal database.

use crate::db::{self, Pool};
use crate::model::{NotificationDraft, NotificationRecord, NotificationStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("notification storage error: {0}")]
    Storage(anyhow::Error),
    #[error("notification {0} not found")]
    NotFound(i64),
}

#[async_trait]
pub trait NotificationLedger: Send + Sync {
    /// Persist a new record in `queued` status and return it with its id.
    async fn create(&self, draft: &NotificationDraft) -> Result<NotificationRecord, LedgerError>;

    /// Transition a record to `sent` or `failed`.
    async fn update_status(
        &self,
        id: i64,
        status: NotificationStatus,
        sent_at: Option<DateTime<Utc>>,
        error_detail: Option<&str>,
    ) -> Result<NotificationRecord, LedgerError>;

    /// Total notifications on record for a user (rate-limit denominator).
    async fn count_for_user(&self, user_id: &str) -> Result<i64, LedgerError>;

    /// Whether a reminder record (queued or terminal) exists for the
    /// appointment.
    async fn reminder_already_sent(&self, appointment_id: &str) -> Result<bool, LedgerError>;

    /// Latest records for a user, newest first. Operator dashboard surface.
    async fn recent_for_user(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<NotificationRecord>, LedgerError>;
}

#[derive(Debug, Clone)]
pub struct SqliteLedger {
    pool: Pool,
}

impl SqliteLedger {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationLedger for SqliteLedger {
    async fn create(&self, draft: &NotificationDraft) -> Result<NotificationRecord, LedgerError> {
        db::insert_notification(&self.pool, draft)
            .await
            .map_err(LedgerError::Storage)
    }

    async fn update_status(
        &self,
        id: i64,
        status: NotificationStatus,
        sent_at: Option<DateTime<Utc>>,
        error_detail: Option<&str>,
    ) -> Result<NotificationRecord, LedgerError> {
        db::mark_notification(&self.pool, id, status, sent_at, error_detail)
            .await
            .map_err(LedgerError::Storage)?
            .ok_or(LedgerError::NotFound(id))
    }

    async fn count_for_user(&self, user_id: &str) -> Result<i64, LedgerError> {
        db::count_notifications_for_user(&self.pool, user_id)
            .await
            .map_err(LedgerError::Storage)
    }

    async fn reminder_already_sent(&self, appointment_id: &str) -> Result<bool, LedgerError> {
        db::reminder_exists_for_appointment(&self.pool, appointment_id)
            .await
            .map_err(LedgerError::Storage)
    }

    async fn recent_for_user(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<NotificationRecord>, LedgerError> {
        db::recent_notifications_for_user(&self.pool, user_id, limit)
            .await
            .map_err(LedgerError::Storage)
    }
}
