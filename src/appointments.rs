//! Read-only view over the portal's appointment store.

use crate::db::{self, Pool};
use crate::model::AppointmentSnapshot;
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// All appointments whose timeslot falls on `date`.
    async fn find_appointments_for_reminder(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<AppointmentSnapshot>>;
}

/// Adapter over the portal's `appointments` table. The notifier shares the
/// portal's SQLite file and never writes to this table.
#[derive(Debug, Clone)]
pub struct SqliteAppointmentStore {
    pool: Pool,
}

impl SqliteAppointmentStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AppointmentStore for SqliteAppointmentStore {
    async fn find_appointments_for_reminder(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<AppointmentSnapshot>> {
        db::fetch_appointments_on(&self.pool, date).await
    }
}
