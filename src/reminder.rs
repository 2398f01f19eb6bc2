//! Reminder batch processor: one pass over a target date's appointments.
//!
//! Per-appointment problems are absorbed into the run statistics so one bad
//! row cannot sink the batch; only a failure to fetch the appointment list
//! propagates to the scheduler as a failed run.

use crate::appointments::AppointmentStore;
use crate::clock::Clock;
use crate::dispatcher::NotificationDispatcher;
use crate::ledger::NotificationLedger;
use crate::model::{
    AppointmentSnapshot, DispatchRequest, NotificationKind, ReminderRunStats, ReminderStatistics,
};
use anyhow::{Context, Result};
use chrono::{Days, FixedOffset, NaiveDate};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

pub struct ReminderBatchProcessor {
    store: Arc<dyn AppointmentStore>,
    ledger: Arc<dyn NotificationLedger>,
    dispatcher: Arc<NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    utc_offset: FixedOffset,
}

impl ReminderBatchProcessor {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        ledger: Arc<dyn NotificationLedger>,
        dispatcher: Arc<NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        utc_offset: FixedOffset,
    ) -> Self {
        Self {
            store,
            ledger,
            dispatcher,
            clock,
            utc_offset,
        }
    }

    /// "Tomorrow" in the operational timezone; the default batch target.
    pub fn default_target_date(&self) -> NaiveDate {
        let today = self
            .clock
            .now_utc()
            .with_timezone(&self.utc_offset)
            .date_naive();
        today.checked_add_days(Days::new(1)).unwrap_or(today)
    }

    /// Run the reminder batch once for `target_date`.
    #[instrument(skip_all, fields(date = %target_date))]
    pub async fn run_once(&self, target_date: NaiveDate) -> Result<ReminderRunStats> {
        let started = Instant::now();
        let appointments = self
            .store
            .find_appointments_for_reminder(target_date)
            .await
            .context("failed to fetch appointments for reminder run")?;

        let mut stats = ReminderRunStats {
            total_appointments: appointments.len() as u32,
            ..Default::default()
        };

        for appointment in &appointments {
            match self.ledger.reminder_already_sent(&appointment.id).await {
                Ok(true) => {
                    stats.duplicates_skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    // Without the duplicate check we cannot dispatch safely;
                    // skip this appointment and let the next run retry it.
                    warn!(?err, appointment = %appointment.id, "duplicate check failed");
                    stats.failures += 1;
                    continue;
                }
            }

            let citizen_request = self.citizen_request(appointment);
            if self.dispatcher.dispatch(&citizen_request).await.sent {
                stats.citizen_reminders_sent += 1;
            } else {
                stats.failures += 1;
            }

            if appointment.has_officer() {
                let officer_request = self.officer_request(appointment);
                if self.dispatcher.dispatch(&officer_request).await.sent {
                    stats.officer_reminders_sent += 1;
                } else {
                    stats.failures += 1;
                }
            }
        }

        stats.processing_time_ms = started.elapsed().as_millis() as u64;
        info!(
            total = stats.total_appointments,
            citizen = stats.citizen_reminders_sent,
            officer = stats.officer_reminders_sent,
            skipped = stats.duplicates_skipped,
            failures = stats.failures,
            elapsed_ms = stats.processing_time_ms,
            "reminder batch finished"
        );
        Ok(stats)
    }

    /// Monitoring view of `target_date` (default tomorrow): how many
    /// appointments are scheduled, already reminded, or still pending.
    /// Dispatches nothing.
    pub async fn get_statistics(
        &self,
        target_date: Option<NaiveDate>,
    ) -> Result<ReminderStatistics> {
        let date = target_date.unwrap_or_else(|| self.default_target_date());
        let appointments = self
            .store
            .find_appointments_for_reminder(date)
            .await
            .context("failed to fetch appointments for statistics")?;

        let mut already_reminded = 0u32;
        for appointment in &appointments {
            match self.ledger.reminder_already_sent(&appointment.id).await {
                Ok(true) => already_reminded += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(?err, appointment = %appointment.id, "duplicate check failed");
                }
            }
        }

        let scheduled = appointments.len() as u32;
        Ok(ReminderStatistics {
            scheduled,
            already_reminded,
            pending: scheduled - already_reminded,
        })
    }

    fn citizen_request(&self, appointment: &AppointmentSnapshot) -> DispatchRequest {
        let service = service_label(appointment);
        let slot = slot_label(appointment);
        let name = appointment.citizen_name.as_deref().unwrap_or("Citizen");
        let department = appointment.department_name.as_deref().unwrap_or("");

        let mut text_body = format!(
            "Dear {name},\n\nThis is a reminder of your upcoming appointment.\n\n\
             Service: {service}\n"
        );
        if !department.is_empty() {
            text_body.push_str(&format!("Department: {department}\n"));
        }
        text_body.push_str(&format!(
            "When: {slot}\nBooking reference: {}\n\n\
             Please arrive 15 minutes early and bring your booking reference.",
            appointment.booking_reference
        ));

        DispatchRequest {
            user_id: appointment.citizen_id.clone(),
            appointment_id: Some(appointment.id.clone()),
            kind: NotificationKind::AppointmentReminder,
            recipient_email: appointment.citizen_email.clone(),
            subject: format!("Reminder: {service} appointment, {slot}"),
            text_body,
            html_body: None,
        }
    }

    /// Officer-addressed counterpart; includes the citizen's contact details
    /// so the officer can prepare or reach out.
    fn officer_request(&self, appointment: &AppointmentSnapshot) -> DispatchRequest {
        let service = service_label(appointment);
        let slot = slot_label(appointment);
        let officer = appointment.officer_name.as_deref().unwrap_or("Officer");
        let citizen = appointment.citizen_name.as_deref().unwrap_or("a citizen");

        let text_body = format!(
            "Dear {officer},\n\nYou have an appointment scheduled.\n\n\
             Service: {service}\nWhen: {slot}\n\
             Citizen: {citizen} ({})\nBooking reference: {}\n",
            appointment.citizen_email, appointment.booking_reference
        );

        DispatchRequest {
            user_id: appointment
                .officer_id
                .clone()
                .unwrap_or_else(|| appointment.citizen_id.clone()),
            appointment_id: Some(appointment.id.clone()),
            kind: NotificationKind::AppointmentReminder,
            recipient_email: appointment
                .officer_email
                .clone()
                .unwrap_or_default(),
            subject: format!("Scheduled appointment: {service}, {slot}"),
            text_body,
            html_body: None,
        }
    }
}

fn service_label(appointment: &AppointmentSnapshot) -> &str {
    appointment
        .service_name
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("Unknown Service")
}

fn slot_label(appointment: &AppointmentSnapshot) -> String {
    match &appointment.slot_date {
        Some(date) => match (&appointment.slot_start, &appointment.slot_end) {
            (Some(start), Some(end)) => format!("{date} {start}-{end}"),
            (Some(start), None) => format!("{date} {start}"),
            _ => format!("{date}"),
        },
        None => "Date/Time TBD".to_string(),
    }
}
