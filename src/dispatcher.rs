//! Notification dispatcher: rate limit, ledger record, transport call,
//! status reconciliation.
//!
//! The ledger write sequence is the contract: a record exists in `queued`
//! before any transport attempt, and ends in exactly one of `sent` or
//! `failed`. The terminal-status write itself is best-effort bookkeeping;
//! a failure there is logged and does not change the reported outcome.

use crate::clock::Clock;
use crate::ledger::NotificationLedger;
use crate::mailer::MailTransport;
use crate::model::{
    AppointmentSnapshot, DispatchFailure, DispatchRequest, DispatchResult, NotificationChannel,
    NotificationDraft, NotificationKind, NotificationStatus,
};
use crate::qr;
use anyhow::anyhow;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

pub struct NotificationDispatcher {
    ledger: Arc<dyn NotificationLedger>,
    mail: Arc<dyn MailTransport>,
    clock: Arc<dyn Clock>,
    rate_limit_per_user: i64,
    send_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        ledger: Arc<dyn NotificationLedger>,
        mail: Arc<dyn MailTransport>,
        clock: Arc<dyn Clock>,
        rate_limit_per_user: i64,
        send_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            mail,
            clock,
            rate_limit_per_user,
            send_timeout,
        }
    }

    /// Persist one ledger record and attempt delivery. Never raises: every
    /// outcome is a `DispatchResult`.
    #[instrument(skip_all, fields(user = %request.user_id, kind = request.kind.as_str()))]
    pub async fn dispatch(&self, request: &DispatchRequest) -> DispatchResult {
        // Rate limit is fail-open: an unreadable counter must not block
        // delivery.
        match self.ledger.count_for_user(&request.user_id).await {
            Ok(count) if count >= self.rate_limit_per_user => {
                info!(count, limit = self.rate_limit_per_user, "rate limit reached");
                return DispatchResult::rejected(DispatchFailure::RateLimited);
            }
            Ok(_) => {}
            Err(err) => {
                warn!(?err, "rate-limit count failed; proceeding without it");
            }
        }

        let draft = NotificationDraft {
            user_id: request.user_id.clone(),
            appointment_id: request.appointment_id.clone(),
            kind: request.kind,
            channel: NotificationChannel::Email,
            message: request.text_body.clone(),
        };
        let record = match self.ledger.create(&draft).await {
            Ok(record) => record,
            Err(err) => {
                warn!(?err, "failed to persist notification record");
                return DispatchResult::rejected(DispatchFailure::PersistError);
            }
        };

        let delivery = match tokio::time::timeout(
            self.send_timeout,
            self.mail.send(
                &request.recipient_email,
                &request.subject,
                &request.text_body,
                request.html_body.as_deref(),
            ),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(anyhow!(
                "mail transport timed out after {:?}",
                self.send_timeout
            )),
        };

        match delivery {
            Ok(()) => {
                let sent_at = self.clock.now_utc();
                if let Err(err) = self
                    .ledger
                    .update_status(record.id, NotificationStatus::Sent, Some(sent_at), None)
                    .await
                {
                    warn!(?err, id = record.id, "failed to record sent status");
                }
                DispatchResult::delivered()
            }
            Err(err) => {
                warn!(%err, id = record.id, "mail delivery failed");
                let detail = err.to_string();
                if let Err(uerr) = self
                    .ledger
                    .update_status(record.id, NotificationStatus::Failed, None, Some(&detail))
                    .await
                {
                    warn!(?uerr, id = record.id, "failed to record failed status");
                }
                DispatchResult::rejected(DispatchFailure::TransportError)
            }
        }
    }

    /// Booking confirmation with a scannable payload embedded in the HTML
    /// body. A rendering failure downgrades to a plain confirmation; it
    /// never blocks the send.
    pub async fn dispatch_confirmation(&self, appointment: &AppointmentSnapshot) -> DispatchResult {
        let service = appointment.service_name.as_deref().unwrap_or("Unknown Service");
        let name = appointment.citizen_name.as_deref().unwrap_or("Citizen");
        let slot = match (&appointment.slot_date, &appointment.slot_start) {
            (Some(date), Some(start)) => format!("{date} at {start}"),
            _ => "Date/Time TBD".to_string(),
        };

        let subject = format!(
            "Appointment confirmed: {service} ({})",
            appointment.booking_reference
        );
        let text_body = format!(
            "Dear {name},\n\nYour appointment for {service} is confirmed.\n\
             Booking reference: {}\nWhen: {slot}\n\n\
             Please bring this confirmation with you.",
            appointment.booking_reference
        );

        let mut html_body = format!(
            "<p>Dear {name},</p><p>Your appointment for <b>{service}</b> is confirmed.</p>\
             <p>Booking reference: <b>{}</b><br>When: {slot}</p>",
            appointment.booking_reference
        );
        match qr::render_svg(&qr::confirmation_payload(appointment)) {
            Ok(image) => {
                html_body.push_str("<p>Present this code at the service desk:</p>");
                html_body.push_str(&image);
            }
            Err(err) => {
                warn!(
                    ?err,
                    appointment = %appointment.id,
                    "confirmation image rendering failed; sending without it"
                );
            }
        }

        let request = DispatchRequest {
            user_id: appointment.citizen_id.clone(),
            appointment_id: Some(appointment.id.clone()),
            kind: NotificationKind::AppointmentConfirmation,
            recipient_email: appointment.citizen_email.clone(),
            subject,
            text_body,
            html_body: Some(html_body),
        };
        self.dispatch(&request).await
    }
}
