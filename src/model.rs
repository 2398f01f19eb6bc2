use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotificationKind {
    Generic,
    AppointmentReminder,
    AppointmentConfirmation,
    AppointmentCancellation,
    DocumentStatus,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Generic => "generic",
            NotificationKind::AppointmentReminder => "appointment_reminder",
            NotificationKind::AppointmentConfirmation => "appointment_confirmation",
            NotificationKind::AppointmentCancellation => "appointment_cancellation",
            NotificationKind::DocumentStatus => "document_status",
        }
    }

    pub fn parse_kind(s: &str) -> Option<Self> {
        match s {
            "generic" => Some(NotificationKind::Generic),
            "appointment_reminder" => Some(NotificationKind::AppointmentReminder),
            "appointment_confirmation" => Some(NotificationKind::AppointmentConfirmation),
            "appointment_cancellation" => Some(NotificationKind::AppointmentCancellation),
            "document_status" => Some(NotificationKind::DocumentStatus),
            _ => None,
        }
    }
}

/// Delivery channel. Only email is wired to a transport; sms and in_app are
/// modeled so ledger rows written by other portal components stay readable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotificationChannel {
    Email,
    Sms,
    InApp,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Email => "email",
            NotificationChannel::Sms => "sms",
            NotificationChannel::InApp => "in_app",
        }
    }

    pub fn parse_channel(s: &str) -> Option<Self> {
        match s {
            "email" => Some(NotificationChannel::Email),
            "sms" => Some(NotificationChannel::Sms),
            "in_app" => Some(NotificationChannel::InApp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotificationStatus {
    Queued,
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Queued => "queued",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(NotificationStatus::Queued),
            "sent" => Some(NotificationStatus::Sent),
            "failed" => Some(NotificationStatus::Failed),
            _ => None,
        }
    }
}

/// One persisted notification attempt. The id is assigned by the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: i64,
    pub user_id: String,
    pub appointment_id: Option<String>,
    pub kind: NotificationKind,
    pub channel: NotificationChannel,
    pub message: String,
    pub status: NotificationStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Creation payload for the ledger. Every record starts out `queued`.
#[derive(Debug, Clone)]
pub struct NotificationDraft {
    pub user_id: String,
    pub appointment_id: Option<String>,
    pub kind: NotificationKind,
    pub channel: NotificationChannel,
    pub message: String,
}

/// Counters for one reminder batch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderRunStats {
    pub total_appointments: u32,
    pub citizen_reminders_sent: u32,
    pub officer_reminders_sent: u32,
    pub duplicates_skipped: u32,
    pub failures: u32,
    pub processing_time_ms: u64,
}

/// Dry-run view of a target date, for monitoring dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderStatistics {
    pub scheduled: u32,
    pub already_reminded: u32,
    pub pending: u32,
}

/// Read-only view of a portal appointment row. Optional fields reflect data
/// gaps in the portal; a missing slot or service never blocks a reminder.
#[derive(Debug, Clone)]
pub struct AppointmentSnapshot {
    pub id: String,
    pub booking_reference: String,
    pub citizen_id: String,
    pub citizen_name: Option<String>,
    pub citizen_email: String,
    pub officer_id: Option<String>,
    pub officer_name: Option<String>,
    pub officer_email: Option<String>,
    pub service_name: Option<String>,
    pub department_name: Option<String>,
    pub slot_date: Option<NaiveDate>,
    pub slot_start: Option<String>,
    pub slot_end: Option<String>,
}

impl AppointmentSnapshot {
    /// True when an officer is assigned with a reachable address.
    pub fn has_officer(&self) -> bool {
        self.officer_email
            .as_deref()
            .is_some_and(|e| !e.trim().is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub user_id: String,
    pub appointment_id: Option<String>,
    pub kind: NotificationKind,
    pub recipient_email: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchFailure {
    RateLimited,
    PersistError,
    TransportError,
}

impl DispatchFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchFailure::RateLimited => "rate_limited",
            DispatchFailure::PersistError => "persist_error",
            DispatchFailure::TransportError => "transport_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchResult {
    pub sent: bool,
    pub reason: Option<DispatchFailure>,
}

impl DispatchResult {
    pub fn delivered() -> Self {
        Self {
            sent: true,
            reason: None,
        }
    }

    pub fn rejected(reason: DispatchFailure) -> Self {
        Self {
            sent: false,
            reason: Some(reason),
        }
    }
}
