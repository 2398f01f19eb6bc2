use crate::model::{
    AppointmentSnapshot, NotificationChannel, NotificationDraft, NotificationKind,
    NotificationRecord, NotificationStatus,
};
use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the
/// parent directory exists. Leaves in-memory URLs untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<NotificationRecord> {
    let kind_str: String = row.get("kind");
    let kind = NotificationKind::parse_kind(&kind_str)
        .ok_or_else(|| anyhow!("unknown notification kind {}", kind_str))?;
    let channel_str: String = row.get("channel");
    let channel = NotificationChannel::parse_channel(&channel_str)
        .ok_or_else(|| anyhow!("unknown notification channel {}", channel_str))?;
    let status_str: String = row.get("status");
    let status = NotificationStatus::parse_status(&status_str)
        .ok_or_else(|| anyhow!("unknown notification status {}", status_str))?;

    Ok(NotificationRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        appointment_id: row.try_get::<Option<String>, _>("appointment_id").ok().flatten(),
        kind,
        channel,
        message: row.get("message"),
        status,
        sent_at: row
            .try_get::<Option<DateTime<Utc>>, _>("sent_at")
            .ok()
            .flatten(),
        error_detail: row
            .try_get::<Option<String>, _>("error_detail")
            .ok()
            .flatten(),
        created_at: row.get("created_at"),
    })
}

#[instrument(skip_all)]
pub async fn insert_notification(pool: &Pool, draft: &NotificationDraft) -> Result<NotificationRecord> {
    let row = sqlx::query(
        "INSERT INTO notifications (user_id, appointment_id, kind, channel, message, status) \
         VALUES (?, ?, ?, ?, ?, 'queued') RETURNING id, created_at",
    )
    .bind(&draft.user_id)
    .bind(&draft.appointment_id)
    .bind(draft.kind.as_str())
    .bind(draft.channel.as_str())
    .bind(&draft.message)
    .fetch_one(pool)
    .await?;

    Ok(NotificationRecord {
        id: row.get("id"),
        user_id: draft.user_id.clone(),
        appointment_id: draft.appointment_id.clone(),
        kind: draft.kind,
        channel: draft.channel,
        message: draft.message.clone(),
        status: NotificationStatus::Queued,
        sent_at: None,
        error_detail: None,
        created_at: row.get("created_at"),
    })
}

#[instrument(skip_all)]
pub async fn fetch_notification(pool: &Pool, id: i64) -> Result<Option<NotificationRecord>> {
    let row = sqlx::query(
        "SELECT id, user_id, appointment_id, kind, channel, message, status, sent_at, \
                error_detail, created_at \
         FROM notifications WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(Some(record_from_row(&row)?)),
        None => Ok(None),
    }
}

/// Transition a record to a terminal status. Returns `None` for unknown ids.
#[instrument(skip_all)]
pub async fn mark_notification(
    pool: &Pool,
    id: i64,
    status: NotificationStatus,
    sent_at: Option<DateTime<Utc>>,
    error_detail: Option<&str>,
) -> Result<Option<NotificationRecord>> {
    let updated = sqlx::query(
        "UPDATE notifications SET status = ?, sent_at = ?, error_detail = ? WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(sent_at)
    .bind(error_detail)
    .bind(id)
    .execute(pool)
    .await?;

    if updated.rows_affected() == 0 {
        return Ok(None);
    }
    fetch_notification(pool, id).await
}

/// All-time notification count for a user; the rate-limit denominator.
#[instrument(skip_all)]
pub async fn count_notifications_for_user(pool: &Pool, user_id: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// True when any reminder record exists for the appointment. Queued records
/// count: a reminder already in flight must not be duplicated.
#[instrument(skip_all)]
pub async fn reminder_exists_for_appointment(pool: &Pool, appointment_id: &str) -> Result<bool> {
    let exists: i64 = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM notifications \
         WHERE appointment_id = ? AND kind = 'appointment_reminder')",
    )
    .bind(appointment_id)
    .fetch_one(pool)
    .await?;
    Ok(exists != 0)
}

#[instrument(skip_all)]
pub async fn recent_notifications_for_user(
    pool: &Pool,
    user_id: &str,
    limit: i64,
) -> Result<Vec<NotificationRecord>> {
    let rows = sqlx::query(
        "SELECT id, user_id, appointment_id, kind, channel, message, status, sent_at, \
                error_detail, created_at \
         FROM notifications WHERE user_id = ? ORDER BY id DESC LIMIT ?",
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(record_from_row).collect()
}

fn snapshot_from_row(row: &sqlx::sqlite::SqliteRow) -> AppointmentSnapshot {
    AppointmentSnapshot {
        id: row.get("id"),
        booking_reference: row.get("booking_reference"),
        citizen_id: row.get("citizen_id"),
        citizen_name: row.try_get::<Option<String>, _>("citizen_name").ok().flatten(),
        citizen_email: row.get("citizen_email"),
        officer_id: row.try_get::<Option<String>, _>("officer_id").ok().flatten(),
        officer_name: row.try_get::<Option<String>, _>("officer_name").ok().flatten(),
        officer_email: row.try_get::<Option<String>, _>("officer_email").ok().flatten(),
        service_name: row.try_get::<Option<String>, _>("service_name").ok().flatten(),
        department_name: row
            .try_get::<Option<String>, _>("department_name")
            .ok()
            .flatten(),
        slot_date: row.try_get::<Option<NaiveDate>, _>("slot_date").ok().flatten(),
        slot_start: row.try_get::<Option<String>, _>("slot_start").ok().flatten(),
        slot_end: row.try_get::<Option<String>, _>("slot_end").ok().flatten(),
    }
}

/// Appointments booked for `date`, excluding cancellations.
#[instrument(skip_all)]
pub async fn fetch_appointments_on(pool: &Pool, date: NaiveDate) -> Result<Vec<AppointmentSnapshot>> {
    let rows = sqlx::query(
        "SELECT id, booking_reference, citizen_id, citizen_name, citizen_email, \
                officer_id, officer_name, officer_email, service_name, department_name, \
                slot_date, slot_start, slot_end \
         FROM appointments WHERE slot_date = ? AND status != 'cancelled' ORDER BY id",
    )
    .bind(date)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(snapshot_from_row).collect())
}
