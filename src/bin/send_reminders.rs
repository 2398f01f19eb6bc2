use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use portal_notify::appointments::SqliteAppointmentStore;
use portal_notify::clock::{operational_offset, SystemClock};
use portal_notify::config;
use portal_notify::db;
use portal_notify::dispatcher::NotificationDispatcher;
use portal_notify::ledger::SqliteLedger;
use portal_notify::mailer::SmtpMailer;
use portal_notify::reminder::ReminderBatchProcessor;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run the reminder batch once for a target date and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Target date (YYYY-MM-DD); defaults to tomorrow in the operational
    /// timezone
    #[arg(long)]
    date: Option<String>,

    /// Only print the statistics for the target date; dispatch nothing
    #[arg(long)]
    dry_run: bool,

    /// Why this catch-up run was started (recorded in the logs)
    #[arg(long, default_value = "operator catch-up")]
    reason: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/portal.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let clock: Arc<SystemClock> = Arc::new(SystemClock);
    let offset = operational_offset(cfg.app.utc_offset_minutes);
    let mailer = Arc::new(SmtpMailer::from_config(&cfg.smtp)?);
    let ledger = Arc::new(SqliteLedger::new(pool.clone()));
    let store = Arc::new(SqliteAppointmentStore::new(pool.clone()));

    let dispatcher = Arc::new(NotificationDispatcher::new(
        ledger.clone(),
        mailer,
        clock.clone(),
        cfg.app.rate_limit_per_user as i64,
        Duration::from_secs(cfg.app.transport_timeout_seconds),
    ));
    let processor = ReminderBatchProcessor::new(store, ledger, dispatcher, clock, offset);

    let target_date = match &args.date {
        Some(raw) => raw
            .parse::<NaiveDate>()
            .with_context(|| format!("invalid --date '{raw}', expected YYYY-MM-DD"))?,
        None => processor.default_target_date(),
    };

    if args.dry_run {
        let stats = processor.get_statistics(Some(target_date)).await?;
        info!(
            date = %target_date,
            scheduled = stats.scheduled,
            already_reminded = stats.already_reminded,
            pending = stats.pending,
            "dry run"
        );
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    info!(date = %target_date, reason = %args.reason, "starting catch-up reminder run");
    let stats = processor.run_once(target_date).await?;
    info!(
        total = stats.total_appointments,
        citizen = stats.citizen_reminders_sent,
        officer = stats.officer_reminders_sent,
        skipped = stats.duplicates_skipped,
        failures = stats.failures,
        elapsed_ms = stats.processing_time_ms,
        "catch-up reminder run finished"
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}
