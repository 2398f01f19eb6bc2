use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use portal_notify::appointments::SqliteAppointmentStore;
use portal_notify::clock::{operational_offset, SystemClock};
use portal_notify::config;
use portal_notify::db;
use portal_notify::dispatcher::NotificationDispatcher;
use portal_notify::ledger::SqliteLedger;
use portal_notify::mailer::SmtpMailer;
use portal_notify::reminder::ReminderBatchProcessor;
use portal_notify::scheduler::SchedulerSupervisor;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
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
    let processor = ReminderBatchProcessor::new(store, ledger, dispatcher, clock.clone(), offset);

    let supervisor = SchedulerSupervisor::new(processor, clock, offset);
    supervisor.initialize(&cfg.app.reminder_schedule)?;
    supervisor.start()?;
    info!(schedule = %cfg.app.reminder_schedule, "reminder scheduler armed");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    if let Err(err) = supervisor.stop() {
        error!(?err, "failed to stop scheduler");
    }

    Ok(())
}
