//! Configuration loader and validator for the appointment-portal notifier.
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email pattern"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub smtp: Smtp,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Operational timezone as minutes east of UTC (330 = Asia/Colombo).
    pub utc_offset_minutes: i32,
    /// Five-field cron expression for the daily reminder trigger, local time.
    pub reminder_schedule: String,
    /// Notifications-on-record ceiling per user before dispatch is refused.
    pub rate_limit_per_user: u32,
    /// Per-recipient mail send timeout; a timeout counts as delivery failure.
    pub transport_timeout_seconds: u64,
}

/// SMTP relay settings for the mail transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Smtp {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    pub starttls: bool,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.reminder_schedule.trim().is_empty() {
        return Err(ConfigError::Invalid("app.reminder_schedule must be non-empty"));
    }
    if cfg.app.rate_limit_per_user == 0 {
        return Err(ConfigError::Invalid("app.rate_limit_per_user must be > 0"));
    }
    if cfg.app.transport_timeout_seconds == 0 {
        return Err(ConfigError::Invalid("app.transport_timeout_seconds must be > 0"));
    }
    // chrono caps fixed offsets at +/- 24h; real-world zones stay within 14h.
    if cfg.app.utc_offset_minutes.abs() > 14 * 60 {
        return Err(ConfigError::Invalid(
            "app.utc_offset_minutes must be within +/- 840",
        ));
    }

    if cfg.smtp.host.trim().is_empty() {
        return Err(ConfigError::Invalid("smtp.host must be non-empty"));
    }
    if cfg.smtp.port == 0 {
        return Err(ConfigError::Invalid("smtp.port must be > 0"));
    }
    if !EMAIL_RE.is_match(&cfg.smtp.from_address) {
        return Err(ConfigError::Invalid(
            "smtp.from_address must be a valid email address",
        ));
    }

    Ok(())
}

/// Example YAML used by tests and as a starting point for deployments.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  utc_offset_minutes: 330
  reminder_schedule: "30 18 * * *"
  rate_limit_per_user: 10
  transport_timeout_seconds: 5

smtp:
  host: "smtp.gov.example"
  port: 587
  username: "notifications"
  password: "CHANGE_ME"
  from_address: "no-reply@appointments.gov.example"
  starttls: true
"#
}
