//! Environment-driven runtime configuration.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};

/// Tunables for a sending run, read from `OUTREACH_*` environment variables
/// with defaults suitable for a personal Gmail-scale account.
#[derive(Debug, Clone)]
pub struct Config {
    /// Hard ceiling on sends per calendar day.
    pub daily_limit: u32,
    /// Minimum seconds between two sends.
    pub delay_min_secs: u64,
    /// Upper bound for the randomized inter-send delay.
    pub delay_max_secs: u64,
    /// Whole days since the last email before a follow-up is due.
    pub followup_days: i64,
    /// Maximum follow-ups per (application, recruiter) pair.
    pub max_followups: i64,
    /// Signature used in rendered emails.
    pub sender_name: String,
    /// Override for the database location.
    pub database_path: Option<PathBuf>,
    /// Directory where the outbox transport drops messages.
    pub outbox_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daily_limit: 50,
            delay_min_secs: 60,
            delay_max_secs: 120,
            followup_days: 7,
            max_followups: 3,
            sender_name: "Job Applicant".to_string(),
            database_path: None,
            outbox_dir: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();
        Ok(Config {
            daily_limit: env_parse("OUTREACH_DAILY_LIMIT", defaults.daily_limit)?,
            delay_min_secs: env_parse("OUTREACH_DELAY_MIN", defaults.delay_min_secs)?,
            delay_max_secs: env_parse("OUTREACH_DELAY_MAX", defaults.delay_max_secs)?,
            followup_days: env_parse("OUTREACH_FOLLOWUP_DAYS", defaults.followup_days)?,
            max_followups: env_parse("OUTREACH_MAX_FOLLOWUPS", defaults.max_followups)?,
            sender_name: std::env::var("OUTREACH_SENDER_NAME")
                .unwrap_or(defaults.sender_name),
            database_path: std::env::var_os("OUTREACH_DATABASE").map(PathBuf::from),
            outbox_dir: std::env::var_os("OUTREACH_OUTBOX").map(PathBuf::from),
        })
    }

    /// Collects every configuration problem instead of stopping at the
    /// first, so the operator can fix them in one pass.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.daily_limit == 0 {
            errors.push("OUTREACH_DAILY_LIMIT must be at least 1".to_string());
        }
        if self.delay_min_secs > self.delay_max_secs {
            errors.push(format!(
                "OUTREACH_DELAY_MIN ({}) must not exceed OUTREACH_DELAY_MAX ({})",
                self.delay_min_secs, self.delay_max_secs
            ));
        }
        if self.followup_days < 1 {
            errors.push("OUTREACH_FOLLOWUP_DAYS must be at least 1".to_string());
        }
        if self.max_followups < 0 {
            errors.push("OUTREACH_MAX_FOLLOWUPS must not be negative".to_string());
        }
        if self.sender_name.trim().is_empty() {
            errors.push("OUTREACH_SENDER_NAME must not be empty".to_string());
        }
        errors
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}
