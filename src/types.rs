use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReminderError;
use crate::reminder::{OwnerDirectory, ReminderSettings};

/// Configuration stored in ~/.dealreminder/config.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Owner identifier (as it appears in the CSV) → email address.
    #[serde(default)]
    pub owner_emails: HashMap<String, String>,
    /// Addresses copied on every summary email.
    #[serde(default)]
    pub cc_emails: Vec<String>,
    #[serde(default)]
    pub sender_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sendgrid_api_key: Option<String>,
    /// Days without activity before a deal counts as stale.
    #[serde(default = "default_days_threshold")]
    pub days_threshold: u32,
    #[serde(default)]
    pub schedule: ScheduleEntry,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Overrides the default `~/.dealreminder/deals.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
}

fn default_days_threshold() -> u32 {
    10
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            owner_emails: HashMap::new(),
            cc_emails: Vec::new(),
            sender_email: String::new(),
            sendgrid_api_key: None,
            days_threshold: default_days_threshold(),
            schedule: ScheduleEntry::default(),
            bind_address: default_bind_address(),
            database_path: None,
        }
    }
}

impl Config {
    /// Apply `SENDER_EMAIL` / `SENDGRID_API_KEY` environment overrides.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(sender) = lookup("SENDER_EMAIL").filter(|s| !s.trim().is_empty()) {
            self.sender_email = sender.trim().to_string();
        }
        if let Some(key) = lookup("SENDGRID_API_KEY").filter(|s| !s.trim().is_empty()) {
            self.sendgrid_api_key = Some(key.trim().to_string());
        }
    }

    /// Reject settings the scheduler or server could not start with.
    pub fn validate(&self) -> Result<(), ReminderError> {
        crate::scheduler::parse_cron(&self.schedule.cron)?;
        crate::scheduler::parse_timezone(&self.schedule.timezone)?;
        let cutoff = crate::reminder::stale_cutoff(self.days_threshold, Utc::now());
        if cutoff.is_none() {
            return Err(ReminderError::ConfigurationError(format!(
                "daysThreshold {} is out of range",
                self.days_threshold
            )));
        }
        if self.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(ReminderError::ConfigurationError(format!(
                "Invalid bind address: {}",
                self.bind_address
            )));
        }
        Ok(())
    }

    /// Snapshot of everything a reminder pass needs.
    pub fn reminder_settings(&self) -> ReminderSettings {
        ReminderSettings {
            directory: OwnerDirectory::from_iter(self.owner_emails.clone()),
            threshold_days: self.days_threshold,
            cc: self.cc_emails.clone(),
            sender: self.sender_email.clone(),
        }
    }
}

/// Cron schedule for the reminder pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub enabled: bool,
    /// Five-field cron expression.
    pub cron: String,
    pub timezone: String,
}

impl Default for ScheduleEntry {
    /// Every day at 9 AM UTC.
    fn default() -> Self {
        Self {
            enabled: true,
            cron: "0 9 * * *".to_string(),
            timezone: "UTC".to_string(),
        }
    }
}

/// A sales deal as imported from the uploaded CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub record_id: String,
    pub deal_name: String,
    pub deal_owner: String,
    #[serde(default)]
    pub second_owner: Option<String>,
    #[serde(default)]
    pub last_activity_date: Option<DateTime<Utc>>,
    pub deal_stage: String,
}

/// What triggered a reminder pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionTrigger {
    Scheduled,
    Manual,
    Missed,
}

/// Result of handing one summary email to the mail provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status", content = "reason")]
pub enum DeliveryOutcome {
    Sent,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub recipient: String,
    pub deal_count: usize,
    pub outcome: DeliveryOutcome,
}

impl DeliveryReport {
    pub fn is_sent(&self) -> bool {
        self.outcome == DeliveryOutcome::Sent
    }
}

/// Record of a reminder pass execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    pub trigger: ExecutionTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<u64>,
    pub success: bool,
    pub error_message: Option<String>,
    #[serde(default)]
    pub deals_considered: usize,
    #[serde(default)]
    pub stale_deals: usize,
    #[serde(default)]
    pub unroutable_deals: usize,
    #[serde(default)]
    pub deliveries: Vec<DeliveryReport>,
}
