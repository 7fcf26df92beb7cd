//! Scheduler for the cron-based reminder pass
//!
//! Handles:
//! - Cron expression parsing (5-field)
//! - Timezone-aware scheduling
//! - Sleep/wake detection via time-jump polling
//! - Missed run handling (runs if within grace period)

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tokio::sync::mpsc;

use crate::error::ReminderError;
use crate::state::AppState;
use crate::types::{ExecutionTrigger, ScheduleEntry};

/// Grace period for missed runs (2 hours)
const MISSED_JOB_GRACE_PERIOD_SECS: i64 = 7200;

/// Time jump threshold to detect sleep/wake (5 minutes)
const TIME_JUMP_THRESHOLD_SECS: i64 = 300;

/// Poll interval for scheduler loop (1 minute)
const POLL_INTERVAL_SECS: u64 = 60;

/// Window around a scheduled time in which a poll counts as on time
const DUE_WINDOW_SECS: i64 = 120;

/// Message sent to trigger a reminder pass
#[derive(Debug, Clone)]
pub struct SchedulerMessage {
    pub trigger: ExecutionTrigger,
}

pub struct Scheduler {
    state: Arc<AppState>,
    sender: mpsc::Sender<SchedulerMessage>,
}

impl Scheduler {
    pub fn new(state: Arc<AppState>, sender: mpsc::Sender<SchedulerMessage>) -> Self {
        Self { state, sender }
    }

    /// Start the scheduler loop
    ///
    /// Runs until the executor side of the channel is dropped.
    pub async fn run(&self) {
        let mut last_check = Utc::now();

        loop {
            tokio::time::sleep(Duration::from_secs(POLL_INTERVAL_SECS)).await;
            if self.sender.is_closed() {
                log::info!("Scheduler stopping: executor channel closed");
                return;
            }

            let now = Utc::now();
            let entry = self.state.config_snapshot().schedule;

            if entry.enabled {
                let time_jump = (now - last_check).num_seconds();
                if time_jump > TIME_JUMP_THRESHOLD_SECS {
                    log::info!(
                        "Detected system wake (time jumped {} seconds), checking for missed reminder run",
                        time_jump
                    );
                    self.check_missed_run(&entry, now).await;
                }

                self.check_due_run(&entry, now).await;
            }

            last_check = now;
        }
    }

    async fn check_due_run(&self, entry: &ScheduleEntry, now: DateTime<Utc>) {
        let last_run = self.state.get_last_scheduled_run();
        match due_run_time(entry, now, last_run) {
            Ok(Some(scheduled)) => {
                self.state.set_last_scheduled_run(scheduled);
                self.trigger(ExecutionTrigger::Scheduled).await;
            }
            Ok(None) => {}
            Err(e) => log::warn!("Skipping scheduled reminder check: {}", e),
        }
    }

    async fn check_missed_run(&self, entry: &ScheduleEntry, now: DateTime<Utc>) {
        let last_run = self.state.get_last_scheduled_run();
        match find_missed_run(entry, now, last_run) {
            Ok(Some(scheduled)) => {
                log::info!("Found missed reminder run scheduled for {}, running now", scheduled);
                self.state.set_last_scheduled_run(scheduled);
                self.trigger(ExecutionTrigger::Missed).await;
            }
            Ok(None) => {}
            Err(e) => log::warn!("Skipping missed reminder check: {}", e),
        }
    }

    async fn trigger(&self, trigger: ExecutionTrigger) {
        if self.sender.send(SchedulerMessage { trigger }).await.is_err() {
            log::error!("Failed to send scheduler message ({:?})", trigger);
        }
    }
}

/// Parse a 5-field cron expression
pub fn parse_cron(expr: &str) -> Result<Schedule, ReminderError> {
    // The cron crate expects 6 fields (with seconds); prepend "0".
    let full_expr = format!("0 {}", expr);

    full_expr.parse::<Schedule>().map_err(|e| {
        ReminderError::ConfigurationError(format!("Invalid cron expression '{}': {}", expr, e))
    })
}

pub fn parse_timezone(name: &str) -> Result<Tz, ReminderError> {
    name.parse()
        .map_err(|_| ReminderError::ConfigurationError(format!("Invalid timezone: {}", name)))
}

/// The scheduled time that is due at `now`, unless it already ran.
///
/// A time is due when `now` is within two minutes of it.
pub fn due_run_time(
    entry: &ScheduleEntry,
    now: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
) -> Result<Option<DateTime<Utc>>, ReminderError> {
    let schedule = parse_cron(&entry.cron)?;
    let tz = parse_timezone(&entry.timezone)?;
    let now_local = now.with_timezone(&tz);

    let window_start = now_local - chrono::Duration::seconds(DUE_WINDOW_SECS);
    let Some(next_time) = schedule.after(&window_start).next() else {
        return Ok(None);
    };

    let next_utc = next_time.with_timezone(&Utc);
    if (now - next_utc).num_seconds().abs() >= DUE_WINDOW_SECS {
        return Ok(None);
    }

    if let Some(last) = last_run {
        if (last - next_utc).num_seconds().abs() < 60 {
            return Ok(None);
        }
    }

    Ok(Some(next_utc))
}

/// Find a scheduled time inside the grace period that never ran.
pub fn find_missed_run(
    entry: &ScheduleEntry,
    now: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
) -> Result<Option<DateTime<Utc>>, ReminderError> {
    let schedule = parse_cron(&entry.cron)?;
    let tz = parse_timezone(&entry.timezone)?;

    let grace_start =
        now.with_timezone(&tz) - chrono::Duration::seconds(MISSED_JOB_GRACE_PERIOD_SECS);

    for scheduled in schedule.after(&grace_start) {
        let scheduled_utc = scheduled.with_timezone(&Utc);

        if scheduled_utc > now {
            break;
        }

        if let Some(last) = last_run {
            if last >= scheduled_utc {
                continue;
            }
        }

        return Ok(Some(scheduled_utc));
    }

    Ok(None)
}

/// Get the next scheduled time for the reminder pass
pub fn get_next_run_time(
    entry: &ScheduleEntry,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ReminderError> {
    let schedule = parse_cron(&entry.cron)?;
    let tz = parse_timezone(&entry.timezone)?;

    let next = schedule.after(&now.with_timezone(&tz)).next().ok_or_else(|| {
        ReminderError::ConfigurationError("No upcoming scheduled time".to_string())
    })?;

    Ok(next.with_timezone(&Utc))
}
