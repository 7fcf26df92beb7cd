//! Reminder pass execution engine
//!
//! Receives trigger messages (scheduled, missed, manual) over one channel, so
//! passes never overlap. Each pass reads the deals fresh, runs filter → group
//! → dispatch, and stores an execution record with per-recipient outcomes.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;

use crate::error::ReminderError;
use crate::notification::MailSender;
use crate::reminder::{run_reminder_pass, ReminderReport};
use crate::scheduler::SchedulerMessage;
use crate::state::{create_execution_record, AppState};
use crate::types::ExecutionTrigger;

pub struct Executor {
    state: Arc<AppState>,
    mailer: Arc<dyn MailSender>,
}

impl Executor {
    pub fn new(state: Arc<AppState>, mailer: Arc<dyn MailSender>) -> Self {
        Self { state, mailer }
    }

    /// Start the executor loop
    ///
    /// Runs until every sender of the channel is dropped.
    pub async fn run(&self, mut receiver: mpsc::Receiver<SchedulerMessage>) {
        while let Some(msg) = receiver.recv().await {
            log::info!("Executing reminder pass (trigger: {:?})", msg.trigger);

            if let Err(e) = self.execute(msg.trigger).await {
                log::error!("Reminder pass failed: {}", e);
            }
        }
    }

    /// Execute one reminder pass and record it in history
    pub async fn execute(
        &self,
        trigger: ExecutionTrigger,
    ) -> Result<ReminderReport, ReminderError> {
        let record = create_execution_record(trigger);
        let execution_id = record.id.clone();
        let started_at = record.started_at;
        self.state.add_execution_record(record);

        let result = self.run_pass().await;

        let finished_at = Utc::now();
        let duration_secs = (finished_at - started_at).num_seconds().max(0) as u64;

        self.state.update_execution_record(&execution_id, |r| {
            r.finished_at = Some(finished_at);
            r.duration_secs = Some(duration_secs);
            match &result {
                Ok(report) => {
                    r.success = report.failed_deliveries() == 0;
                    r.deals_considered = report.deals_considered;
                    r.stale_deals = report.stale_deals;
                    r.unroutable_deals = report.unroutable_deals;
                    r.deliveries = report.deliveries.clone();
                    if !r.success {
                        r.error_message = Some(format!(
                            "{} of {} summary emails failed",
                            report.failed_deliveries(),
                            report.deliveries.len()
                        ));
                    }
                }
                Err(err) => {
                    r.success = false;
                    r.error_message = Some(err.to_string());
                }
            }
        });

        result
    }

    async fn run_pass(&self) -> Result<ReminderReport, ReminderError> {
        let settings = self.state.config_snapshot().reminder_settings();
        // The lock is released before any send is awaited.
        let deals = self.state.with_db(|db| Ok(db.list_deals()?))?;

        Ok(run_reminder_pass(&deals, &settings, Utc::now(), self.mailer.as_ref()).await)
    }
}
