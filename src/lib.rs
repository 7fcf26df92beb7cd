pub mod db;
pub mod error;
pub mod executor;
pub mod ingest;
mod migrations;
pub mod notification;
pub mod reminder;
pub mod scheduler;
pub mod sendgrid;
pub mod server;
pub mod state;
pub mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use error::ReminderError;
use notification::MailSender;
use state::AppState;

/// Channel buffer size for scheduler messages
const SCHEDULER_CHANNEL_SIZE: usize = 32;

/// Load config, start the scheduler and executor, and serve HTTP until Ctrl-C.
pub async fn run() -> Result<(), ReminderError> {
    let config = state::load_config()?;
    let addr: SocketAddr = config.bind_address.parse().map_err(|_| {
        ReminderError::ConfigurationError(format!("Invalid bind address: {}", config.bind_address))
    })?;

    let mailer: Arc<dyn MailSender> = match config.sendgrid_api_key.as_deref() {
        Some(key) => Arc::new(sendgrid::SendGridClient::new(key)),
        None => {
            log::warn!("SENDGRID_API_KEY not set; reminder emails will be recorded as failed");
            Arc::new(sendgrid::UnconfiguredSender)
        }
    };

    log::info!(
        "Reminder schedule: '{}' ({}), threshold {} days, {} owners in directory",
        config.schedule.cron,
        config.schedule.timezone,
        config.days_threshold,
        config.owner_emails.len()
    );

    let state = Arc::new(AppState::new(config, state::history_dir().ok()));

    // Scheduler and manual HTTP triggers share one channel so passes never overlap.
    let (scheduler_tx, scheduler_rx) = mpsc::channel(SCHEDULER_CHANNEL_SIZE);

    let scheduler_state = state.clone();
    let scheduler_sender = scheduler_tx.clone();
    tokio::spawn(async move {
        let scheduler = scheduler::Scheduler::new(scheduler_state, scheduler_sender);
        scheduler.run().await;
    });

    let executor_state = state.clone();
    tokio::spawn(async move {
        let executor = executor::Executor::new(executor_state, mailer);
        executor.run(scheduler_rx).await;
    });

    let app = server::router(state, server::TriggerSender(scheduler_tx));
    server::serve(addr, app).await
}
