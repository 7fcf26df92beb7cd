use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // `log` records from the library are bridged into this subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = deal_reminder_lib::run().await {
        log::error!("deal-reminder exited: {} ({})", e, e.recovery_suggestion());
        std::process::exit(1);
    }
}
