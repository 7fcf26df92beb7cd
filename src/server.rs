//! HTTP surface: upload page, CSV upload, manual trigger, read-only views.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Query};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use crate::error::ReminderError;
use crate::ingest::{parse_deals_csv, IngestError, IngestReport};
use crate::reminder::{plan_reminders, NotificationGroups};
use crate::scheduler::{get_next_run_time, SchedulerMessage};
use crate::state::AppState;
use crate::types::{Deal, ExecutionRecord, ExecutionTrigger};

/// Largest accepted upload (20 MiB)
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

const DEFAULT_HISTORY_LIMIT: usize = 20;

const UPLOAD_PAGE: &str = include_str!("../assets/upload.html");

/// Handle for enqueueing manual reminder passes
#[derive(Clone)]
pub struct TriggerSender(pub mpsc::Sender<SchedulerMessage>);

#[tracing::instrument(level = "debug", skip_all)]
pub fn router(state: Arc<AppState>, trigger: TriggerSender) -> Router {
    Router::new()
        .route("/", get(upload_page))
        .route("/upload", post(upload_deals))
        .route("/deals", get(list_deals))
        .route("/reminders/preview", get(preview_reminders))
        .route("/reminders/run", post(run_reminders))
        .route("/reminders/history", get(reminder_history))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(Extension(state))
        .layer(Extension(trigger))
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(addr: SocketAddr, app: Router) -> Result<(), ReminderError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Shutdown signal received");
            }
        })
        .await?;
    Ok(())
}

async fn upload_page() -> Html<&'static str> {
    Html(UPLOAD_PAGE)
}

/// Replace every stored deal with the rows of the uploaded CSV.
#[tracing::instrument(level = "debug", skip_all)]
async fn upload_deals(
    Extension(state): Extension<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<IngestReport>, ReminderError> {
    let mut upload: Option<Bytes> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ReminderError::InvalidRequest(e.to_string()))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ReminderError::InvalidRequest(e.to_string()))?;
            upload = Some(bytes);
            break;
        }
    }

    let bytes = upload.ok_or(IngestError::MissingFile)?;
    let parsed = parse_deals_csv(bytes.as_ref())?;
    let imported = state.with_db(|db| Ok(db.replace_all_deals(&parsed.deals)?))?;

    log::info!(
        "Deals upload: {} imported, {} skipped",
        imported,
        parsed.skipped
    );
    Ok(Json(IngestReport {
        imported,
        skipped: parsed.skipped,
    }))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list_deals(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<Deal>>, ReminderError> {
    let deals = state.with_db(|db| Ok(db.list_deals()?))?;
    Ok(Json(deals))
}

/// What a pass would send right now, without sending it.
#[tracing::instrument(level = "debug", skip_all)]
async fn preview_reminders(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<NotificationGroups>, ReminderError> {
    let settings = state.config_snapshot().reminder_settings();
    let deals = state.with_db(|db| Ok(db.list_deals()?))?;
    Ok(Json(plan_reminders(&deals, &settings, Utc::now())))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn run_reminders(
    Extension(TriggerSender(sender)): Extension<TriggerSender>,
) -> Result<(StatusCode, Json<Value>), ReminderError> {
    sender
        .send(SchedulerMessage {
            trigger: ExecutionTrigger::Manual,
        })
        .await
        .map_err(|_| ReminderError::ExecutorUnavailable)?;

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "queued" }))))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

#[tracing::instrument(level = "debug", skip_all)]
async fn reminder_history(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<ExecutionRecord>> {
    Json(state.get_execution_history(query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let schedule = state.config_snapshot().schedule;
    let next_run_at = if schedule.enabled {
        get_next_run_time(&schedule, Utc::now()).ok()
    } else {
        None
    };
    Json(json!({ "status": "ok", "nextRunAt": next_run_at }))
}
