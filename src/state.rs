use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};

use crate::db::DealDb;
use crate::error::ReminderError;
use crate::types::{Config, ExecutionRecord, ExecutionTrigger};

/// Maximum number of execution records to keep in memory
const MAX_HISTORY_SIZE: usize = 100;

/// Env var naming an alternative config file
pub const CONFIG_PATH_ENV: &str = "DEAL_REMINDER_CONFIG";

/// Shared service state
pub struct AppState {
    pub config: RwLock<Config>,
    pub db: Mutex<Option<DealDb>>,
    pub execution_history: Mutex<Vec<ExecutionRecord>>,
    pub last_scheduled_run: Mutex<Option<DateTime<Utc>>>,
    /// Where execution history is persisted; `None` keeps it in memory only.
    history_path: Option<PathBuf>,
}

impl AppState {
    /// Build state from a loaded config, opening the configured database.
    ///
    /// A database that fails to open is logged and left unavailable; uploads
    /// and reminder passes then fail with a database error instead of taking
    /// the whole service down.
    pub fn new(config: Config, history_dir: Option<PathBuf>) -> Self {
        let db = match DealDb::open(config.database_path.as_deref()) {
            Ok(db) => Some(db),
            Err(e) => {
                log::warn!("Failed to open deals database: {e}. Uploads and reminders disabled.");
                None
            }
        };

        let history_path = history_dir.map(|dir| dir.join("execution_history.json"));
        let history = history_path
            .as_deref()
            .and_then(|p| load_execution_history(p).ok())
            .unwrap_or_default();

        Self::with_parts(config, db, history, history_path)
    }

    /// Assemble state from already-opened parts.
    pub fn with_parts(
        config: Config,
        db: Option<DealDb>,
        history: Vec<ExecutionRecord>,
        history_path: Option<PathBuf>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            db: Mutex::new(db),
            execution_history: Mutex::new(history),
            last_scheduled_run: Mutex::new(None),
            history_path,
        }
    }

    /// Current config snapshot
    pub fn config_snapshot(&self) -> Config {
        match self.config.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => {
                log::error!("Config lock poisoned; using last written config");
                poisoned.into_inner().clone()
            }
        }
    }

    /// Run `f` against the open database.
    pub fn with_db<T>(
        &self,
        f: impl FnOnce(&mut DealDb) -> Result<T, ReminderError>,
    ) -> Result<T, ReminderError> {
        let mut guard = self
            .db
            .lock()
            .map_err(|_| ReminderError::IoError("Database lock poisoned".to_string()))?;
        let db = guard.as_mut().ok_or_else(|| {
            ReminderError::ConfigurationError("Deals database is not available".to_string())
        })?;
        f(db)
    }

    /// Add an execution record to history
    pub fn add_execution_record(&self, record: ExecutionRecord) {
        if let Ok(mut guard) = self.execution_history.lock() {
            guard.insert(0, record);

            if guard.len() > MAX_HISTORY_SIZE {
                guard.truncate(MAX_HISTORY_SIZE);
            }
        }

        if let Err(e) = self.save_execution_history() {
            log::warn!("Failed to persist execution history: {}", e);
        }
    }

    /// Update an existing execution record
    pub fn update_execution_record(&self, id: &str, f: impl FnOnce(&mut ExecutionRecord)) {
        if let Ok(mut guard) = self.execution_history.lock() {
            if let Some(record) = guard.iter_mut().find(|r| r.id == id) {
                f(record);
            }
        }

        if let Err(e) = self.save_execution_history() {
            log::warn!("Failed to persist execution history: {}", e);
        }
    }

    /// Get execution history, newest first
    pub fn get_execution_history(&self, limit: usize) -> Vec<ExecutionRecord> {
        self.execution_history
            .lock()
            .map(|guard| guard.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Record when a scheduled run last occurred
    pub fn set_last_scheduled_run(&self, time: DateTime<Utc>) {
        if let Ok(mut guard) = self.last_scheduled_run.lock() {
            *guard = Some(time);
        }
    }

    /// Get when the reminder pass last ran on schedule
    pub fn get_last_scheduled_run(&self) -> Option<DateTime<Utc>> {
        self.last_scheduled_run.lock().ok().and_then(|guard| *guard)
    }

    fn save_execution_history(&self) -> Result<(), String> {
        let Some(path) = self.history_path.as_deref() else {
            return Ok(());
        };

        let history = self
            .execution_history
            .lock()
            .map_err(|_| "Lock poisoned")?
            .clone();

        let content =
            serde_json::to_string_pretty(&history).map_err(|e| format!("Serialize error: {}", e))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| format!("Create dir error: {}", e))?;
        }
        fs::write(path, content).map_err(|e| format!("Write error: {}", e))
    }
}

/// Get the state directory (~/.dealreminder)
pub fn state_dir() -> Result<PathBuf, ReminderError> {
    let home = dirs::home_dir().ok_or_else(|| {
        ReminderError::ConfigurationError("Could not find home directory".to_string())
    })?;
    Ok(home.join(".dealreminder"))
}

/// Resolve the config file path: `$DEAL_REMINDER_CONFIG`, else ~/.dealreminder/config.json
pub fn config_path() -> Result<PathBuf, ReminderError> {
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => Ok(PathBuf::from(path)),
        _ => Ok(state_dir()?.join("config.json")),
    }
}

/// Directory holding `execution_history.json`: the one the config file lives in.
pub fn history_dir() -> Result<PathBuf, ReminderError> {
    Ok(history_dir_for(&config_path()?))
}

fn history_dir_for(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Load config from `path`, then apply environment overrides and validate.
///
/// A missing file yields the defaults; a malformed one is an error.
pub fn load_config_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config, ReminderError> {
    let mut config = if path.exists() {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            ReminderError::ConfigurationError(format!(
                "Failed to parse {}: {}",
                path.display(),
                e
            ))
        })?
    } else {
        log::info!("No config at {}, using defaults", path.display());
        Config::default()
    };

    config.apply_env_overrides(env);
    config.validate()?;

    if config.reminder_settings().directory.is_empty() {
        log::warn!("Owner directory is empty; every deal will be unroutable");
    }

    Ok(config)
}

/// Load config from the default location with process environment overrides.
pub fn load_config() -> Result<Config, ReminderError> {
    load_config_from(&config_path()?, |key| std::env::var(key).ok())
}

fn load_execution_history(path: &Path) -> Result<Vec<ExecutionRecord>, String> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path).map_err(|e| format!("Read error: {}", e))?;
    serde_json::from_str(&content).map_err(|e| format!("Parse error: {}", e))
}

/// Create a new execution record
pub fn create_execution_record(trigger: ExecutionTrigger) -> ExecutionRecord {
    ExecutionRecord {
        id: uuid::Uuid::new_v4().to_string(),
        trigger,
        started_at: Utc::now(),
        finished_at: None,
        duration_secs: None,
        success: false,
        error_message: None,
        deals_considered: 0,
        stale_deals: 0,
        unroutable_deals: 0,
        deliveries: Vec::new(),
    }
}
