//! SQLite-backed deal store.
//!
//! The database lives at `~/.dealreminder/deals.db` unless the config names
//! another path. Each CSV upload replaces the `deals` table wholesale; the
//! reminder pass reads it fresh every run.

mod deals;

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// SQLite connection wrapper for the deals collection.
///
/// Not `Sync`; held behind a `std::sync::Mutex` in `AppState` and never
/// locked across an `.await`.
pub struct DealDb {
    conn: Connection,
}

impl DealDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Open the configured database, or `~/.dealreminder/deals.db` by default.
    pub fn open(configured: Option<&str>) -> Result<Self, DbError> {
        let path = match configured {
            Some(p) if !p.trim().is_empty() => PathBuf::from(p),
            _ => Self::default_path()?,
        };
        Self::open_at(&path)
    }

    /// Open a database at an explicit path, creating parent directories.
    pub fn open_at(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, DbError> {
        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;
        Ok(Self { conn })
    }

    /// Resolve the default database path: `~/.dealreminder/deals.db`.
    fn default_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".dealreminder").join("deals.db"))
    }
}
