//! Embedded schema migrations for the deal store.
//!
//! SQL files are compiled in with `include_str!` and applied in version order.
//! Applied versions are recorded in `schema_version`.

use rusqlite::Connection;

struct Migration {
    version: i32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: include_str!("migrations/001_baseline.sql"),
}];

fn ensure_version_table(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("Cannot create schema_version: {}", e))
}

/// Highest applied version; 0 for a new database.
fn applied_version(conn: &Connection) -> Result<i32, String> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| format!("Cannot read schema_version: {}", e))
}

/// Bring the schema up to date.
///
/// Each pending migration and its version row commit together. A database
/// written by a newer build is left untouched and reported as an error.
/// Returns how many migrations were applied.
pub fn run_migrations(conn: &Connection) -> Result<usize, String> {
    ensure_version_table(conn)?;

    let applied = applied_version(conn)?;
    let latest = MIGRATIONS.last().map_or(0, |m| m.version);
    if applied > latest {
        return Err(format!(
            "Database schema version {} is newer than this build supports ({}); \
             upgrade deal-reminder",
            applied, latest
        ));
    }

    let mut count = 0;
    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        let batch = format!(
            "BEGIN;\n{}\nINSERT INTO schema_version (version) VALUES ({});\nCOMMIT;",
            migration.sql, migration.version
        );
        if let Err(e) = conn.execute_batch(&batch) {
            let _ = conn.execute_batch("ROLLBACK;");
            return Err(format!("Migration v{} failed: {}", migration.version, e));
        }
        log::info!("Deal store schema migrated to v{}", migration.version);
        count += 1;
    }

    Ok(count)
}
