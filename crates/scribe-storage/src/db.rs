//! SQLite pool opening and additive migration helpers

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use scribe_core::{Error, Result};

/// Open (or create) a SQLite database with the platform's standard options.
///
/// One connection per pool, and one pool per database file: stores that
/// share a file must share the pool (see `Database::with_pool` and the job
/// store's `with_pool`), which keeps transactions short and serialized and
/// avoids SQLITE_BUSY under concurrent handlers.
pub async fn open_pool(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(|e| Error::storage(format!("bad database url {url}: {e}")))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| Error::storage(format!("open {url}: {e}")))
}

/// Additive migration: add `column_ddl` to `table` unless the column exists.
///
/// Schema versioning is by column presence, so re-running is a no-op.
pub async fn ensure_column(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    column_ddl: &str,
) -> Result<()> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
        .fetch_all(pool)
        .await
        .map_err(|e| Error::storage(e.to_string()))?;

    let exists = rows
        .iter()
        .any(|row| row.get::<String, _>("name") == column);
    if !exists {
        sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {column_ddl}"))
            .execute(pool)
            .await
            .map_err(|e| Error::storage(e.to_string()))?;
    }
    Ok(())
}
