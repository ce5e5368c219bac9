//! Database connection pool setup.

use std::str::FromStr;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::info;

/// Create a SQLite connection pool and run migrations.
///
/// Migrations are embedded at compile time and applied in ascending version
/// order on startup; each runs in its own transaction.
pub async fn open(path: &str) -> Result<SqlitePool, sqlx::Error> {
    info!(path, "opening database");

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{path}?mode=rwc"))?
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    info!("running migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("database ready");
    Ok(pool)
}
