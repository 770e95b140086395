use std::str::FromStr;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::info;

use crate::error::StoreError;

/// Embedded migrations, exposed so ad-hoc pools (tests, tooling) can be
/// brought up to the current schema.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Open (or create) the SQLite database at `url` and run migrations.
///
/// Enables WAL journal mode and foreign keys, and sets a 5-second busy
/// timeout so concurrent writers queue instead of failing outright.
pub async fn connect(url: &str) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    MIGRATOR.run(&pool).await?;

    info!(url, "database ready");

    Ok(pool)
}

/// Open an in-memory database with migrations applied.
///
/// Pinned to a single connection: every `sqlite::memory:` connection is
/// its own database, so a larger pool would hand out empty databases.
pub async fn connect_memory() -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    MIGRATOR.run(&pool).await?;

    Ok(pool)
}
