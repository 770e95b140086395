use thiserror::Error;

/// Storage failure classes.
///
/// Repositories return these instead of raw driver errors so callers can
/// branch on what went wrong rather than scraping error strings.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The row the operation targeted does not exist.
    #[error("record not found")]
    NotFound,

    /// A uniqueness rule rejected the write.
    #[error("unique constraint violated")]
    Conflict,

    /// The database rejected the operation and retrying will not help.
    #[error("storage failure: {0}")]
    Fatal(#[source] sqlx::Error),

    #[error("migration failure: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
            _ => StoreError::Fatal(err),
        }
    }
}

/// Whether the error is a transient SQLite busy/locked condition that a
/// short backoff usually clears under WAL.
pub(crate) fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        // SQLITE_BUSY (5), SQLITE_LOCKED (6) and their extended codes.
        sqlx::Error::Database(db) => {
            matches!(db.code().as_deref(), Some("5" | "6" | "261" | "262" | "517"))
                || db.message().contains("database is locked")
                || db.message().contains("database table is locked")
        }
        _ => false,
    }
}
