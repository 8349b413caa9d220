use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Errors raised while opening the embedded store.
#[derive(Debug, thiserror::Error)]
pub enum OpenStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Handle to the embedded SQLite store.
///
/// Query structs are executed against it through
/// [`kanau::processor::Processor`] implementations living next to each entity.
#[derive(Clone)]
pub struct DatabaseProcessor {
    pub pool: SqlitePool,
}

impl DatabaseProcessor {
    /// Open (creating if missing) the store file at `path` and apply migrations.
    ///
    /// Writes are fully synced before a query returns.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, OpenStoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        Self::migrate(pool).await
    }

    /// Open a private in-memory store.
    ///
    /// The pool is pinned to a single connection that is never recycled,
    /// since every SQLite memory connection is its own database.
    pub async fn open_in_memory() -> Result<Self, OpenStoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, OpenStoreError> {
        sqlx::migrate!("../migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Current UTC time truncated to whole seconds, the resolution of every
/// persisted timestamp column.
pub(crate) fn now_utc_seconds() -> time::OffsetDateTime {
    let now = time::OffsetDateTime::now_utc();
    time::OffsetDateTime::from_unix_timestamp(now.unix_timestamp()).unwrap_or(now)
}
