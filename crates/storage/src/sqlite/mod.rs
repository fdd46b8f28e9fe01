use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use thiserror::Error;

use crate::repository::{PuzzleRepository, PuzzleSetRepository, Storage, UserRepository};

mod mapping;
mod migrate;
mod puzzle_repo;
mod set_repo;
mod user_repo;

/// Puzzle, set and user tables behind one pool.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SqliteInitError {
    #[error("invalid sqlite url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: sqlx::Error,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

impl SqliteRepository {
    /// Open (creating if missing) the database at `database_url`.
    ///
    /// Set commits rewrite several rows at once, so foreign keys are enforced
    /// and writers wait on the busy timeout instead of failing.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError::InvalidUrl` for an unparsable URL and
    /// `SqliteInitError::Sqlx` if the pool cannot connect.
    pub async fn connect(database_url: &str) -> Result<Self, SqliteInitError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|source| SqliteInitError::InvalidUrl {
                url: database_url.to_owned(),
                source,
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // A private in-memory database lives and dies with one connection.
        let (options, max_connections) = if is_in_memory(database_url) {
            (options, 1)
        } else {
            (options.journal_mode(SqliteJournalMode::Wal), 4)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;
        tracing::debug!(url = database_url, max_connections, "opened puzzle database");
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Bring the schema up to date.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if a migration statement fails.
    pub async fn migrate(&self) -> Result<(), SqliteInitError> {
        migrate::run_migrations(&self.pool).await
    }
}

impl Storage {
    /// Open and migrate `SQLite`, serving all three repositories from it.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if the database cannot be opened or migrated.
    pub async fn sqlite(database_url: &str) -> Result<Self, SqliteInitError> {
        let repo = SqliteRepository::connect(database_url).await?;
        repo.migrate().await?;
        let repo = Arc::new(repo);
        Ok(Self {
            puzzles: Arc::clone(&repo) as Arc<dyn PuzzleRepository>,
            sets: Arc::clone(&repo) as Arc<dyn PuzzleSetRepository>,
            users: repo as Arc<dyn UserRepository>,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SqliteRepository>();
    }

    #[test]
    fn detects_in_memory_urls() {
        assert!(is_in_memory("sqlite::memory:"));
        assert!(is_in_memory("sqlite:file:sets?mode=memory&cache=shared"));
        assert!(!is_in_memory("sqlite:///tmp/puzzles.sqlite3"));
    }
}
