use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

const SCHEMA_V1: &[&str] = &[
    r"
        CREATE TABLE IF NOT EXISTS puzzles (
            id TEXT PRIMARY KEY,
            fen TEXT NOT NULL,
            moves TEXT NOT NULL,
            themes TEXT NOT NULL DEFAULT ''
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            total_puzzle_solved INTEGER NOT NULL DEFAULT 0 CHECK (total_puzzle_solved >= 0),
            total_set_completed INTEGER NOT NULL DEFAULT 0 CHECK (total_set_completed >= 0),
            daily_streak INTEGER NOT NULL DEFAULT 0 CHECK (daily_streak >= 0),
            is_sponsor INTEGER NOT NULL DEFAULT 0
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS user_themes (
            user_id INTEGER NOT NULL,
            position INTEGER NOT NULL CHECK (position >= 0),
            title TEXT NOT NULL,
            count INTEGER NOT NULL CHECK (count >= 0),
            PRIMARY KEY (user_id, position),
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS puzzle_sets (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            current_time_secs REAL NOT NULL DEFAULT 0,
            progression INTEGER NOT NULL DEFAULT 0 CHECK (progression >= 0),
            length INTEGER NOT NULL CHECK (length >= 0),
            cycles INTEGER NOT NULL DEFAULT 0 CHECK (cycles >= 0),
            CHECK (progression <= length)
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS set_puzzles (
            set_id INTEGER NOT NULL,
            puzzle_id TEXT NOT NULL,
            ord INTEGER NOT NULL CHECK (ord >= 0),
            played INTEGER NOT NULL DEFAULT 0,
            solve_count INTEGER NOT NULL DEFAULT 0 CHECK (solve_count >= 0),
            streak INTEGER NOT NULL DEFAULT 0 CHECK (streak >= 0),
            PRIMARY KEY (set_id, puzzle_id),
            FOREIGN KEY (set_id) REFERENCES puzzle_sets(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS set_puzzle_attempts (
            id INTEGER PRIMARY KEY,
            set_id INTEGER NOT NULL,
            puzzle_id TEXT NOT NULL,
            mistakes INTEGER NOT NULL CHECK (mistakes >= 0),
            time_taken REAL NOT NULL,
            grade INTEGER NOT NULL CHECK (grade BETWEEN 1 AND 6),
            FOREIGN KEY (set_id, puzzle_id) REFERENCES set_puzzles(set_id, puzzle_id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS set_cycle_times (
            id INTEGER PRIMARY KEY,
            set_id INTEGER NOT NULL,
            total_time REAL NOT NULL,
            FOREIGN KEY (set_id) REFERENCES puzzle_sets(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_puzzle_sets_user
            ON puzzle_sets (user_id, id);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_set_puzzle_attempts_set_puzzle
            ON set_puzzle_attempts (set_id, puzzle_id, id);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_set_cycle_times_set
            ON set_cycle_times (set_id, id);
    ",
];

/// Runs the versioned schema migrations.
///
/// Version 1 creates puzzles, users with their theme counters, puzzle sets
/// with per-puzzle attempts, and cycle times.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        for statement in SCHEMA_V1 {
            sqlx::query(statement).execute(&mut *tx).await?;
        }

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(version = 1, "applied schema migration");
    }

    Ok(())
}
