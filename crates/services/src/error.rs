//! Shared error types for the services crate.

use thiserror::Error;

use puzzle_core::model::{PuzzleId, PuzzleSetError, PuzzleSetId, UserId};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

use crate::sessions::SessionPhase;

/// Errors emitted by session operations.
///
/// These are caller mistakes (driving the session from the wrong state) or
/// startup failures; backend hiccups during play are reported as
/// [`EngineFailure`] notices instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("no puzzle is active")]
    NoActivePuzzle,
    #[error("no puzzles remain in this pass")]
    NoRemainingPuzzles,
    #[error("`{operation}` is not allowed while {phase:?}")]
    InvalidState {
        operation: &'static str,
        phase: SessionPhase,
    },
    #[error("puzzle set {0} not found")]
    SetNotFound(PuzzleSetId),
    #[error("user {0} not found")]
    UserNotFound(UserId),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by achievement evaluators.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AchievementError {
    #[error("achievement check failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("achievement check timed out after {0:?}")]
    TimedOut(std::time::Duration),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Non-fatal failures surfaced on the notice channel while a session keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum EngineFailure {
    #[error("could not load puzzle {puzzle_id}: {reason}")]
    Fetch { puzzle_id: PuzzleId, reason: String },
    #[error("could not persist {target}: {reason}")]
    Persistence { target: String, reason: String },
    #[error("achievement check failed: {reason}")]
    Achievements { reason: String },
}

/// Errors emitted by puzzle imports.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ImportError {
    #[error("no usable puzzle rows")]
    NoPuzzles,
    #[error("puzzle set {0} already exists")]
    SetExists(PuzzleSetId),
    #[error("too many puzzles for one set")]
    TooLarge,
    #[error(transparent)]
    PuzzleSet(#[from] PuzzleSetError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Achievements(#[from] AchievementError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
