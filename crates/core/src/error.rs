use thiserror::Error;

use crate::board::BoardError;
use crate::grading::GradeError;
use crate::model::{PuzzleError, PuzzleSetError, SettingsError, UserStatsError};

/// Any validation failure raised by the domain crate.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Puzzle(#[from] PuzzleError),
    #[error(transparent)]
    PuzzleSet(#[from] PuzzleSetError),
    #[error(transparent)]
    UserStats(#[from] UserStatsError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Grade(#[from] GradeError),
    #[error(transparent)]
    Board(#[from] BoardError),
}
