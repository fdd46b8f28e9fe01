use serde::{Deserialize, Serialize};

use crate::grading::Grade;
use crate::model::ids::PuzzleId;
use crate::model::user::ThemeCount;

/// Changes committed to a puzzle set when one of its puzzles is solved.
///
/// Applying it:
/// - increments the puzzle's play count
/// - appends `mistakes`, `time_taken_secs` and `grade` to the puzzle's histories
/// - sets `played = true` and the puzzle's streak to `streak`
/// - adds `time_with_penalty_secs` to the set's `current_time` and bumps `progression`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PuzzleCompletionDelta {
    pub puzzle_id: PuzzleId,
    pub mistakes: u32,
    pub time_taken_secs: f64,
    pub grade: Grade,
    pub streak: u32,
    pub time_with_penalty_secs: f64,
}

/// Changes committed to a puzzle set when a full cycle is finished.
///
/// Applying it increments `cycles`, appends `total_time_secs` to the time
/// history, clears every `played` flag and resets `current_time`/`progression`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleCompletionDelta {
    pub total_time_secs: f64,
}

/// Changes committed to a user record.
///
/// `theme_increments` are positions into the user's existing theme counts;
/// `new_themes` are appended as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStatsDelta {
    pub puzzles_solved: u32,
    pub theme_increments: Vec<usize>,
    pub new_themes: Vec<ThemeCount>,
    pub sets_completed: u32,
}

impl UserStatsDelta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.puzzles_solved == 0
            && self.theme_increments.is_empty()
            && self.new_themes.is_empty()
            && self.sets_completed == 0
    }
}
