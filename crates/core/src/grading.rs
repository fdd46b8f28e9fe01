//! Per-puzzle performance grading.
//!
//! A grade summarizes how cleanly one puzzle was solved, from 1 (revealed or
//! three mistakes or more) to 6 (fast, clean, and the puzzle was already on a
//! clean streak). Rules are checked top to bottom; the first match wins.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Solving time (seconds) from which a puzzle counts as slow.
pub const SLOW_SOLVE_SECS: f64 = 20.0;
/// Solving time (seconds) from which a clean puzzle stops counting as quick.
pub const QUICK_SOLVE_SECS: f64 = 6.0;
/// Mistakes from which a solve always gets the lowest grade.
pub const FAILING_MISTAKES: u32 = 3;
/// Prior clean streak needed for the top grade.
pub const MASTERED_STREAK: u32 = 2;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GradeError {
    #[error("grade must be between 1 and 6, got {0}")]
    OutOfRange(u8),
}

/// Performance grade in `[1, 6]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Grade(u8);

impl Grade {
    pub const MIN: Grade = Grade(1);
    pub const MAX: Grade = Grade(6);

    /// # Errors
    ///
    /// Returns `GradeError::OutOfRange` outside `1..=6`.
    pub fn new(value: u8) -> Result<Self, GradeError> {
        if (1..=6).contains(&value) {
            Ok(Self(value))
        } else {
            Err(GradeError::OutOfRange(value))
        }
    }

    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Grade {
    type Error = GradeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Grade> for u8 {
    fn from(grade: Grade) -> Self {
        grade.0
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inputs to [`grade`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradeInput {
    pub did_cheat: bool,
    pub mistakes: u32,
    pub time_taken_secs: f64,
    pub prior_streak: u32,
}

/// Maps a finished puzzle to its grade.
#[must_use]
pub fn grade(input: GradeInput) -> Grade {
    let GradeInput {
        did_cheat,
        mistakes,
        time_taken_secs: t,
        prior_streak,
    } = input;

    let value = if did_cheat || mistakes >= FAILING_MISTAKES {
        1
    } else if mistakes == 2 || (mistakes == 1 && t >= SLOW_SOLVE_SECS) {
        2
    } else if mistakes == 1 || t >= SLOW_SOLVE_SECS {
        3
    } else if t >= QUICK_SOLVE_SECS {
        4
    } else if prior_streak < MASTERED_STREAK {
        5
    } else {
        6
    };
    Grade(value)
}
