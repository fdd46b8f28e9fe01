use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grading::Grade;
use crate::model::ids::{PuzzleId, PuzzleSetId, UserId};
use crate::model::progress::{CycleCompletionDelta, PuzzleCompletionDelta};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PuzzleSetError {
    #[error("puzzle set title cannot be empty")]
    EmptyTitle,

    #[error("progression ({progression}) exceeds set length ({length})")]
    ProgressionOverflow { progression: u32, length: u32 },

    #[error("set length ({length}) does not match puzzle count ({count})")]
    LengthMismatch { length: u32, count: usize },

    #[error("puzzle {0} is not part of this set")]
    UnknownPuzzle(PuzzleId),

    #[error("puzzle {0} appears twice in the set")]
    DuplicatePuzzle(PuzzleId),
}

//
// ─── PUZZLE REF ────────────────────────────────────────────────────────────────
//

/// One puzzle's entry inside a set, with its per-set history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PuzzleRef {
    pub puzzle_id: PuzzleId,
    /// Stable position within the set.
    pub order: u32,
    /// Solved during the current cycle.
    pub played: bool,
    /// Times this puzzle has been solved, all cycles included.
    pub count: u32,
    pub mistakes: Vec<u32>,
    pub time_taken: Vec<f64>,
    pub grades: Vec<Grade>,
    /// Consecutive clean solves of this puzzle across cycles.
    pub streak: u32,
}

impl PuzzleRef {
    #[must_use]
    pub fn new(puzzle_id: PuzzleId, order: u32) -> Self {
        Self {
            puzzle_id,
            order,
            played: false,
            count: 0,
            mistakes: Vec::new(),
            time_taken: Vec::new(),
            grades: Vec::new(),
            streak: 0,
        }
    }

    #[must_use]
    pub fn last_grade(&self) -> Option<Grade> {
        self.grades.last().copied()
    }

    fn apply(&mut self, delta: &PuzzleCompletionDelta) {
        self.count = self.count.saturating_add(1);
        self.mistakes.push(delta.mistakes);
        self.time_taken.push(delta.time_taken_secs);
        self.grades.push(delta.grade);
        self.played = true;
        self.streak = delta.streak;
    }
}

//
// ─── PUZZLE SET ────────────────────────────────────────────────────────────────
//

/// An ordered collection of puzzles replayed in cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PuzzleSet {
    id: PuzzleSetId,
    user_id: UserId,
    title: String,
    puzzles: Vec<PuzzleRef>,
    /// Accumulated seconds (mistake penalties included) of the running cycle.
    current_time: f64,
    /// Puzzles solved in the running cycle.
    progression: u32,
    length: u32,
    cycles: u32,
    /// Total time of each finished cycle.
    times: Vec<f64>,
}

impl PuzzleSet {
    /// Create a fresh set with no recorded history.
    ///
    /// # Errors
    ///
    /// Returns `PuzzleSetError::EmptyTitle` for a blank title and
    /// `PuzzleSetError::DuplicatePuzzle` if a puzzle is listed twice.
    pub fn new(
        id: PuzzleSetId,
        user_id: UserId,
        title: impl Into<String>,
        puzzles: Vec<PuzzleRef>,
    ) -> Result<Self, PuzzleSetError> {
        let length = u32::try_from(puzzles.len()).unwrap_or(u32::MAX);
        Self::from_persisted(id, user_id, title, puzzles, 0.0, 0, length, 0, Vec::new())
    }

    /// Rehydrate a set from storage.
    ///
    /// # Errors
    ///
    /// Returns `PuzzleSetError` when the stored counters break the set invariants.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        id: PuzzleSetId,
        user_id: UserId,
        title: impl Into<String>,
        puzzles: Vec<PuzzleRef>,
        current_time: f64,
        progression: u32,
        length: u32,
        cycles: u32,
        times: Vec<f64>,
    ) -> Result<Self, PuzzleSetError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(PuzzleSetError::EmptyTitle);
        }
        if usize::try_from(length).ok() != Some(puzzles.len()) {
            return Err(PuzzleSetError::LengthMismatch {
                length,
                count: puzzles.len(),
            });
        }
        if progression > length {
            return Err(PuzzleSetError::ProgressionOverflow {
                progression,
                length,
            });
        }
        for (i, p) in puzzles.iter().enumerate() {
            if puzzles[..i].iter().any(|q| q.puzzle_id == p.puzzle_id) {
                return Err(PuzzleSetError::DuplicatePuzzle(p.puzzle_id.clone()));
            }
        }

        Ok(Self {
            id,
            user_id,
            title,
            puzzles,
            current_time,
            progression,
            length,
            cycles,
            times,
        })
    }

    #[must_use]
    pub fn id(&self) -> PuzzleSetId {
        self.id
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn puzzles(&self) -> &[PuzzleRef] {
        &self.puzzles
    }

    #[must_use]
    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    #[must_use]
    pub fn progression(&self) -> u32 {
        self.progression
    }

    #[must_use]
    pub fn length(&self) -> u32 {
        self.length
    }

    #[must_use]
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    #[must_use]
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    #[must_use]
    pub fn puzzle(&self, puzzle_id: &PuzzleId) -> Option<&PuzzleRef> {
        self.puzzles.iter().find(|p| &p.puzzle_id == puzzle_id)
    }

    /// Puzzles still to be solved in this cycle, in set order.
    ///
    /// The sort is stable, so entries sharing an `order` keep their stored order.
    #[must_use]
    pub fn unplayed_in_order(&self) -> Vec<PuzzleRef> {
        let mut unplayed: Vec<PuzzleRef> =
            self.puzzles.iter().filter(|p| !p.played).cloned().collect();
        unplayed.sort_by_key(|p| p.order);
        unplayed
    }

    /// Record a solved puzzle.
    ///
    /// `progression` only moves for a puzzle not yet played this cycle, so it
    /// never exceeds `length`.
    ///
    /// # Errors
    ///
    /// Returns `PuzzleSetError::UnknownPuzzle` if the puzzle is not in the set.
    pub fn apply_puzzle_delta(
        &mut self,
        delta: &PuzzleCompletionDelta,
    ) -> Result<(), PuzzleSetError> {
        let entry = self
            .puzzles
            .iter_mut()
            .find(|p| p.puzzle_id == delta.puzzle_id)
            .ok_or_else(|| PuzzleSetError::UnknownPuzzle(delta.puzzle_id.clone()))?;

        let first_this_cycle = !entry.played;
        entry.apply(delta);
        self.current_time += delta.time_with_penalty_secs;
        if first_this_cycle && self.progression < self.length {
            self.progression += 1;
        }
        Ok(())
    }

    /// Close the running cycle so the set can be replayed.
    pub fn apply_cycle_delta(&mut self, delta: &CycleCompletionDelta) {
        self.cycles = self.cycles.saturating_add(1);
        self.times.push(delta.total_time_secs);
        for p in &mut self.puzzles {
            p.played = false;
        }
        self.current_time = 0.0;
        self.progression = 0;
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
