use std::sync::Arc;

use puzzle_core::model::{PuzzleSet, PuzzleSetId, UserId};
use storage::repository::PuzzleSetRepository;

use crate::error::SessionError;

/// Presentation-agnostic statistics for one puzzle set.
///
/// Times are seconds; nothing is pre-formatted.
#[derive(Debug, Clone, PartialEq)]
pub struct SetOverview {
    pub set_id: PuzzleSetId,
    pub title: String,
    pub length: u32,
    /// Puzzles solved in the running cycle.
    pub progression: u32,
    /// Seconds banked in the running cycle.
    pub current_time: f64,
    pub cycles: u32,
    pub best_time: Option<f64>,
    pub last_time: Option<f64>,
    pub average_time: Option<f64>,
    /// Last cycle time minus the one before it; negative means faster.
    pub last_change: Option<f64>,
    /// Mean of each solved puzzle's most recent grade.
    pub average_grade: Option<f64>,
    /// Mistakes recorded over every solve of every puzzle.
    pub total_mistakes: u32,
}

impl SetOverview {
    #[must_use]
    pub fn from_set(set: &PuzzleSet) -> Self {
        let times = set.times();
        let best_time = times.iter().copied().reduce(f64::min);
        let last_time = times.last().copied();
        let average_time = mean(times.iter().copied());
        let last_change = match times {
            [.., previous, last] => Some(last - previous),
            _ => None,
        };

        let average_grade = mean(
            set.puzzles()
                .iter()
                .filter_map(|p| p.last_grade())
                .map(|g| f64::from(g.value())),
        );
        let total_mistakes = set
            .puzzles()
            .iter()
            .flat_map(|p| p.mistakes.iter())
            .sum::<u32>();

        Self {
            set_id: set.id(),
            title: set.title().to_owned(),
            length: set.length(),
            progression: set.progression(),
            current_time: set.current_time(),
            cycles: set.cycles(),
            best_time,
            last_time,
            average_time,
            last_change,
            average_grade,
            total_mistakes,
        }
    }

    /// Share of the running cycle already solved, in `[0, 1]`.
    #[must_use]
    pub fn completion_ratio(&self) -> f64 {
        if self.length == 0 {
            return 0.0;
        }
        f64::from(self.progression) / f64::from(self.length)
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0u32), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / f64::from(count))
}

/// Read-only facade over puzzle set statistics.
#[derive(Clone)]
pub struct SetOverviewService {
    sets: Arc<dyn PuzzleSetRepository>,
}

impl SetOverviewService {
    #[must_use]
    pub fn new(sets: Arc<dyn PuzzleSetRepository>) -> Self {
        Self { sets }
    }

    /// # Errors
    ///
    /// Returns `SessionError::SetNotFound` for an unknown set and
    /// `SessionError::Storage` on repository failures.
    pub async fn overview(&self, set_id: PuzzleSetId) -> Result<SetOverview, SessionError> {
        let set = self
            .sets
            .get_set(set_id)
            .await?
            .ok_or(SessionError::SetNotFound(set_id))?;
        Ok(SetOverview::from_set(&set))
    }

    /// Overviews of every set owned by `user_id`, ordered by set ID.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` on repository failures.
    pub async fn list_overviews(&self, user_id: UserId) -> Result<Vec<SetOverview>, SessionError> {
        let sets = self.sets.list_sets(user_id).await?;
        Ok(sets.iter().map(SetOverview::from_set).collect())
    }
}
