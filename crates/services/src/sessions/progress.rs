use chrono::{DateTime, Utc};
use puzzle_core::grading::{self, Grade, GradeInput};
use puzzle_core::model::{
    CycleCompletionDelta, Puzzle, PuzzleCompletionDelta, PuzzleId, PuzzleRef, PuzzleSet,
    PuzzleSetId, SessionSettings, ThemeCount, UserId, UserStats, UserStatsDelta,
};
use puzzle_core::time::{seconds_between, truncate_centis};

use super::achievements::AchievementPayload;

/// Aggregated view of session progress, useful for UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProgress {
    pub total: usize,
    pub completed: usize,
    pub remaining: usize,
    /// Mistakes across every puzzle of this pass.
    pub mistakes: u32,
    pub is_complete: bool,
}

/// One puzzle solved during the session, kept for the results summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolvedPuzzle {
    pub puzzle_id: PuzzleId,
    pub grade: Grade,
}

/// What the player did on a finished puzzle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PuzzleSolve {
    pub mistakes: u32,
    pub did_cheat: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Everything written back when a puzzle is finished.
#[derive(Debug, Clone, PartialEq)]
pub struct PuzzleCommit {
    pub set_id: PuzzleSetId,
    pub user_id: UserId,
    pub delta: PuzzleCompletionDelta,
    pub user_delta: UserStatsDelta,
    pub achievements: AchievementPayload,
}

/// Everything written back when a pass over the set is finished.
#[derive(Debug, Clone, PartialEq)]
pub struct SetCommit {
    pub set_id: PuzzleSetId,
    pub user_id: UserId,
    pub delta: CycleCompletionDelta,
    pub user_delta: UserStatsDelta,
}

/// Turns finished puzzles and passes into persistence deltas.
///
/// Holds the session-wide accumulators (time sum, achievement streaks) and a
/// local copy of the user's statistics that is updated as deltas are produced,
/// so theme indices stay consistent across consecutive puzzles.
#[derive(Debug, Clone)]
pub struct ProgressionTracker {
    set_id: PuzzleSetId,
    mistake_penalty_secs: f64,
    completion_bonus_secs: f64,
    fast_solve_secs: f64,
    pass_time_before_session: f64,
    timer_sum: f64,
    clean_streak: u32,
    fast_streak: u32,
    user: UserStats,
}

impl ProgressionTracker {
    #[must_use]
    pub fn new(set: &PuzzleSet, user: UserStats, settings: &SessionSettings) -> Self {
        Self {
            set_id: set.id(),
            mistake_penalty_secs: settings.mistake_penalty_secs(),
            completion_bonus_secs: settings.set_completion_bonus_secs(),
            fast_solve_secs: settings.fast_solve_secs(),
            pass_time_before_session: set.current_time(),
            timer_sum: 0.0,
            clean_streak: 0,
            fast_streak: 0,
            user,
        }
    }

    #[must_use]
    pub fn user(&self) -> &UserStats {
        &self.user
    }

    /// Seconds (mistake penalties included) solved during this session.
    #[must_use]
    pub fn timer_sum(&self) -> f64 {
        self.timer_sum
    }

    /// Build the commit for a finished puzzle.
    ///
    /// `entry` must be the puzzle's set entry as it was before this solve:
    /// the grade reads its prior streak.
    pub fn complete_puzzle(
        &mut self,
        entry: &PuzzleRef,
        puzzle: &Puzzle,
        solve: &PuzzleSolve,
    ) -> PuzzleCommit {
        let elapsed = seconds_between(solve.started_at, solve.completed_at);
        let time_taken = truncate_centis(elapsed);
        let grade = grading::grade(GradeInput {
            did_cheat: solve.did_cheat,
            mistakes: solve.mistakes,
            time_taken_secs: time_taken,
            prior_streak: entry.streak,
        });
        let streak = if solve.mistakes == 0 {
            entry.streak.saturating_add(1)
        } else {
            0
        };
        let time_with_penalty = elapsed + self.mistake_penalty_secs * f64::from(solve.mistakes);
        self.timer_sum += time_with_penalty;

        self.clean_streak = if solve.mistakes == 0 {
            self.clean_streak + 1
        } else {
            0
        };
        self.fast_streak = if elapsed < self.fast_solve_secs {
            self.fast_streak + 1
        } else {
            0
        };

        let user_delta = self.user_delta_for(puzzle.themes());
        if let Err(err) = self.user.apply_delta(&user_delta) {
            tracing::warn!(error = %err, "local user stats out of sync");
        }

        let achievements = AchievementPayload {
            streak_mistakes: self.clean_streak,
            streak_time: self.fast_streak,
            completion_time: time_taken,
            completion_mistakes: solve.mistakes,
            total_puzzle_solved: self.user.total_puzzle_solved,
            themes: puzzle
                .themes()
                .iter()
                .map(|title| ThemeCount::new(title.clone(), self.user.theme_count(title).unwrap_or(1)))
                .collect(),
            total_set_solved: self.user.total_set_completed,
            did_cheat: solve.did_cheat,
            streak: self.user.daily_streak,
            is_sponsor: self.user.is_sponsor,
        };

        PuzzleCommit {
            set_id: self.set_id,
            user_id: self.user.id,
            delta: PuzzleCompletionDelta {
                puzzle_id: entry.puzzle_id.clone(),
                mistakes: solve.mistakes,
                time_taken_secs: time_taken,
                grade,
                streak,
                time_with_penalty_secs: time_with_penalty,
            },
            user_delta,
            achievements,
        }
    }

    /// Build the commit closing the current pass.
    ///
    /// The pass total adds the time already banked on the set before this
    /// session, every solve of this session, and the completion bonus.
    pub fn complete_set(&mut self) -> SetCommit {
        let total = self.pass_time_before_session + self.timer_sum + self.completion_bonus_secs;
        self.pass_time_before_session = 0.0;
        self.timer_sum = 0.0;

        let user_delta = UserStatsDelta {
            sets_completed: 1,
            ..UserStatsDelta::default()
        };
        if let Err(err) = self.user.apply_delta(&user_delta) {
            tracing::warn!(error = %err, "local user stats out of sync");
        }

        SetCommit {
            set_id: self.set_id,
            user_id: self.user.id,
            delta: CycleCompletionDelta {
                total_time_secs: total,
            },
            user_delta,
        }
    }

    /// Known themes are incremented by index; unseen ones are appended with a count of one.
    fn user_delta_for(&self, themes: &[String]) -> UserStatsDelta {
        let mut delta = UserStatsDelta {
            puzzles_solved: 1,
            ..UserStatsDelta::default()
        };
        for title in themes {
            match self.user.themes.iter().position(|t| &t.title == title) {
                Some(index) if !delta.theme_increments.contains(&index) => {
                    delta.theme_increments.push(index);
                }
                Some(_) => {}
                None if !delta.new_themes.iter().any(|t| &t.title == title) => {
                    delta.new_themes.push(ThemeCount::new(title.clone(), 1));
                }
                None => {}
            }
        }
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use puzzle_core::time::fixed_now;

    fn pid(s: &str) -> PuzzleId {
        PuzzleId::new(s).unwrap()
    }

    fn puzzle(id: &str, themes: &[&str]) -> Puzzle {
        Puzzle::from_move_list(
            pid(id),
            "6k1/5ppp/8/8/8/8/8/1R4K1 b - - 0 1",
            "g8f8 b1b8",
            themes.iter().map(|t| (*t).to_owned()).collect(),
        )
        .unwrap()
    }

    fn tracker_with(user: UserStats, current_time: f64) -> ProgressionTracker {
        let set = PuzzleSet::from_persisted(
            PuzzleSetId::new(1),
            user.id,
            "Set",
            vec![PuzzleRef::new(pid("a"), 0), PuzzleRef::new(pid("b"), 1)],
            current_time,
            0,
            2,
            0,
            Vec::new(),
        )
        .unwrap();
        ProgressionTracker::new(&set, user, &SessionSettings::default())
    }

    fn solve(mistakes: u32, millis: i64) -> PuzzleSolve {
        PuzzleSolve {
            mistakes,
            did_cheat: false,
            started_at: fixed_now(),
            completed_at: fixed_now() + Duration::milliseconds(millis),
        }
    }

    #[test]
    fn clean_solve_grades_and_extends_streak() {
        let mut tracker = tracker_with(UserStats::new(UserId::new(1)), 0.0);
        let mut entry = PuzzleRef::new(pid("a"), 0);
        entry.streak = 2;

        let commit = tracker.complete_puzzle(&entry, &puzzle("a", &[]), &solve(0, 4_567));

        assert_eq!(commit.delta.time_taken_secs, 4.56);
        assert!((commit.delta.time_with_penalty_secs - 4.567).abs() < 1e-9);
        assert_eq!(commit.delta.grade.value(), 6);
        assert_eq!(commit.delta.streak, 3);
    }

    #[test]
    fn mistakes_reset_streak_and_add_penalty() {
        let mut tracker = tracker_with(UserStats::new(UserId::new(1)), 0.0);
        let mut entry = PuzzleRef::new(pid("a"), 0);
        entry.streak = 4;

        let commit = tracker.complete_puzzle(&entry, &puzzle("a", &[]), &solve(2, 10_000));

        assert_eq!(commit.delta.streak, 0);
        assert_eq!(commit.delta.grade.value(), 2);
        assert!((commit.delta.time_with_penalty_secs - 16.0).abs() < 1e-9);
        assert!((tracker.timer_sum() - 16.0).abs() < 1e-9);
    }

    #[test]
    fn revealed_solution_grades_one() {
        let mut tracker = tracker_with(UserStats::new(UserId::new(1)), 0.0);
        let mut cheat = solve(0, 1_000);
        cheat.did_cheat = true;

        let commit = tracker.complete_puzzle(&PuzzleRef::new(pid("a"), 0), &puzzle("a", &[]), &cheat);
        assert_eq!(commit.delta.grade, Grade::MIN);
        assert!(commit.achievements.did_cheat);
    }

    #[test]
    fn themes_are_diffed_against_the_local_user_copy() {
        let mut user = UserStats::new(UserId::new(1));
        user.total_puzzle_solved = 7;
        user.themes = vec![ThemeCount::new("fork", 3), ThemeCount::new("pin", 1)];
        let mut tracker = tracker_with(user, 0.0);

        let first = tracker.complete_puzzle(
            &PuzzleRef::new(pid("a"), 0),
            &puzzle("a", &["pin", "mateIn1"]),
            &solve(0, 2_000),
        );
        assert_eq!(first.user_delta.puzzles_solved, 1);
        assert_eq!(first.user_delta.theme_increments, vec![1]);
        assert_eq!(first.user_delta.new_themes, vec![ThemeCount::new("mateIn1", 1)]);
        assert_eq!(first.achievements.total_puzzle_solved, 8);
        assert_eq!(
            first.achievements.themes,
            vec![ThemeCount::new("pin", 2), ThemeCount::new("mateIn1", 1)]
        );

        // The appended theme is now known at index 2.
        let second = tracker.complete_puzzle(
            &PuzzleRef::new(pid("b"), 1),
            &puzzle("b", &["mateIn1"]),
            &solve(0, 2_000),
        );
        assert_eq!(second.user_delta.theme_increments, vec![2]);
        assert!(second.user_delta.new_themes.is_empty());
        assert_eq!(tracker.user().theme_count("mateIn1"), Some(2));
    }

    #[test]
    fn session_streaks_include_the_current_solve() {
        let mut tracker = tracker_with(UserStats::new(UserId::new(1)), 0.0);
        let entry = PuzzleRef::new(pid("a"), 0);
        let p = puzzle("a", &[]);

        let c1 = tracker.complete_puzzle(&entry, &p, &solve(0, 3_000));
        assert_eq!((c1.achievements.streak_mistakes, c1.achievements.streak_time), (1, 1));

        let c2 = tracker.complete_puzzle(&entry, &p, &solve(0, 5_000));
        assert_eq!((c2.achievements.streak_mistakes, c2.achievements.streak_time), (2, 0));

        let c3 = tracker.complete_puzzle(&entry, &p, &solve(1, 1_000));
        assert_eq!((c3.achievements.streak_mistakes, c3.achievements.streak_time), (0, 1));
    }

    #[test]
    fn set_total_adds_banked_time_and_bonus() {
        let mut tracker = tracker_with(UserStats::new(UserId::new(1)), 12.5);
        tracker.complete_puzzle(
            &PuzzleRef::new(pid("b"), 1),
            &puzzle("b", &[]),
            &solve(1, 4_000),
        );

        let commit = tracker.complete_set();
        assert!((commit.delta.total_time_secs - (12.5 + 7.0 + 1.0)).abs() < 1e-9);
        assert_eq!(commit.user_delta.sets_completed, 1);
        assert_eq!(tracker.user().total_set_completed, 1);
        assert_eq!(tracker.timer_sum(), 0.0);
    }
}
