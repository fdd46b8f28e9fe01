mod ids;
mod progress;
mod puzzle;
mod puzzle_set;
mod settings;
mod user;

pub use ids::{AchievementId, ParseIdError, PuzzleId, PuzzleSetId, SessionId, UserId};
pub use progress::{CycleCompletionDelta, PuzzleCompletionDelta, UserStatsDelta};
pub use puzzle::{Puzzle, PuzzleError};
pub use puzzle_set::{PuzzleRef, PuzzleSet, PuzzleSetError};
pub use settings::{SessionSettings, SettingsError};
pub use user::{ThemeCount, UserStats, UserStatsError};
