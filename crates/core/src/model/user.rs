use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::UserId;
use crate::model::progress::UserStatsDelta;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum UserStatsError {
    #[error("theme index {index} out of range ({len} themes recorded)")]
    UnknownThemeIndex { index: usize, len: usize },
}

/// Solved-puzzle counter for one theme tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeCount {
    pub title: String,
    pub count: u32,
}

impl ThemeCount {
    #[must_use]
    pub fn new(title: impl Into<String>, count: u32) -> Self {
        Self {
            title: title.into(),
            count,
        }
    }
}

/// The parts of a user record the training engine reads and updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub id: UserId,
    pub total_puzzle_solved: u32,
    pub themes: Vec<ThemeCount>,
    pub total_set_completed: u32,
    /// Consecutive days with at least one training session.
    pub daily_streak: u32,
    pub is_sponsor: bool,
}

impl UserStats {
    #[must_use]
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            total_puzzle_solved: 0,
            themes: Vec::new(),
            total_set_completed: 0,
            daily_streak: 0,
            is_sponsor: false,
        }
    }

    /// Count recorded for `title`, if the theme was seen before.
    #[must_use]
    pub fn theme_count(&self, title: &str) -> Option<u32> {
        self.themes.iter().find(|t| t.title == title).map(|t| t.count)
    }

    /// Apply a delta produced by the progression tracker.
    ///
    /// # Errors
    ///
    /// Returns `UserStatsError::UnknownThemeIndex` if an increment points past
    /// the recorded themes; nothing is modified in that case.
    pub fn apply_delta(&mut self, delta: &UserStatsDelta) -> Result<(), UserStatsError> {
        let len = self.themes.len();
        if let Some(&index) = delta.theme_increments.iter().find(|&&i| i >= len) {
            return Err(UserStatsError::UnknownThemeIndex { index, len });
        }

        self.total_puzzle_solved = self.total_puzzle_solved.saturating_add(delta.puzzles_solved);
        self.total_set_completed = self.total_set_completed.saturating_add(delta.sets_completed);
        for &index in &delta.theme_increments {
            self.themes[index].count = self.themes[index].count.saturating_add(1);
        }
        self.themes.extend(delta.new_themes.iter().cloned());
        Ok(())
    }
}
