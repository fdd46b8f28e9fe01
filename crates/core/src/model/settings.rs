use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("move delays must not exceed 5 seconds")]
    InvalidDelay,

    #[error("mistake penalty must be a finite, non-negative number of seconds")]
    InvalidMistakePenalty,

    #[error("set completion bonus must be a finite, non-negative number of seconds")]
    InvalidCompletionBonus,

    #[error("fast solve threshold must be a finite, positive number of seconds")]
    InvalidFastSolveThreshold,
}

const MAX_DELAY: Duration = Duration::from_secs(5);

/// Pacing and scoring knobs for a training session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    opening_delay: Duration,
    reply_delay: Duration,
    auto_advance: bool,
    mistake_penalty_secs: f64,
    set_completion_bonus_secs: f64,
    fast_solve_secs: f64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            opening_delay: Duration::from_millis(300),
            reply_delay: Duration::from_millis(300),
            auto_advance: false,
            mistake_penalty_secs: 3.0,
            set_completion_bonus_secs: 1.0,
            fast_solve_secs: 5.0,
        }
    }
}

impl SessionSettings {
    /// Creates custom session settings.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` for delays above five seconds or negative,
    /// non-finite time constants.
    pub fn new(
        opening_delay: Duration,
        reply_delay: Duration,
        auto_advance: bool,
        mistake_penalty_secs: f64,
        set_completion_bonus_secs: f64,
        fast_solve_secs: f64,
    ) -> Result<Self, SettingsError> {
        if opening_delay > MAX_DELAY || reply_delay > MAX_DELAY {
            return Err(SettingsError::InvalidDelay);
        }
        if !mistake_penalty_secs.is_finite() || mistake_penalty_secs < 0.0 {
            return Err(SettingsError::InvalidMistakePenalty);
        }
        if !set_completion_bonus_secs.is_finite() || set_completion_bonus_secs < 0.0 {
            return Err(SettingsError::InvalidCompletionBonus);
        }
        if !fast_solve_secs.is_finite() || fast_solve_secs <= 0.0 {
            return Err(SettingsError::InvalidFastSolveThreshold);
        }

        Ok(Self {
            opening_delay,
            reply_delay,
            auto_advance,
            mistake_penalty_secs,
            set_completion_bonus_secs,
            fast_solve_secs,
        })
    }

    /// Default scoring with both move delays elided; used by tests and headless runs.
    #[must_use]
    pub fn instant() -> Self {
        Self {
            opening_delay: Duration::ZERO,
            reply_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_auto_advance(mut self, auto_advance: bool) -> Self {
        self.auto_advance = auto_advance;
        self
    }

    /// Delay before the opponent's setup move, letting the board render first.
    #[must_use]
    pub fn opening_delay(&self) -> Duration {
        self.opening_delay
    }

    #[must_use]
    pub fn reply_delay(&self) -> Duration {
        self.reply_delay
    }

    /// Move on to the next puzzle as soon as one is solved.
    #[must_use]
    pub fn auto_advance(&self) -> bool {
        self.auto_advance
    }

    #[must_use]
    pub fn mistake_penalty_secs(&self) -> f64 {
        self.mistake_penalty_secs
    }

    #[must_use]
    pub fn set_completion_bonus_secs(&self) -> f64 {
        self.set_completion_bonus_secs
    }

    /// Solves strictly faster than this extend the fast-solve streak.
    #[must_use]
    pub fn fast_solve_secs(&self) -> f64 {
        self.fast_solve_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_training_pacing() {
        let settings = SessionSettings::default();
        assert_eq!(settings.opening_delay(), Duration::from_millis(300));
        assert_eq!(settings.mistake_penalty_secs(), 3.0);
        assert_eq!(settings.set_completion_bonus_secs(), 1.0);
        assert!(!settings.auto_advance());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let long = Duration::from_secs(6);
        let ok = Duration::from_millis(100);
        assert_eq!(
            SessionSettings::new(long, ok, false, 3.0, 1.0, 5.0),
            Err(SettingsError::InvalidDelay)
        );
        assert_eq!(
            SessionSettings::new(ok, ok, false, -1.0, 1.0, 5.0),
            Err(SettingsError::InvalidMistakePenalty)
        );
        assert_eq!(
            SessionSettings::new(ok, ok, false, 3.0, f64::NAN, 5.0),
            Err(SettingsError::InvalidCompletionBonus)
        );
        assert_eq!(
            SessionSettings::new(ok, ok, false, 3.0, 1.0, 0.0),
            Err(SettingsError::InvalidFastSolveThreshold)
        );
    }
}
