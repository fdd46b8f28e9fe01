use std::env;
use std::time::Duration;

use async_trait::async_trait;
use puzzle_core::model::{AchievementId, ThemeCount};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::AchievementError;

/// Facts about a finished puzzle that achievement rules are evaluated on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementPayload {
    /// Consecutive mistake-free solves in this session, this one included.
    pub streak_mistakes: u32,
    /// Consecutive solves under the fast-solve threshold in this session.
    pub streak_time: u32,
    pub completion_time: f64,
    pub completion_mistakes: u32,
    pub total_puzzle_solved: u32,
    /// Updated counts for this puzzle's themes.
    pub themes: Vec<ThemeCount>,
    pub total_set_solved: u32,
    pub did_cheat: bool,
    /// Daily streak of the user.
    pub streak: u32,
    pub is_sponsor: bool,
}

/// Decides which achievements a finished puzzle unlocks.
#[async_trait]
pub trait AchievementEvaluator: Send + Sync {
    /// Return the achievements newly unlocked by `payload` (possibly none).
    ///
    /// # Errors
    ///
    /// Returns `AchievementError` when the evaluation could not be performed.
    async fn evaluate(
        &self,
        payload: &AchievementPayload,
    ) -> Result<Vec<AchievementId>, AchievementError>;
}

/// Evaluator that never unlocks anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAchievements;

#[async_trait]
impl AchievementEvaluator for NoAchievements {
    async fn evaluate(
        &self,
        _payload: &AchievementPayload,
    ) -> Result<Vec<AchievementId>, AchievementError> {
        Ok(Vec::new())
    }
}

/// Upper bound on one achievement check, however it is evaluated.
pub const EVALUATION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct HttpAchievementConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl HttpAchievementConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: EVALUATION_TIMEOUT,
        }
    }

    /// Reads `ACHIEVEMENTS_URL`; unset or blank disables remote checks.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("ACHIEVEMENTS_URL").ok()?;
        if base_url.trim().is_empty() {
            return None;
        }
        Some(Self::new(base_url))
    }
}

/// Posts the payload to a remote achievement service.
#[derive(Clone)]
pub struct HttpAchievementEvaluator {
    client: Client,
    config: HttpAchievementConfig,
}

impl HttpAchievementEvaluator {
    /// # Errors
    ///
    /// Returns `AchievementError::Http` if the HTTP client cannot be built.
    pub fn new(config: HttpAchievementConfig) -> Result<Self, AchievementError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl AchievementEvaluator for HttpAchievementEvaluator {
    async fn evaluate(
        &self,
        payload: &AchievementPayload,
    ) -> Result<Vec<AchievementId>, AchievementError> {
        let url = format!(
            "{}/achievements/check",
            self.config.base_url.trim_end_matches('/')
        );

        let response = self.client.post(url).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(AchievementError::HttpStatus(response.status()));
        }

        let body: CheckResponse = response.json().await?;
        Ok(body.unlocked)
    }
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    #[serde(default)]
    unlocked: Vec<AchievementId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> AchievementPayload {
        AchievementPayload {
            streak_mistakes: 3,
            streak_time: 1,
            completion_time: 4.2,
            completion_mistakes: 0,
            total_puzzle_solved: 12,
            themes: vec![ThemeCount::new("fork", 5)],
            total_set_solved: 1,
            did_cheat: false,
            streak: 4,
            is_sponsor: true,
        }
    }

    #[test]
    fn payload_uses_camel_case_keys() {
        let json = serde_json::to_value(payload()).unwrap();
        assert_eq!(json["streakMistakes"], 3);
        assert_eq!(json["totalPuzzleSolved"], 12);
        assert_eq!(json["themes"][0]["title"], "fork");
        assert_eq!(json["isSponsor"], true);
    }

    #[test]
    fn check_response_defaults_to_nothing_unlocked() {
        let body: CheckResponse = serde_json::from_str("{}").unwrap();
        assert!(body.unlocked.is_empty());

        let body: CheckResponse = serde_json::from_str(r#"{"unlocked":["firstFork"]}"#).unwrap();
        assert_eq!(body.unlocked, vec![AchievementId::new("firstFork")]);
    }

    #[test]
    fn config_defaults_to_the_evaluation_timeout() {
        let config = HttpAchievementConfig::new("http://localhost:9000/");
        assert_eq!(config.timeout, EVALUATION_TIMEOUT);
        assert!(HttpAchievementEvaluator::new(config).is_ok());
    }

    #[tokio::test]
    async fn no_achievements_unlocks_nothing() {
        let unlocked = NoAchievements.evaluate(&payload()).await.unwrap();
        assert!(unlocked.is_empty());
    }
}
