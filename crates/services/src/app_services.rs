use std::sync::Arc;

use puzzle_core::board::{RulesEngine, ShakmatyEngine};
use puzzle_core::model::SessionSettings;
use storage::repository::Storage;

use crate::Clock;
use crate::error::AppServicesError;
use crate::import_service::PuzzleImportService;
use crate::sessions::{
    AchievementEvaluator, HttpAchievementConfig, HttpAchievementEvaluator, NoAchievements,
    SessionLoopService, SetOverviewService,
};

/// Assembles app-facing services over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    session_loop: Arc<SessionLoopService>,
    overviews: Arc<SetOverviewService>,
    importer: Arc<PuzzleImportService>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// Achievements are checked remotely when `ACHIEVEMENTS_URL` is set.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails or the
    /// achievement client cannot be built.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        settings: SessionSettings,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        let achievements: Arc<dyn AchievementEvaluator> = match HttpAchievementConfig::from_env() {
            Some(config) => Arc::new(HttpAchievementEvaluator::new(config)?),
            None => Arc::new(NoAchievements),
        };
        Ok(Self::from_storage(&storage, clock, settings, achievements))
    }

    #[must_use]
    pub fn from_storage(
        storage: &Storage,
        clock: Clock,
        settings: SessionSettings,
        achievements: Arc<dyn AchievementEvaluator>,
    ) -> Self {
        let rules: Arc<dyn RulesEngine> = Arc::new(ShakmatyEngine);
        let session_loop = Arc::new(
            SessionLoopService::new(clock, storage, rules, achievements).with_settings(settings),
        );
        let overviews = Arc::new(SetOverviewService::new(Arc::clone(&storage.sets)));
        let importer = Arc::new(PuzzleImportService::new(storage));

        Self {
            session_loop,
            overviews,
            importer,
        }
    }

    #[must_use]
    pub fn session_loop(&self) -> Arc<SessionLoopService> {
        Arc::clone(&self.session_loop)
    }

    #[must_use]
    pub fn overviews(&self) -> Arc<SetOverviewService> {
        Arc::clone(&self.overviews)
    }

    #[must_use]
    pub fn importer(&self) -> Arc<PuzzleImportService> {
        Arc::clone(&self.importer)
    }
}
