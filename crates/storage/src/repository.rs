use async_trait::async_trait;
use puzzle_core::model::{
    CycleCompletionDelta, Puzzle, PuzzleCompletionDelta, PuzzleId, PuzzleRef, PuzzleSet,
    PuzzleSetError, PuzzleSetId, UserId, UserStats, UserStatsDelta, UserStatsError,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<PuzzleSetError> for StorageError {
    fn from(err: PuzzleSetError) -> Self {
        match err {
            PuzzleSetError::UnknownPuzzle(_) => StorageError::NotFound,
            other => StorageError::Serialization(other.to_string()),
        }
    }
}

impl From<UserStatsError> for StorageError {
    fn from(err: UserStatsError) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Puzzle bodies, fetched one at a time as a session advances.
#[async_trait]
pub trait PuzzleRepository: Send + Sync {
    /// Persist or update a puzzle body.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the puzzle cannot be stored.
    async fn upsert_puzzle(&self, puzzle: &Puzzle) -> Result<(), StorageError>;

    /// Fetch a puzzle by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on connection or decoding failures.
    async fn get_puzzle(&self, id: &PuzzleId) -> Result<Option<Puzzle>, StorageError>;
}

/// Puzzle sets and their per-puzzle history.
#[async_trait]
pub trait PuzzleSetRepository: Send + Sync {
    /// Persist a whole set, replacing any stored history.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the set cannot be stored.
    async fn upsert_set(&self, set: &PuzzleSet) -> Result<(), StorageError>;

    /// Fetch a set by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on connection or decoding failures.
    async fn get_set(&self, id: PuzzleSetId) -> Result<Option<PuzzleSet>, StorageError>;

    /// All sets owned by a user, ordered by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on connection or decoding failures.
    async fn list_sets(&self, user_id: UserId) -> Result<Vec<PuzzleSet>, StorageError>;

    /// Apply a solved-puzzle delta and return the updated puzzle entry.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the set or the puzzle entry is missing.
    async fn record_puzzle_completion(
        &self,
        set_id: PuzzleSetId,
        delta: &PuzzleCompletionDelta,
    ) -> Result<PuzzleRef, StorageError>;

    /// Apply a finished-cycle delta.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the set is missing.
    async fn record_cycle_completion(
        &self,
        set_id: PuzzleSetId,
        delta: &CycleCompletionDelta,
    ) -> Result<(), StorageError>;
}

/// User-level training statistics.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Persist or update a user's statistics.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the user cannot be stored.
    async fn upsert_user(&self, user: &UserStats) -> Result<(), StorageError>;

    /// Fetch a user's statistics.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on connection or decoding failures.
    async fn get_user(&self, id: UserId) -> Result<Option<UserStats>, StorageError>;

    /// Apply counter increments and appended themes.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the user is missing and
    /// `StorageError::Serialization` if a theme index is out of range.
    async fn apply_user_delta(&self, id: UserId, delta: &UserStatsDelta)
    -> Result<(), StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    puzzles: Arc<Mutex<HashMap<PuzzleId, Puzzle>>>,
    sets: Arc<Mutex<HashMap<PuzzleSetId, PuzzleSet>>>,
    users: Arc<Mutex<HashMap<UserId, UserStats>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<E: ToString>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[async_trait]
impl PuzzleRepository for InMemoryRepository {
    async fn upsert_puzzle(&self, puzzle: &Puzzle) -> Result<(), StorageError> {
        let mut guard = self.puzzles.lock().map_err(poisoned)?;
        guard.insert(puzzle.id().clone(), puzzle.clone());
        Ok(())
    }

    async fn get_puzzle(&self, id: &PuzzleId) -> Result<Option<Puzzle>, StorageError> {
        let guard = self.puzzles.lock().map_err(poisoned)?;
        Ok(guard.get(id).cloned())
    }
}

#[async_trait]
impl PuzzleSetRepository for InMemoryRepository {
    async fn upsert_set(&self, set: &PuzzleSet) -> Result<(), StorageError> {
        let mut guard = self.sets.lock().map_err(poisoned)?;
        guard.insert(set.id(), set.clone());
        Ok(())
    }

    async fn get_set(&self, id: PuzzleSetId) -> Result<Option<PuzzleSet>, StorageError> {
        let guard = self.sets.lock().map_err(poisoned)?;
        Ok(guard.get(&id).cloned())
    }

    async fn list_sets(&self, user_id: UserId) -> Result<Vec<PuzzleSet>, StorageError> {
        let guard = self.sets.lock().map_err(poisoned)?;
        let mut sets: Vec<PuzzleSet> = guard
            .values()
            .filter(|s| s.user_id() == user_id)
            .cloned()
            .collect();
        sets.sort_by_key(PuzzleSet::id);
        Ok(sets)
    }

    async fn record_puzzle_completion(
        &self,
        set_id: PuzzleSetId,
        delta: &PuzzleCompletionDelta,
    ) -> Result<PuzzleRef, StorageError> {
        let mut guard = self.sets.lock().map_err(poisoned)?;
        let set = guard.get_mut(&set_id).ok_or(StorageError::NotFound)?;
        set.apply_puzzle_delta(delta)?;
        set.puzzle(&delta.puzzle_id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn record_cycle_completion(
        &self,
        set_id: PuzzleSetId,
        delta: &CycleCompletionDelta,
    ) -> Result<(), StorageError> {
        let mut guard = self.sets.lock().map_err(poisoned)?;
        let set = guard.get_mut(&set_id).ok_or(StorageError::NotFound)?;
        set.apply_cycle_delta(delta);
        Ok(())
    }
}

#[async_trait]
impl UserRepository for InMemoryRepository {
    async fn upsert_user(&self, user: &UserStats) -> Result<(), StorageError> {
        let mut guard = self.users.lock().map_err(poisoned)?;
        guard.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<UserStats>, StorageError> {
        let guard = self.users.lock().map_err(poisoned)?;
        Ok(guard.get(&id).cloned())
    }

    async fn apply_user_delta(
        &self,
        id: UserId,
        delta: &UserStatsDelta,
    ) -> Result<(), StorageError> {
        let mut guard = self.users.lock().map_err(poisoned)?;
        let user = guard.get_mut(&id).ok_or(StorageError::NotFound)?;
        user.apply_delta(delta)?;
        Ok(())
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub puzzles: Arc<dyn PuzzleRepository>,
    pub sets: Arc<dyn PuzzleSetRepository>,
    pub users: Arc<dyn UserRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let puzzles: Arc<dyn PuzzleRepository> = Arc::new(repo.clone());
        let sets: Arc<dyn PuzzleSetRepository> = Arc::new(repo.clone());
        let users: Arc<dyn UserRepository> = Arc::new(repo);
        Self {
            puzzles,
            sets,
            users,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use puzzle_core::grading::Grade;
    use puzzle_core::model::ThemeCount;

    fn pid(s: &str) -> PuzzleId {
        PuzzleId::new(s).unwrap()
    }

    fn build_set() -> PuzzleSet {
        PuzzleSet::new(
            PuzzleSetId::new(1),
            UserId::new(1),
            "Set",
            vec![PuzzleRef::new(pid("a"), 0), PuzzleRef::new(pid("b"), 1)],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn records_puzzle_completion_and_returns_grades() {
        let repo = InMemoryRepository::new();
        repo.upsert_set(&build_set()).await.unwrap();

        let delta = PuzzleCompletionDelta {
            puzzle_id: pid("b"),
            mistakes: 0,
            time_taken_secs: 3.2,
            grade: Grade::new(5).unwrap(),
            streak: 1,
            time_with_penalty_secs: 3.2,
        };
        let entry = repo
            .record_puzzle_completion(PuzzleSetId::new(1), &delta)
            .await
            .unwrap();

        assert_eq!(entry.grades, vec![Grade::new(5).unwrap()]);
        let set = repo.get_set(PuzzleSetId::new(1)).await.unwrap().unwrap();
        assert_eq!(set.progression(), 1);
    }

    #[tokio::test]
    async fn missing_set_or_puzzle_is_not_found() {
        let repo = InMemoryRepository::new();
        let delta = CycleCompletionDelta {
            total_time_secs: 1.0,
        };
        let err = repo
            .record_cycle_completion(PuzzleSetId::new(9), &delta)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound));

        repo.upsert_set(&build_set()).await.unwrap();
        let delta = PuzzleCompletionDelta {
            puzzle_id: pid("zz"),
            mistakes: 0,
            time_taken_secs: 1.0,
            grade: Grade::MAX,
            streak: 0,
            time_with_penalty_secs: 1.0,
        };
        let err = repo
            .record_puzzle_completion(PuzzleSetId::new(1), &delta)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound));
    }

    #[tokio::test]
    async fn user_delta_updates_counters() {
        let repo = InMemoryRepository::new();
        let mut user = UserStats::new(UserId::new(3));
        user.themes.push(ThemeCount::new("fork", 1));
        repo.upsert_user(&user).await.unwrap();

        let delta = UserStatsDelta {
            puzzles_solved: 1,
            theme_increments: vec![0],
            new_themes: vec![ThemeCount::new("pin", 1)],
            sets_completed: 0,
        };
        repo.apply_user_delta(user.id, &delta).await.unwrap();

        let stored = repo.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.total_puzzle_solved, 1);
        assert_eq!(stored.theme_count("fork"), Some(2));
        assert_eq!(stored.theme_count("pin"), Some(1));
    }
}
