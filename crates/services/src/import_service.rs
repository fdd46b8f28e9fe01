use std::sync::Arc;

use puzzle_core::model::{Puzzle, PuzzleId, PuzzleRef, PuzzleSet, PuzzleSetId, UserId, UserStats};
use storage::repository::{PuzzleRepository, PuzzleSetRepository, Storage, UserRepository};

use crate::error::ImportError;

const COL_ID: usize = 0;
const COL_FEN: usize = 1;
const COL_MOVES: usize = 2;
const COL_THEMES: usize = 7;

/// Parse one row of the public puzzle database export:
/// `PuzzleId,FEN,Moves,Rating,RatingDeviation,Popularity,NbPlays,Themes,...`.
///
/// Returns `None` for the header row and for rows that do not describe a
/// playable puzzle.
#[must_use]
pub fn parse_puzzle_row(row: &str) -> Option<Puzzle> {
    let columns: Vec<&str> = row.trim().split(',').collect();
    let id = columns.get(COL_ID)?.trim();
    if id.is_empty() || is_header(row) {
        return None;
    }
    let fen = columns.get(COL_FEN)?;
    let moves = columns.get(COL_MOVES)?;
    let themes = columns
        .get(COL_THEMES)
        .map(|t| t.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default();

    Puzzle::from_move_list(PuzzleId::new(id).ok()?, *fen, moves, themes).ok()
}

/// How an import went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub set_id: PuzzleSetId,
    pub imported: usize,
    pub skipped: usize,
}

/// Loads puzzles from CSV text and groups them into a new set.
#[derive(Clone)]
pub struct PuzzleImportService {
    puzzles: Arc<dyn PuzzleRepository>,
    sets: Arc<dyn PuzzleSetRepository>,
    users: Arc<dyn UserRepository>,
}

impl PuzzleImportService {
    #[must_use]
    pub fn new(storage: &Storage) -> Self {
        Self {
            puzzles: Arc::clone(&storage.puzzles),
            sets: Arc::clone(&storage.sets),
            users: Arc::clone(&storage.users),
        }
    }

    /// Store every valid row (up to `limit`) and create set `set_id` for
    /// `user_id` with them in file order. The user record is created if missing.
    ///
    /// # Errors
    ///
    /// Returns `ImportError::NoPuzzles` if no row is usable,
    /// `ImportError::SetExists` if `set_id` is taken and `ImportError::Storage`
    /// on repository failures.
    pub async fn import_csv(
        &self,
        csv: &str,
        set_id: PuzzleSetId,
        user_id: UserId,
        title: &str,
        limit: Option<usize>,
    ) -> Result<ImportReport, ImportError> {
        if self.sets.get_set(set_id).await?.is_some() {
            return Err(ImportError::SetExists(set_id));
        }

        let mut refs: Vec<PuzzleRef> = Vec::new();
        let mut skipped = 0;
        for row in csv.lines().filter(|r| !r.trim().is_empty() && !is_header(r)) {
            if limit.is_some_and(|max| refs.len() >= max) {
                break;
            }
            let Some(puzzle) = parse_puzzle_row(row) else {
                skipped += 1;
                continue;
            };
            if refs.iter().any(|r| &r.puzzle_id == puzzle.id()) {
                skipped += 1;
                continue;
            }
            self.puzzles.upsert_puzzle(&puzzle).await?;
            let order = u32::try_from(refs.len()).map_err(|_| ImportError::TooLarge)?;
            refs.push(PuzzleRef::new(puzzle.id().clone(), order));
        }

        if refs.is_empty() {
            return Err(ImportError::NoPuzzles);
        }
        let imported = refs.len();
        let set = PuzzleSet::new(set_id, user_id, title, refs)?;
        self.sets.upsert_set(&set).await?;

        if self.users.get_user(user_id).await?.is_none() {
            self.users.upsert_user(&UserStats::new(user_id)).await?;
        }

        tracing::info!(%set_id, imported, skipped, "puzzle set imported");
        Ok(ImportReport {
            set_id,
            imported,
            skipped,
        })
    }
}

fn is_header(row: &str) -> bool {
    row.trim_start().starts_with("PuzzleId,")
}
