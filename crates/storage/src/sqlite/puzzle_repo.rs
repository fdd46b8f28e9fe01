use puzzle_core::model::{Puzzle, PuzzleId};

use super::SqliteRepository;
use super::mapping::{conn, map_puzzle_row, themes_to_column};
use crate::repository::{PuzzleRepository, StorageError};

#[async_trait::async_trait]
impl PuzzleRepository for SqliteRepository {
    async fn upsert_puzzle(&self, puzzle: &Puzzle) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO puzzles (id, fen, moves, themes)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                fen = excluded.fen,
                moves = excluded.moves,
                themes = excluded.themes
            ",
        )
        .bind(puzzle.id().as_str())
        .bind(puzzle.fen())
        .bind(puzzle.move_list())
        .bind(themes_to_column(puzzle.themes()))
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn get_puzzle(&self, id: &PuzzleId) -> Result<Option<Puzzle>, StorageError> {
        let row = sqlx::query("SELECT id, fen, moves, themes FROM puzzles WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        row.as_ref().map(map_puzzle_row).transpose()
    }
}
