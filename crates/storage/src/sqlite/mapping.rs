use puzzle_core::grading::Grade;
use puzzle_core::model::{Puzzle, PuzzleId, PuzzleSetId, UserId};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn i64_to_u32(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn id_to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn set_id_to_i64(id: PuzzleSetId) -> Result<i64, StorageError> {
    id_to_i64("set_id", id.value())
}

pub(crate) fn user_id_to_i64(id: UserId) -> Result<i64, StorageError> {
    id_to_i64("user_id", id.value())
}

pub(crate) fn set_id_from_i64(v: i64) -> Result<PuzzleSetId, StorageError> {
    Ok(PuzzleSetId::new(i64_to_u64("set_id", v)?))
}

pub(crate) fn user_id_from_i64(v: i64) -> Result<UserId, StorageError> {
    Ok(UserId::new(i64_to_u64("user_id", v)?))
}

pub(crate) fn grade_from_i64(value: i64) -> Result<Grade, StorageError> {
    let raw = u8::try_from(value)
        .map_err(|_| StorageError::Serialization(format!("invalid grade: {value}")))?;
    Grade::new(raw).map_err(ser)
}

/// Themes are stored space separated, as in the public puzzle database.
pub(crate) fn themes_to_column(themes: &[String]) -> String {
    themes.join(" ")
}

pub(crate) fn map_puzzle_row(row: &SqliteRow) -> Result<Puzzle, StorageError> {
    let id = PuzzleId::new(row.try_get::<String, _>("id").map_err(ser)?).map_err(ser)?;
    let fen: String = row.try_get("fen").map_err(ser)?;
    let moves: String = row.try_get("moves").map_err(ser)?;
    let themes: String = row.try_get("themes").map_err(ser)?;
    let themes = themes.split_whitespace().map(str::to_owned).collect();
    Puzzle::from_move_list(id, fen, &moves, themes).map_err(ser)
}
