use std::collections::HashMap;

use puzzle_core::model::{
    CycleCompletionDelta, PuzzleCompletionDelta, PuzzleId, PuzzleRef, PuzzleSet, PuzzleSetId,
    UserId,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::SqliteRepository;
use super::mapping::{
    conn, grade_from_i64, i64_to_u32, ser, set_id_from_i64, set_id_to_i64, user_id_from_i64,
    user_id_to_i64,
};
use crate::repository::{PuzzleSetRepository, StorageError};

#[async_trait::async_trait]
impl PuzzleSetRepository for SqliteRepository {
    async fn upsert_set(&self, set: &PuzzleSet) -> Result<(), StorageError> {
        let set_id = set_id_to_i64(set.id())?;
        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query(
            r"
            INSERT INTO puzzle_sets (id, user_id, title, current_time_secs, progression, length, cycles)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                title = excluded.title,
                current_time_secs = excluded.current_time_secs,
                progression = excluded.progression,
                length = excluded.length,
                cycles = excluded.cycles
            ",
        )
        .bind(set_id)
        .bind(user_id_to_i64(set.user_id())?)
        .bind(set.title())
        .bind(set.current_time())
        .bind(i64::from(set.progression()))
        .bind(i64::from(set.length()))
        .bind(i64::from(set.cycles()))
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        for table in ["set_puzzle_attempts", "set_cycle_times", "set_puzzles"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE set_id = ?1"))
                .bind(set_id)
                .execute(&mut *tx)
                .await
                .map_err(conn)?;
        }

        for entry in set.puzzles() {
            sqlx::query(
                r"
                INSERT INTO set_puzzles (set_id, puzzle_id, ord, played, solve_count, streak)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ",
            )
            .bind(set_id)
            .bind(entry.puzzle_id.as_str())
            .bind(i64::from(entry.order))
            .bind(i64::from(entry.played))
            .bind(i64::from(entry.count))
            .bind(i64::from(entry.streak))
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

            let attempts = entry
                .mistakes
                .iter()
                .zip(&entry.time_taken)
                .zip(&entry.grades);
            for ((mistakes, time_taken), grade) in attempts {
                sqlx::query(
                    r"
                    INSERT INTO set_puzzle_attempts (set_id, puzzle_id, mistakes, time_taken, grade)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ",
                )
                .bind(set_id)
                .bind(entry.puzzle_id.as_str())
                .bind(i64::from(*mistakes))
                .bind(*time_taken)
                .bind(i64::from(grade.value()))
                .execute(&mut *tx)
                .await
                .map_err(conn)?;
            }
        }

        for total in set.times() {
            sqlx::query("INSERT INTO set_cycle_times (set_id, total_time) VALUES (?1, ?2)")
                .bind(set_id)
                .bind(*total)
                .execute(&mut *tx)
                .await
                .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn get_set(&self, id: PuzzleSetId) -> Result<Option<PuzzleSet>, StorageError> {
        self.load_set(set_id_to_i64(id)?).await
    }

    async fn list_sets(&self, user_id: UserId) -> Result<Vec<PuzzleSet>, StorageError> {
        let rows = sqlx::query("SELECT id FROM puzzle_sets WHERE user_id = ?1 ORDER BY id ASC")
            .bind(user_id_to_i64(user_id)?)
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;

        let mut sets = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id").map_err(ser)?;
            if let Some(set) = self.load_set(id).await? {
                sets.push(set);
            }
        }
        Ok(sets)
    }

    async fn record_puzzle_completion(
        &self,
        set_id: PuzzleSetId,
        delta: &PuzzleCompletionDelta,
    ) -> Result<PuzzleRef, StorageError> {
        let set_id_i64 = set_id_to_i64(set_id)?;
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let row = sqlx::query("SELECT played FROM set_puzzles WHERE set_id = ?1 AND puzzle_id = ?2")
            .bind(set_id_i64)
            .bind(delta.puzzle_id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(conn)?
            .ok_or(StorageError::NotFound)?;
        let first_this_cycle = row.try_get::<i64, _>("played").map_err(ser)? == 0;

        sqlx::query(
            r"
            UPDATE set_puzzles
            SET played = 1, solve_count = solve_count + 1, streak = ?3
            WHERE set_id = ?1 AND puzzle_id = ?2
            ",
        )
        .bind(set_id_i64)
        .bind(delta.puzzle_id.as_str())
        .bind(i64::from(delta.streak))
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        sqlx::query(
            r"
            INSERT INTO set_puzzle_attempts (set_id, puzzle_id, mistakes, time_taken, grade)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(set_id_i64)
        .bind(delta.puzzle_id.as_str())
        .bind(i64::from(delta.mistakes))
        .bind(delta.time_taken_secs)
        .bind(i64::from(delta.grade.value()))
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        sqlx::query(
            r"
            UPDATE puzzle_sets
            SET current_time_secs = current_time_secs + ?2,
                progression = CASE
                    WHEN ?3 AND progression < length THEN progression + 1
                    ELSE progression
                END
            WHERE id = ?1
            ",
        )
        .bind(set_id_i64)
        .bind(delta.time_with_penalty_secs)
        .bind(first_this_cycle)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        tx.commit().await.map_err(conn)?;

        self.load_set(set_id_i64)
            .await?
            .and_then(|set| set.puzzle(&delta.puzzle_id).cloned())
            .ok_or(StorageError::NotFound)
    }

    async fn record_cycle_completion(
        &self,
        set_id: PuzzleSetId,
        delta: &CycleCompletionDelta,
    ) -> Result<(), StorageError> {
        let set_id = set_id_to_i64(set_id)?;
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let updated = sqlx::query(
            r"
            UPDATE puzzle_sets
            SET cycles = cycles + 1, current_time_secs = 0, progression = 0
            WHERE id = ?1
            ",
        )
        .bind(set_id)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;
        if updated.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        sqlx::query("INSERT INTO set_cycle_times (set_id, total_time) VALUES (?1, ?2)")
            .bind(set_id)
            .bind(delta.total_time_secs)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        sqlx::query("UPDATE set_puzzles SET played = 0 WHERE set_id = ?1")
            .bind(set_id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        tx.commit().await.map_err(conn)?;
        Ok(())
    }
}

impl SqliteRepository {
    async fn load_set(&self, set_id: i64) -> Result<Option<PuzzleSet>, StorageError> {
        let Some(set_row) = sqlx::query(
            r"
            SELECT id, user_id, title, current_time_secs, progression, length, cycles
            FROM puzzle_sets WHERE id = ?1
            ",
        )
        .bind(set_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?
        else {
            return Ok(None);
        };

        let puzzle_rows = sqlx::query(
            r"
            SELECT puzzle_id, ord, played, solve_count, streak
            FROM set_puzzles WHERE set_id = ?1
            ORDER BY rowid ASC
            ",
        )
        .bind(set_id)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut puzzles = Vec::with_capacity(puzzle_rows.len());
        let mut index: HashMap<String, usize> = HashMap::with_capacity(puzzle_rows.len());
        for row in &puzzle_rows {
            let entry = map_puzzle_ref_row(row)?;
            index.insert(entry.puzzle_id.as_str().to_owned(), puzzles.len());
            puzzles.push(entry);
        }

        let attempt_rows = sqlx::query(
            r"
            SELECT puzzle_id, mistakes, time_taken, grade
            FROM set_puzzle_attempts WHERE set_id = ?1
            ORDER BY id ASC
            ",
        )
        .bind(set_id)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        for row in &attempt_rows {
            let puzzle_id: String = row.try_get("puzzle_id").map_err(ser)?;
            let Some(&slot) = index.get(&puzzle_id) else {
                return Err(StorageError::Serialization(format!(
                    "attempt for unknown puzzle {puzzle_id}"
                )));
            };
            let entry = &mut puzzles[slot];
            entry
                .mistakes
                .push(i64_to_u32("mistakes", row.try_get("mistakes").map_err(ser)?)?);
            entry
                .time_taken
                .push(row.try_get("time_taken").map_err(ser)?);
            entry
                .grades
                .push(grade_from_i64(row.try_get("grade").map_err(ser)?)?);
        }

        let times = sqlx::query(
            "SELECT total_time FROM set_cycle_times WHERE set_id = ?1 ORDER BY id ASC",
        )
        .bind(set_id)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?
        .iter()
        .map(|row| row.try_get::<f64, _>("total_time").map_err(ser))
        .collect::<Result<Vec<_>, _>>()?;

        PuzzleSet::from_persisted(
            set_id_from_i64(set_row.try_get("id").map_err(ser)?)?,
            user_id_from_i64(set_row.try_get("user_id").map_err(ser)?)?,
            set_row.try_get::<String, _>("title").map_err(ser)?,
            puzzles,
            set_row.try_get("current_time_secs").map_err(ser)?,
            i64_to_u32("progression", set_row.try_get("progression").map_err(ser)?)?,
            i64_to_u32("length", set_row.try_get("length").map_err(ser)?)?,
            i64_to_u32("cycles", set_row.try_get("cycles").map_err(ser)?)?,
            times,
        )
        .map(Some)
        .map_err(ser)
    }
}

fn map_puzzle_ref_row(row: &SqliteRow) -> Result<PuzzleRef, StorageError> {
    let puzzle_id =
        PuzzleId::new(row.try_get::<String, _>("puzzle_id").map_err(ser)?).map_err(ser)?;
    let mut entry = PuzzleRef::new(
        puzzle_id,
        i64_to_u32("ord", row.try_get("ord").map_err(ser)?)?,
    );
    entry.played = row.try_get::<i64, _>("played").map_err(ser)? != 0;
    entry.count = i64_to_u32("solve_count", row.try_get("solve_count").map_err(ser)?)?;
    entry.streak = i64_to_u32("streak", row.try_get("streak").map_err(ser)?)?;
    Ok(entry)
}
