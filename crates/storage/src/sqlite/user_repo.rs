use puzzle_core::model::{ThemeCount, UserId, UserStats, UserStatsDelta};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{conn, i64_to_u32, ser, user_id_from_i64, user_id_to_i64};
use crate::repository::{StorageError, UserRepository};

#[async_trait::async_trait]
impl UserRepository for SqliteRepository {
    async fn upsert_user(&self, user: &UserStats) -> Result<(), StorageError> {
        let user_id = user_id_to_i64(user.id)?;
        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query(
            r"
            INSERT INTO users (id, total_puzzle_solved, total_set_completed, daily_streak, is_sponsor)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                total_puzzle_solved = excluded.total_puzzle_solved,
                total_set_completed = excluded.total_set_completed,
                daily_streak = excluded.daily_streak,
                is_sponsor = excluded.is_sponsor
            ",
        )
        .bind(user_id)
        .bind(i64::from(user.total_puzzle_solved))
        .bind(i64::from(user.total_set_completed))
        .bind(i64::from(user.daily_streak))
        .bind(user.is_sponsor)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        sqlx::query("DELETE FROM user_themes WHERE user_id = ?1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        for (position, theme) in user.themes.iter().enumerate() {
            insert_theme(&mut tx, user_id, position, theme).await?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<UserStats>, StorageError> {
        let user_id = user_id_to_i64(id)?;
        let Some(row) = sqlx::query(
            r"
            SELECT id, total_puzzle_solved, total_set_completed, daily_streak, is_sponsor
            FROM users WHERE id = ?1
            ",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?
        else {
            return Ok(None);
        };

        let themes = sqlx::query(
            "SELECT title, count FROM user_themes WHERE user_id = ?1 ORDER BY position ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?
        .iter()
        .map(|row| {
            Ok(ThemeCount::new(
                row.try_get::<String, _>("title").map_err(ser)?,
                i64_to_u32("count", row.try_get("count").map_err(ser)?)?,
            ))
        })
        .collect::<Result<Vec<_>, StorageError>>()?;

        let mut user = UserStats::new(user_id_from_i64(row.try_get("id").map_err(ser)?)?);
        user.total_puzzle_solved = i64_to_u32(
            "total_puzzle_solved",
            row.try_get("total_puzzle_solved").map_err(ser)?,
        )?;
        user.total_set_completed = i64_to_u32(
            "total_set_completed",
            row.try_get("total_set_completed").map_err(ser)?,
        )?;
        user.daily_streak = i64_to_u32("daily_streak", row.try_get("daily_streak").map_err(ser)?)?;
        user.is_sponsor = row.try_get::<i64, _>("is_sponsor").map_err(ser)? != 0;
        user.themes = themes;
        Ok(Some(user))
    }

    async fn apply_user_delta(
        &self,
        id: UserId,
        delta: &UserStatsDelta,
    ) -> Result<(), StorageError> {
        let user_id = user_id_to_i64(id)?;
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let updated = sqlx::query(
            r"
            UPDATE users
            SET total_puzzle_solved = total_puzzle_solved + ?2,
                total_set_completed = total_set_completed + ?3
            WHERE id = ?1
            ",
        )
        .bind(user_id)
        .bind(i64::from(delta.puzzles_solved))
        .bind(i64::from(delta.sets_completed))
        .execute(&mut *tx)
        .await
        .map_err(conn)?;
        if updated.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        let theme_len: i64 = sqlx::query("SELECT COUNT(*) AS n FROM user_themes WHERE user_id = ?1")
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(conn)?
            .try_get("n")
            .map_err(ser)?;
        let theme_len = usize::try_from(theme_len).map_err(ser)?;

        for &index in &delta.theme_increments {
            if index >= theme_len {
                return Err(StorageError::Serialization(format!(
                    "theme index {index} out of range for {theme_len} themes"
                )));
            }
            sqlx::query(
                "UPDATE user_themes SET count = count + 1 WHERE user_id = ?1 AND position = ?2",
            )
            .bind(user_id)
            .bind(i64::try_from(index).map_err(ser)?)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        for (offset, theme) in delta.new_themes.iter().enumerate() {
            insert_theme(&mut tx, user_id, theme_len + offset, theme).await?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }
}

async fn insert_theme(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_id: i64,
    position: usize,
    theme: &ThemeCount,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO user_themes (user_id, position, title, count) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(user_id)
    .bind(i64::try_from(position).map_err(ser)?)
    .bind(theme.title.as_str())
    .bind(i64::from(theme.count))
    .execute(&mut **tx)
    .await
    .map_err(conn)?;
    Ok(())
}
