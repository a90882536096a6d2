use anyhow::Context;
use sqlx::SqlitePool;

use super::repo_types::{BodyMetrics, ProfileEntry, ProfileRow};
use crate::error::AppError;

impl ProfileEntry {
    /// Record one estimation request. The owner must exist; the store's
    /// foreign key is the only check.
    pub async fn append(
        db: &SqlitePool,
        user_id: i64,
        m: &BodyMetrics,
    ) -> Result<ProfileEntry, AppError> {
        let result = sqlx::query_as::<_, ProfileRow>(
            r#"
            INSERT INTO profiles (user_id, age, gender, height, weight, activity, goal)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id, user_id, age, gender, height, weight, activity, goal
            "#,
        )
        .bind(user_id)
        .bind(i64::from(m.age))
        .bind(m.gender.as_str())
        .bind(m.height_cm)
        .bind(m.weight_kg)
        .bind(m.activity.as_str())
        .bind(m.goal.as_str())
        .fetch_one(db)
        .await;

        match result {
            Ok(row) => Ok(row.into()),
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                Err(AppError::ForeignKey(user_id))
            }
            Err(e) => Err(anyhow::Error::new(e).context("insert profile").into()),
        }
    }

    /// Newest first; empty when the user has no history.
    pub async fn list_by_user(db: &SqlitePool, user_id: i64) -> anyhow::Result<Vec<ProfileEntry>> {
        let rows = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT id, user_id, age, gender, height, weight, activity, goal
            FROM profiles
            WHERE user_id = ?
            ORDER BY id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(db)
        .await
        .context("list profiles by user")?;
        Ok(rows.into_iter().map(ProfileEntry::from).collect())
    }
}
