use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::Row;

use switchboard_core::feature_flags::{validate_percentage, RolloutConfig};

use super::{timestamp_text, RepositoryError, RolloutRepository};
use crate::DbPool;

pub struct SqlRolloutRepository {
    pool: DbPool,
}

impl SqlRolloutRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RolloutRepository for SqlRolloutRepository {
    async fn load(&self, default_percentage: u8) -> Result<RolloutConfig, RepositoryError> {
        let stored: Option<i64> = sqlx::query_scalar(
            "SELECT rollout_percentage FROM rollout_settings WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        let rollout_percentage = match stored {
            Some(value) => {
                validate_percentage(value).map_err(|e| RepositoryError::Decode(e.to_string()))?
            }
            None => default_percentage,
        };

        let rows = sqlx::query("SELECT user_id, enabled FROM rollout_overrides ORDER BY user_id")
            .fetch_all(&self.pool)
            .await?;
        let mut overrides = BTreeMap::new();
        for row in &rows {
            let user_id: String =
                row.try_get("user_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
            let enabled: bool =
                row.try_get("enabled").map_err(|e| RepositoryError::Decode(e.to_string()))?;
            overrides.insert(user_id, enabled);
        }

        Ok(RolloutConfig { rollout_percentage, overrides })
    }

    async fn save_percentage(&self, percentage: u8) -> Result<(), RepositoryError> {
        let percentage = validate_percentage(i64::from(percentage))
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        sqlx::query(
            "INSERT INTO rollout_settings (id, rollout_percentage, updated_at)
             VALUES (1, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 rollout_percentage = excluded.rollout_percentage,
                 updated_at = excluded.updated_at",
        )
        .bind(i64::from(percentage))
        .bind(timestamp_text(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_override(&self, user_id: &str, enabled: bool) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO rollout_overrides (user_id, enabled, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                 enabled = excluded.enabled,
                 updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(enabled)
        .bind(timestamp_text(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_override(&self, user_id: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM rollout_overrides WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
