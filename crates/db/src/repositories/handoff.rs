use chrono::{DateTime, Utc};
use sqlx::Row;

use switchboard_core::domain::conversation::ConversationId;
use switchboard_core::domain::handoff::HandoffRecord;

use super::{
    parse_specialist, parse_timestamp, sort_path_counts, timestamp_text, HandoffPathCount,
    HandoffRepository, RepositoryError, StoredHandoff,
};
use crate::DbPool;

pub struct SqlHandoffRepository {
    pool: DbPool,
}

impl SqlHandoffRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<HandoffRecord, RepositoryError> {
    let from: String =
        row.try_get("from_specialist").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let to: String =
        row.try_get("to_specialist").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let reason: String =
        row.try_get("reason").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let context_summary: String =
        row.try_get("context_summary").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(HandoffRecord {
        from_specialist: parse_specialist(&from)?,
        to_specialist: parse_specialist(&to)?,
        reason,
        context_summary,
        timestamp: parse_timestamp(&created_at)?,
    })
}

#[async_trait::async_trait]
impl HandoffRepository for SqlHandoffRepository {
    async fn append_all(
        &self,
        conversation_id: &ConversationId,
        records: &[HandoffRecord],
    ) -> Result<(), RepositoryError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                "INSERT INTO handoff_records
                     (conversation_id, from_specialist, to_specialist, reason, context_summary, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&conversation_id.0)
            .bind(record.from_specialist.as_str())
            .bind(record.to_specialist.as_str())
            .bind(&record.reason)
            .bind(&record.context_summary)
            .bind(timestamp_text(record.timestamp))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<HandoffRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT from_specialist, to_specialist, reason, context_summary, created_at
             FROM handoff_records
             WHERE conversation_id = ?
             ORDER BY id ASC",
        )
        .bind(&conversation_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn list_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<StoredHandoff>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT conversation_id, from_specialist, to_specialist, reason, context_summary, created_at
             FROM handoff_records
             WHERE created_at >= ? AND created_at < ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(timestamp_text(since))
        .bind(timestamp_text(until))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let conversation_id: String = row
                    .try_get("conversation_id")
                    .map_err(|e| RepositoryError::Decode(e.to_string()))?;
                Ok(StoredHandoff {
                    conversation_id: ConversationId(conversation_id),
                    record: row_to_record(row)?,
                })
            })
            .collect()
    }

    async fn path_counts_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<HandoffPathCount>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT from_specialist, to_specialist, COUNT(*) AS count
             FROM handoff_records
             WHERE created_at >= ? AND created_at < ?
             GROUP BY from_specialist, to_specialist",
        )
        .bind(timestamp_text(since))
        .bind(timestamp_text(until))
        .fetch_all(&self.pool)
        .await?;

        let mut counts = rows
            .iter()
            .map(|row| {
                let from: String = row
                    .try_get("from_specialist")
                    .map_err(|e| RepositoryError::Decode(e.to_string()))?;
                let to: String =
                    row.try_get("to_specialist").map_err(|e| RepositoryError::Decode(e.to_string()))?;
                let count: i64 =
                    row.try_get("count").map_err(|e| RepositoryError::Decode(e.to_string()))?;
                Ok(HandoffPathCount {
                    from_specialist: parse_specialist(&from)?,
                    to_specialist: parse_specialist(&to)?,
                    count: u64::try_from(count)
                        .map_err(|_| RepositoryError::Decode(format!("negative count {count}")))?,
                })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;
        sort_path_counts(&mut counts);
        Ok(counts)
    }
}
