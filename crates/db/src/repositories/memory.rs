use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use switchboard_core::domain::conversation::ConversationId;
use switchboard_core::domain::handoff::HandoffRecord;
use switchboard_core::feature_flags::{validate_percentage, RolloutConfig};

use super::{
    sort_path_counts, HandoffPathCount, HandoffRepository, RepositoryError, RolloutRepository,
    StoredHandoff,
};

#[derive(Default)]
pub struct InMemoryHandoffRepository {
    records: RwLock<Vec<StoredHandoff>>,
}

impl InMemoryHandoffRepository {
    async fn in_window(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Vec<StoredHandoff> {
        let records = self.records.read().await;
        let mut window: Vec<StoredHandoff> = records
            .iter()
            .filter(|stored| stored.record.timestamp >= since && stored.record.timestamp < until)
            .cloned()
            .collect();
        window.sort_by_key(|stored| stored.record.timestamp);
        window
    }
}

#[async_trait::async_trait]
impl HandoffRepository for InMemoryHandoffRepository {
    async fn append_all(
        &self,
        conversation_id: &ConversationId,
        batch: &[HandoffRecord],
    ) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        records.extend(batch.iter().map(|record| StoredHandoff {
            conversation_id: conversation_id.clone(),
            record: record.clone(),
        }));
        Ok(())
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<HandoffRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|stored| &stored.conversation_id == conversation_id)
            .map(|stored| stored.record.clone())
            .collect())
    }

    async fn list_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<StoredHandoff>, RepositoryError> {
        Ok(self.in_window(since, until).await)
    }

    async fn path_counts_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<HandoffPathCount>, RepositoryError> {
        let mut totals = BTreeMap::new();
        for stored in self.in_window(since, until).await {
            *totals.entry((stored.record.from_specialist, stored.record.to_specialist)).or_insert(0) +=
                1;
        }
        let mut counts: Vec<HandoffPathCount> = totals
            .into_iter()
            .map(|((from_specialist, to_specialist), count)| HandoffPathCount {
                from_specialist,
                to_specialist,
                count,
            })
            .collect();
        sort_path_counts(&mut counts);
        Ok(counts)
    }
}

#[derive(Default)]
pub struct InMemoryRolloutRepository {
    percentage: RwLock<Option<u8>>,
    overrides: RwLock<BTreeMap<String, bool>>,
}

#[async_trait::async_trait]
impl RolloutRepository for InMemoryRolloutRepository {
    async fn load(&self, default_percentage: u8) -> Result<RolloutConfig, RepositoryError> {
        let rollout_percentage = self.percentage.read().await.unwrap_or(default_percentage);
        let overrides = self.overrides.read().await.clone();
        Ok(RolloutConfig { rollout_percentage, overrides })
    }

    async fn save_percentage(&self, percentage: u8) -> Result<(), RepositoryError> {
        let percentage = validate_percentage(i64::from(percentage))
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        *self.percentage.write().await = Some(percentage);
        Ok(())
    }

    async fn save_override(&self, user_id: &str, enabled: bool) -> Result<(), RepositoryError> {
        self.overrides.write().await.insert(user_id.to_string(), enabled);
        Ok(())
    }

    async fn clear_override(&self, user_id: &str) -> Result<(), RepositoryError> {
        self.overrides.write().await.remove(user_id);
        Ok(())
    }
}
