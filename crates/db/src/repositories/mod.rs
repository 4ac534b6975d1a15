use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use switchboard_core::domain::conversation::ConversationId;
use switchboard_core::domain::handoff::HandoffRecord;
use switchboard_core::domain::specialist::SpecialistId;
use switchboard_core::feature_flags::RolloutConfig;

pub mod handoff;
pub mod memory;
pub mod rollout;

pub use handoff::SqlHandoffRepository;
pub use memory::{InMemoryHandoffRepository, InMemoryRolloutRepository};
pub use rollout::SqlRolloutRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// An accepted handoff together with the conversation it happened in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredHandoff {
    pub conversation_id: ConversationId,
    #[serde(flatten)]
    pub record: HandoffRecord,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffPathCount {
    pub from_specialist: SpecialistId,
    pub to_specialist: SpecialistId,
    pub count: u64,
}

#[async_trait]
pub trait HandoffRepository: Send + Sync {
    /// Stores every record of one turn, or none of them.
    async fn append_all(
        &self,
        conversation_id: &ConversationId,
        records: &[HandoffRecord],
    ) -> Result<(), RepositoryError>;

    async fn append(
        &self,
        conversation_id: &ConversationId,
        record: &HandoffRecord,
    ) -> Result<(), RepositoryError> {
        self.append_all(conversation_id, std::slice::from_ref(record)).await
    }

    /// Oldest first.
    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<HandoffRecord>, RepositoryError>;

    /// Handoffs with `since <= timestamp < until`, oldest first.
    async fn list_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<StoredHandoff>, RepositoryError>;

    /// Counts per `(from, to)` path in the window, most frequent first.
    async fn path_counts_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<HandoffPathCount>, RepositoryError>;
}

#[async_trait]
pub trait RolloutRepository: Send + Sync {
    /// Persisted configuration; `default_percentage` applies when no
    /// percentage has been saved yet.
    async fn load(&self, default_percentage: u8) -> Result<RolloutConfig, RepositoryError>;
    async fn save_percentage(&self, percentage: u8) -> Result<(), RepositoryError>;
    async fn save_override(&self, user_id: &str, enabled: bool) -> Result<(), RepositoryError>;
    async fn clear_override(&self, user_id: &str) -> Result<(), RepositoryError>;
}

/// Fixed-width UTC text so stored timestamps order lexicographically.
pub(crate) fn timestamp_text(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("timestamp `{value}`: {error}")))
}

pub(crate) fn parse_specialist(value: &str) -> Result<SpecialistId, RepositoryError> {
    SpecialistId::parse(value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown specialist `{value}`")))
}

pub(crate) fn sort_path_counts(counts: &mut [HandoffPathCount]) {
    counts.sort_by(|left, right| {
        right
            .count
            .cmp(&left.count)
            .then_with(|| left.from_specialist.cmp(&right.from_specialist))
            .then_with(|| left.to_specialist.cmp(&right.to_specialist))
    });
}
