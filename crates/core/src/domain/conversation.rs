use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::handoff::HandoffRecord;
use crate::domain::specialist::SpecialistId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::System => "system",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Specialist that produced the message, or that requested the tool call.
    pub specialist: Option<SpecialistId>,
    pub tool_name: Option<String>,
    pub is_error: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            specialist: None,
            tool_name: None,
            is_error: false,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(specialist: SpecialistId, content: impl Into<String>) -> Self {
        Self { specialist: Some(specialist), ..Self::new(Role::Assistant, content) }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn tool_result(
        specialist: SpecialistId,
        tool_name: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            specialist: Some(specialist),
            tool_name: Some(tool_name.into()),
            is_error,
            ..Self::new(Role::Tool, content)
        }
    }
}

/// Findings a specialist accumulated, carried forward so whoever owns the
/// conversation next does not need to re-derive them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentContext {
    pub specialist: SpecialistId,
    pub findings: Vec<String>,
    pub recommendations: Vec<String>,
    pub constraints: Vec<String>,
    pub open_questions: Vec<String>,
    /// Context summaries received through accepted handoffs, oldest first.
    pub handoff_notes: Vec<String>,
    pub last_active: Option<DateTime<Utc>>,
}

impl AgentContext {
    pub fn new(specialist: SpecialistId) -> Self {
        Self {
            specialist,
            findings: Vec::new(),
            recommendations: Vec::new(),
            constraints: Vec::new(),
            open_questions: Vec::new(),
            handoff_notes: Vec::new(),
            last_active: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
            && self.recommendations.is_empty()
            && self.constraints.is_empty()
            && self.open_questions.is_empty()
            && self.handoff_notes.is_empty()
    }

    pub fn absorb(&mut self, findings: Vec<String>, recommendations: Vec<String>) {
        extend_unique(&mut self.findings, findings);
        extend_unique(&mut self.recommendations, recommendations);
        self.last_active = Some(Utc::now());
    }
}

fn extend_unique(target: &mut Vec<String>, values: Vec<String>) {
    for value in values {
        if !target.contains(&value) {
            target.push(value);
        }
    }
}

/// The single mutable record for one conversation. Exclusively owned by the
/// task processing the current turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub conversation_id: ConversationId,
    pub user_id: Option<String>,
    messages: Vec<Message>,
    current_specialist: Option<SpecialistId>,
    previous_specialist: Option<SpecialistId>,
    handoff_history: Vec<HandoffRecord>,
    specialist_contexts: BTreeMap<SpecialistId, AgentContext>,
    consent_granted: bool,
    consent_requested: bool,
    step_counts: BTreeMap<SpecialistId, u32>,
}

impl ConversationState {
    pub fn new(conversation_id: ConversationId, user_id: Option<String>) -> Self {
        Self {
            conversation_id,
            user_id,
            messages: Vec::new(),
            current_specialist: None,
            previous_specialist: None,
            handoff_history: Vec::new(),
            specialist_contexts: BTreeMap::new(),
            consent_granted: false,
            consent_requested: false,
            step_counts: BTreeMap::new(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn append_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|message| message.role == Role::User)
    }

    /// Messages appended since the most recent user message.
    pub fn messages_since_last_user(&self) -> &[Message] {
        let start = self
            .messages
            .iter()
            .rposition(|message| message.role == Role::User)
            .map(|index| index + 1)
            .unwrap_or(0);
        &self.messages[start..]
    }

    pub fn current_specialist(&self) -> Option<SpecialistId> {
        self.current_specialist
    }

    pub fn previous_specialist(&self) -> Option<SpecialistId> {
        self.previous_specialist
    }

    /// Assigns the first owner of an ownerless conversation.
    pub fn assign_initial_specialist(
        &mut self,
        specialist: SpecialistId,
    ) -> Result<(), DomainError> {
        if let Some(owner) = self.current_specialist {
            return Err(DomainError::InvariantViolation(format!(
                "conversation is already owned by `{owner}`"
            )));
        }
        self.current_specialist = Some(specialist);
        Ok(())
    }

    pub fn handoff_history(&self) -> &[HandoffRecord] {
        &self.handoff_history
    }

    /// Records an accepted handoff and transfers ownership. Validates before
    /// mutating, so a failed call leaves the state untouched.
    pub fn apply_handoff(&mut self, record: HandoffRecord) -> Result<(), DomainError> {
        if self.current_specialist != Some(record.from_specialist) {
            return Err(DomainError::InvariantViolation(format!(
                "handoff from `{}` but conversation is owned by {:?}",
                record.from_specialist, self.current_specialist
            )));
        }
        if let Some(last) = self.handoff_history.last() {
            if record.timestamp < last.timestamp {
                return Err(DomainError::InvariantViolation(
                    "handoff history must be ordered by time".to_string(),
                ));
            }
        }

        let target = record.to_specialist;
        let summary = record.context_summary.trim().to_string();

        self.previous_specialist = self.current_specialist;
        self.current_specialist = Some(target);
        let context = self.context_mut(target);
        if !summary.is_empty() {
            context.handoff_notes.push(summary);
        }
        context.last_active = Some(record.timestamp);
        self.handoff_history.push(record);
        Ok(())
    }

    pub fn context(&self, specialist: SpecialistId) -> Option<&AgentContext> {
        self.specialist_contexts.get(&specialist)
    }

    pub fn context_mut(&mut self, specialist: SpecialistId) -> &mut AgentContext {
        self.specialist_contexts
            .entry(specialist)
            .or_insert_with(|| AgentContext::new(specialist))
    }

    pub fn consent_granted(&self) -> bool {
        self.consent_granted
    }

    /// One-way: there is no way to revoke consent within a conversation.
    pub fn grant_consent(&mut self) {
        self.consent_granted = true;
    }

    pub fn consent_requested(&self) -> bool {
        self.consent_requested
    }

    pub fn mark_consent_requested(&mut self) {
        self.consent_requested = true;
    }

    pub fn step_count(&self, specialist: SpecialistId) -> u32 {
        self.step_counts.get(&specialist).copied().unwrap_or(0)
    }

    pub fn step_counts(&self) -> &BTreeMap<SpecialistId, u32> {
        &self.step_counts
    }

    /// Counts one execution step for `specialist`, refusing to go past `max`.
    pub fn record_step(&mut self, specialist: SpecialistId, max: u32) -> Result<u32, DomainError> {
        let current = self.step_count(specialist);
        if current >= max {
            return Err(DomainError::StepBudgetExceeded { specialist, max });
        }
        let next = current + 1;
        self.step_counts.insert(specialist, next);
        Ok(next)
    }
}
