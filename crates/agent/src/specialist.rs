use std::sync::Arc;

use serde::{Deserialize, Serialize};
use switchboard_core::domain::conversation::ConversationState;
use switchboard_core::domain::handoff::HandoffRequest;

use crate::consent::ConsentGate;
use crate::context::{extract_findings, extract_recommendations, step_limit_summary};
use crate::policy::{PolicyInput, SpecialistPolicy, StepDecision};
use crate::profiles::SpecialistProfile;
use crate::tools::{ToolRegistry, ToolRequest};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    Answer,
    PermissionRequest,
    StepLimitSummary,
    ImpasseSummary,
    ErrorRecovery,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub content: String,
    pub kind: AnswerKind,
}

impl FinalAnswer {
    pub fn new(kind: AnswerKind, content: impl Into<String>) -> Self {
        Self { content: content.into(), kind }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum StepOutput {
    ToolRequest(ToolRequest),
    FinalAnswer(FinalAnswer),
    HandoffRequest(HandoffRequest),
}

/// A named responder: a profile, the policy that drives it, and the step
/// budget and consent rules it runs under.
#[derive(Clone)]
pub struct SpecialistUnit {
    profile: SpecialistProfile,
    policy: Arc<dyn SpecialistPolicy>,
    consent: Arc<ConsentGate>,
    tools: Arc<ToolRegistry>,
    max_steps: u32,
}

impl SpecialistUnit {
    pub fn new(
        profile: SpecialistProfile,
        policy: Arc<dyn SpecialistPolicy>,
        consent: Arc<ConsentGate>,
        tools: Arc<ToolRegistry>,
        max_steps: u32,
    ) -> Self {
        Self { profile, policy, consent, tools, max_steps }
    }

    pub fn profile(&self) -> &SpecialistProfile {
        &self.profile
    }

    /// Runs one step. The policy is awaited against an immutable view first;
    /// the step count, consent and context updates are applied only once it
    /// has returned, so dropping this future mutates nothing.
    pub async fn step(&self, state: &mut ConversationState) -> StepOutput {
        let id = self.profile.id;
        if state.step_count(id) >= self.max_steps {
            return self.budget_exhausted(state);
        }

        let decision = {
            let input = PolicyInput { profile: &self.profile, state: &*state };
            self.policy.decide(&input).await
        };

        if state.record_step(id, self.max_steps).is_err() {
            return self.budget_exhausted(state);
        }

        let decision = match decision {
            Ok(decision) => decision,
            Err(error) => {
                tracing::warn!(
                    event_name = "agent.specialist.policy_failed",
                    conversation_id = %state.conversation_id.0,
                    specialist = id.as_str(),
                    error = %error,
                    "specialist policy failed"
                );
                return StepOutput::FinalAnswer(FinalAnswer::new(
                    AnswerKind::ErrorRecovery,
                    format!(
                        "I ran into a problem while working on this ({error}). Could you rephrase \
                         the request or add more detail so I can try again?"
                    ),
                ));
            }
        };

        match decision {
            StepDecision::UseTool(request) => {
                if self.tools.is_sensitive(&request.tool_name) && !self.consent.check(state) {
                    state.mark_consent_requested();
                    tracing::info!(
                        event_name = "agent.consent.requested",
                        conversation_id = %state.conversation_id.0,
                        specialist = id.as_str(),
                        tool = %request.tool_name,
                        "asking user for live instance permission"
                    );
                    return StepOutput::FinalAnswer(FinalAnswer::new(
                        AnswerKind::PermissionRequest,
                        self.consent.permission_request(),
                    ));
                }
                if self.tools.is_sensitive(&request.tool_name) {
                    self.consent.grant(state);
                }
                StepOutput::ToolRequest(request)
            }
            StepDecision::Answer(content) => {
                state
                    .context_mut(id)
                    .absorb(extract_findings(&content), extract_recommendations(&content));
                StepOutput::FinalAnswer(FinalAnswer::new(AnswerKind::Answer, content))
            }
            StepDecision::HandOff(request) => StepOutput::HandoffRequest(request),
        }
    }

    fn budget_exhausted(&self, state: &ConversationState) -> StepOutput {
        tracing::info!(
            event_name = "agent.specialist.step_limit",
            conversation_id = %state.conversation_id.0,
            specialist = self.profile.id.as_str(),
            max_steps = self.max_steps,
            "specialist reached its step budget"
        );
        StepOutput::FinalAnswer(FinalAnswer::new(
            AnswerKind::StepLimitSummary,
            step_limit_summary(self.profile.id, self.max_steps, state.context(self.profile.id)),
        ))
    }
}
