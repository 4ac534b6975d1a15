use std::sync::Arc;

use switchboard_core::domain::conversation::{ConversationState, Message};
use switchboard_core::errors::ApplicationError;
use switchboard_core::flows::TerminationCause;

use crate::consent::ConsentGate;
use crate::context::{extract_findings, extract_recommendations};
use crate::policy::{PolicyInput, SpecialistPolicy, StepDecision};
use crate::profiles::SpecialistProfile;
use crate::runtime::{execute_tool, ToolCall, TurnOutcome};
use crate::specialist::AnswerKind;
use crate::tools::ToolRegistry;

/// Single generalist responder used when the multi-specialist path is off for
/// a user. It never hands off and never records specialist step counts; its
/// loop is capped per turn instead.
pub struct FallbackResponder {
    profile: SpecialistProfile,
    policy: Arc<dyn SpecialistPolicy>,
    tools: Arc<ToolRegistry>,
    consent: Arc<ConsentGate>,
    max_steps: u32,
}

impl FallbackResponder {
    pub fn new(
        policy: Arc<dyn SpecialistPolicy>,
        tools: Arc<ToolRegistry>,
        consent: Arc<ConsentGate>,
        max_steps: u32,
    ) -> Self {
        Self {
            profile: SpecialistProfile::generalist(),
            policy,
            tools,
            consent,
            max_steps: max_steps.max(1),
        }
    }

    pub async fn respond(
        &self,
        state: &mut ConversationState,
        user_message: &str,
        correlation_id: &str,
    ) -> Result<TurnOutcome, ApplicationError> {
        let text = user_message.trim();
        if text.is_empty() {
            return Err(ApplicationError::InvalidInput("message must not be empty".to_string()));
        }

        let id = self.profile.id;
        let mut working = state.clone();
        working.append_message(Message::user(text));
        let mut tool_calls = Vec::new();
        let mut outcome = None;

        for _ in 0..self.max_steps {
            let decision = {
                let input = PolicyInput { profile: &self.profile, state: &working };
                self.policy.decide(&input).await
            };

            match decision {
                Ok(StepDecision::UseTool(request)) => {
                    let sensitive = self.tools.is_sensitive(&request.tool_name);
                    if sensitive && !self.consent.check(&working) {
                        working.mark_consent_requested();
                        let prompt = self.consent.permission_request();
                        outcome = Some((AnswerKind::PermissionRequest, prompt));
                        break;
                    }
                    if sensitive {
                        self.consent.grant(&mut working);
                    }
                    let result = execute_tool(&self.tools, &self.profile, &working, &request).await;
                    let succeeded = result.is_ok();
                    let (content, is_error) = match result {
                        Ok(output) => (output, false),
                        Err(error) => (error.to_string(), true),
                    };
                    working.append_message(Message::tool_result(
                        id,
                        &request.tool_name,
                        content,
                        is_error,
                    ));
                    tool_calls.push(ToolCall {
                        specialist: id,
                        tool_name: request.tool_name,
                        succeeded,
                    });
                }
                Ok(StepDecision::Answer(content)) => {
                    outcome = Some((AnswerKind::Answer, content));
                    break;
                }
                Ok(StepDecision::HandOff(request)) => {
                    // Nobody to hand off to; answer with what the request carried.
                    let content = if request.context_summary.trim().is_empty() {
                        request.reason
                    } else {
                        request.context_summary
                    };
                    outcome = Some((AnswerKind::Answer, content));
                    break;
                }
                Err(error) => {
                    tracing::warn!(
                        event_name = "agent.fallback.policy_failed",
                        correlation_id = %correlation_id,
                        conversation_id = %working.conversation_id.0,
                        error = %error,
                        "fallback policy failed"
                    );
                    outcome = Some((
                        AnswerKind::ErrorRecovery,
                        format!(
                            "I ran into a problem while working on this ({error}). Could you \
                             rephrase the request so I can try again?"
                        ),
                    ));
                    break;
                }
            }
        }

        let (answer_kind, answer, termination) = match outcome {
            Some((kind, content)) => (kind, content, TerminationCause::FinalAnswer),
            None => (
                AnswerKind::StepLimitSummary,
                format!(
                    "I wasn't able to finish this within {} steps. Could you narrow the question \
                     down so I can give a complete answer?",
                    self.max_steps
                ),
                TerminationCause::StepBudgetExhausted,
            ),
        };

        if answer_kind == AnswerKind::Answer {
            working
                .context_mut(id)
                .absorb(extract_findings(&answer), extract_recommendations(&answer));
        }
        working.append_message(Message::assistant(id, answer.clone()));
        *state = working;

        tracing::info!(
            event_name = "agent.fallback.completed",
            correlation_id = %correlation_id,
            conversation_id = %state.conversation_id.0,
            termination = termination.as_str(),
            tool_calls = tool_calls.len(),
            "fallback turn completed"
        );

        Ok(TurnOutcome {
            answer,
            answer_kind,
            final_specialist: id,
            termination,
            routed: None,
            accepted_handoffs: Vec::new(),
            tool_calls,
        })
    }
}
