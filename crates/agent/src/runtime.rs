use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchboard_core::audit::{
    AuditCategory, AuditContext, AuditOutcome, AuditSink, TracingAuditSink,
};
use switchboard_core::config::OrchestrationConfig;
use switchboard_core::domain::conversation::{ConversationState, Message};
use switchboard_core::domain::handoff::HandoffRecord;
use switchboard_core::domain::specialist::SpecialistId;
use switchboard_core::errors::{ApplicationError, DomainError};
use switchboard_core::flows::{TerminationCause, TurnEngine, TurnEvent, TurnState};

use crate::consent::ConsentGate;
use crate::context::{handoff_refused_summary, impasse_summary};
use crate::coordinator::{HandoffCoordinator, HandoffDecision, HandoffRejection};
use crate::policy::{RuleBasedPolicy, SpecialistPolicy};
use crate::profiles::SpecialistProfile;
use crate::router::{select_initial, KeywordRouter, RouteDecision, Router};
use crate::specialist::{AnswerKind, FinalAnswer, SpecialistUnit, StepOutput};
use crate::tools::{default_registry, PreferenceStore, ToolError, ToolRegistry, ToolRequest};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub specialist: SpecialistId,
    pub tool_name: String,
    pub succeeded: bool,
}

/// Everything a caller needs to render and record one completed turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub answer: String,
    pub answer_kind: AnswerKind,
    pub final_specialist: SpecialistId,
    pub termination: TerminationCause,
    /// Set only when this turn assigned the first owner.
    pub routed: Option<RouteDecision>,
    pub accepted_handoffs: Vec<HandoffRecord>,
    pub tool_calls: Vec<ToolCall>,
}

/// Permission checks a tool call must pass before it reaches the registry.
/// Sensitive tools are refused while the conversation has no recorded consent.
pub async fn execute_tool(
    tools: &ToolRegistry,
    profile: &SpecialistProfile,
    state: &ConversationState,
    request: &ToolRequest,
) -> Result<String, ToolError> {
    if !profile.permits(&request.tool_name) {
        return Err(ToolError::NotPermitted {
            tool: request.tool_name.clone(),
            specialist: profile.id.as_str().to_string(),
        });
    }
    if tools.is_sensitive(&request.tool_name) && !state.consent_granted() {
        return Err(ToolError::ConsentRequired(request.tool_name.clone()));
    }
    tools.invoke(request).await
}

pub struct AgentRuntimeBuilder {
    orchestration: OrchestrationConfig,
    router: Option<Arc<dyn Router>>,
    policy: Option<Arc<dyn SpecialistPolicy>>,
    tools: Option<Arc<ToolRegistry>>,
    consent: Option<Arc<ConsentGate>>,
    audit: Option<Arc<dyn AuditSink>>,
    specialists: Vec<SpecialistId>,
}

impl AgentRuntimeBuilder {
    pub fn new(orchestration: OrchestrationConfig) -> Self {
        Self {
            orchestration,
            router: None,
            policy: None,
            tools: None,
            consent: None,
            audit: None,
            specialists: SpecialistId::ALL.to_vec(),
        }
    }

    pub fn router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn policy(mut self, policy: Arc<dyn SpecialistPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn consent(mut self, consent: Arc<ConsentGate>) -> Self {
        self.consent = Some(consent);
        self
    }

    pub fn audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn specialists(mut self, specialists: impl IntoIterator<Item = SpecialistId>) -> Self {
        self.specialists = specialists.into_iter().collect();
        self
    }

    pub fn build(self) -> Result<AgentRuntime, ApplicationError> {
        if !self.specialists.contains(&SpecialistId::GENERAL) {
            return Err(ApplicationError::Configuration(format!(
                "the {} specialist must be registered; it receives every ambiguous request",
                SpecialistId::GENERAL
            )));
        }

        let max_steps = self.orchestration.max_steps_per_specialist;
        let policy = self.policy.unwrap_or_else(|| Arc::new(RuleBasedPolicy));
        let tools = self.tools.unwrap_or_else(|| {
            Arc::new(default_registry(
                Duration::from_secs(self.orchestration.tool_timeout_secs),
                PreferenceStore::default(),
            ))
        });
        let consent = self.consent.unwrap_or_default();

        let units = self
            .specialists
            .iter()
            .map(|id| {
                let unit = SpecialistUnit::new(
                    SpecialistProfile::for_specialist(*id),
                    policy.clone(),
                    consent.clone(),
                    tools.clone(),
                    max_steps,
                );
                (*id, unit)
            })
            .collect();

        Ok(AgentRuntime {
            router: self.router.unwrap_or_else(|| Arc::new(KeywordRouter)),
            coordinator: HandoffCoordinator::new(
                &self.orchestration,
                self.specialists.iter().copied(),
            ),
            units,
            policy,
            tools,
            consent,
            audit: self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink)),
            engine: TurnEngine,
            max_steps,
        })
    }
}

/// Drives one user turn through routing, specialist steps, tool calls and
/// handoffs until a final answer is produced.
pub struct AgentRuntime {
    router: Arc<dyn Router>,
    coordinator: HandoffCoordinator,
    units: BTreeMap<SpecialistId, SpecialistUnit>,
    policy: Arc<dyn SpecialistPolicy>,
    tools: Arc<ToolRegistry>,
    consent: Arc<ConsentGate>,
    audit: Arc<dyn AuditSink>,
    engine: TurnEngine,
    max_steps: u32,
}

impl AgentRuntime {
    pub fn builder(orchestration: OrchestrationConfig) -> AgentRuntimeBuilder {
        AgentRuntimeBuilder::new(orchestration)
    }

    pub fn policy(&self) -> Arc<dyn SpecialistPolicy> {
        self.policy.clone()
    }

    pub fn tools(&self) -> Arc<ToolRegistry> {
        self.tools.clone()
    }

    pub fn consent(&self) -> Arc<ConsentGate> {
        self.consent.clone()
    }

    pub fn audit_sink(&self) -> Arc<dyn AuditSink> {
        self.audit.clone()
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    pub fn specialists(&self) -> Vec<SpecialistId> {
        self.units.keys().copied().collect()
    }

    /// Runs a full turn against a working copy of `state`. The copy replaces
    /// `state` only once the turn has terminated, so a dropped future leaves
    /// the conversation exactly as it was.
    pub async fn run_turn(
        &self,
        state: &mut ConversationState,
        user_message: &str,
        correlation_id: &str,
    ) -> Result<TurnOutcome, ApplicationError> {
        let text = user_message.trim();
        if text.is_empty() {
            return Err(ApplicationError::InvalidInput("message must not be empty".to_string()));
        }

        let mut working = state.clone();
        working.append_message(Message::user(text));
        let audit = AuditContext::new(
            Some(working.conversation_id.clone()),
            working.user_id.clone(),
            correlation_id,
            "agent_runtime",
        );

        let mut routed = None;
        let owner = match working.current_specialist() {
            Some(owner) if self.units.contains_key(&owner) => owner,
            Some(owner) => {
                return Err(ApplicationError::Configuration(format!(
                    "conversation is owned by `{owner}` which is not registered"
                )))
            }
            None => {
                let decision = select_initial(self.router.as_ref(), &working).await;
                let specialist = if self.units.contains_key(&decision.specialist) {
                    decision.specialist
                } else {
                    SpecialistId::GENERAL
                };
                working.assign_initial_specialist(specialist)?;
                self.audit.emit(
                    audit
                        .event(
                            "routing.specialist_selected",
                            AuditCategory::Routing,
                            AuditOutcome::Success,
                        )
                        .with_metadata("specialist", specialist.as_str())
                        .with_metadata("confidence", decision.confidence.to_string())
                        .with_metadata("reasoning", decision.reasoning.clone()),
                );
                tracing::info!(
                    event_name = "agent.routing.selected",
                    correlation_id = %correlation_id,
                    conversation_id = %working.conversation_id.0,
                    specialist = specialist.as_str(),
                    confidence = decision.confidence,
                    "initial specialist selected"
                );
                routed = Some(decision);
                specialist
            }
        };

        let mut turn =
            self.advance(&self.engine.initial_state(), TurnEvent::Routed(owner), &audit)?;
        let mut accepted_handoffs = Vec::new();
        let mut tool_calls = Vec::new();
        let mut answer: Option<(SpecialistId, FinalAnswer)> = None;

        while !turn.is_terminal() {
            let TurnState::Specialist(current) = turn else {
                return Err(DomainError::InvariantViolation(format!(
                    "turn stalled in {turn:?}"
                ))
                .into());
            };
            let unit = self.units.get(&current).ok_or_else(|| {
                DomainError::InvariantViolation(format!(
                    "`{current}` owns the turn but is not registered"
                ))
            })?;

            match unit.step(&mut working).await {
                StepOutput::ToolRequest(request) => {
                    turn = self.advance(&turn, TurnEvent::ToolRequested, &audit)?;
                    let result =
                        execute_tool(&self.tools, unit.profile(), &working, &request).await;
                    let succeeded = result.is_ok();
                    self.audit.emit(
                        audit
                            .event(
                                "tool.invoked",
                                AuditCategory::Tool,
                                if succeeded {
                                    AuditOutcome::Success
                                } else {
                                    AuditOutcome::Failed
                                },
                            )
                            .with_metadata("specialist", current.as_str())
                            .with_metadata("tool", request.tool_name.clone()),
                    );
                    let message = match result {
                        Ok(output) => {
                            Message::tool_result(current, &request.tool_name, output, false)
                        }
                        Err(error) => {
                            tracing::warn!(
                                event_name = "agent.tool.failed",
                                correlation_id = %correlation_id,
                                conversation_id = %working.conversation_id.0,
                                specialist = current.as_str(),
                                tool = %request.tool_name,
                                error = %error,
                                "tool call failed; reporting back to specialist"
                            );
                            let detail = error.to_string();
                            Message::tool_result(current, &request.tool_name, detail, true)
                        }
                    };
                    working.append_message(message);
                    tool_calls.push(ToolCall {
                        specialist: current,
                        tool_name: request.tool_name,
                        succeeded,
                    });
                    turn = self.advance(&turn, TurnEvent::ToolResolved, &audit)?;
                }
                StepOutput::FinalAnswer(final_answer) => {
                    let event = match final_answer.kind {
                        AnswerKind::StepLimitSummary => TurnEvent::BudgetExhausted,
                        _ => TurnEvent::FinalAnswer,
                    };
                    if final_answer.kind == AnswerKind::PermissionRequest {
                        self.audit.emit(
                            audit
                                .event(
                                    "consent.requested",
                                    AuditCategory::Consent,
                                    AuditOutcome::Success,
                                )
                                .with_metadata("specialist", current.as_str()),
                        );
                    }
                    turn = self.advance(&turn, event, &audit)?;
                    answer = Some((current, final_answer));
                }
                StepOutput::HandoffRequest(request) => {
                    match self.coordinator.apply(&mut working, &request) {
                        HandoffDecision::Accepted(record) => {
                            self.audit.emit(
                                audit
                                    .event(
                                        "handoff.accepted",
                                        AuditCategory::Handoff,
                                        AuditOutcome::Success,
                                    )
                                    .with_metadata("from", record.from_specialist.as_str())
                                    .with_metadata("to", record.to_specialist.as_str())
                                    .with_metadata("reason", record.reason.clone()),
                            );
                            turn = self.advance(
                                &turn,
                                TurnEvent::HandoffAccepted(record.to_specialist),
                                &audit,
                            )?;
                            accepted_handoffs.push(record);
                        }
                        HandoffDecision::Rejected(rejection) => {
                            self.audit.emit(
                                audit
                                    .event(
                                        "handoff.rejected",
                                        AuditCategory::Handoff,
                                        AuditOutcome::Rejected,
                                    )
                                    .with_metadata("from", current.as_str())
                                    .with_metadata("to", request.target.as_str())
                                    .with_metadata("rejection", rejection.to_string()),
                            );
                            let final_answer = rejection_answer(current, &rejection, &working);
                            turn = self.advance(&turn, TurnEvent::HandoffRejected, &audit)?;
                            answer = Some((current, final_answer));
                        }
                    }
                }
            }
        }

        let TurnState::Terminated(termination) = turn else {
            return Err(
                DomainError::InvariantViolation("turn loop exited early".to_string()).into()
            );
        };
        let (final_specialist, final_answer) = answer.ok_or_else(|| {
            DomainError::InvariantViolation("turn terminated without an answer".to_string())
        })?;
        working.append_message(Message::assistant(final_specialist, final_answer.content.clone()));
        *state = working;

        tracing::info!(
            event_name = "agent.turn.completed",
            correlation_id = %correlation_id,
            conversation_id = %state.conversation_id.0,
            specialist = final_specialist.as_str(),
            termination = termination.as_str(),
            handoffs = accepted_handoffs.len(),
            tool_calls = tool_calls.len(),
            "turn completed"
        );

        Ok(TurnOutcome {
            answer: final_answer.content,
            answer_kind: final_answer.kind,
            final_specialist,
            termination,
            routed,
            accepted_handoffs,
            tool_calls,
        })
    }

    fn advance(
        &self,
        current: &TurnState,
        event: TurnEvent,
        audit: &AuditContext,
    ) -> Result<TurnState, ApplicationError> {
        let outcome = self
            .engine
            .apply_with_audit(current, &event, self.audit.as_ref(), audit)
            .map_err(DomainError::from)?;
        Ok(outcome.to)
    }
}

fn rejection_answer(
    specialist: SpecialistId,
    rejection: &HandoffRejection,
    state: &ConversationState,
) -> FinalAnswer {
    match rejection {
        HandoffRejection::CircularHandoffDetected { .. } => FinalAnswer::new(
            AnswerKind::ImpasseSummary,
            impasse_summary(specialist, state.context(specialist)),
        ),
        other => FinalAnswer::new(
            AnswerKind::ImpasseSummary,
            handoff_refused_summary(specialist, &other.to_string(), state.context(specialist)),
        ),
    }
}
