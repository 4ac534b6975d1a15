//! Pluggable decision logic behind a specialist unit.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use switchboard_core::domain::conversation::{ConversationState, Message, Role};
use switchboard_core::domain::handoff::HandoffRequest;
use switchboard_core::domain::specialist::SpecialistId;
use thiserror::Error;

use crate::context::context_view;
use crate::llm::{extract_json_object, LlmClient};
use crate::profiles::SpecialistProfile;
use crate::text::matching_phrases;
use crate::tools::{
    ToolRequest, CHECK_LIVE_INSTANCE, CONSULT_PUBLIC_DOCS, GET_ERROR_LOGS,
};

/// What a specialist wants to do next.
#[derive(Clone, Debug, PartialEq)]
pub enum StepDecision {
    UseTool(ToolRequest),
    Answer(String),
    HandOff(HandoffRequest),
}

/// Read-only view a policy decides from.
pub struct PolicyInput<'a> {
    pub profile: &'a SpecialistProfile,
    pub state: &'a ConversationState,
}

impl<'a> PolicyInput<'a> {
    pub fn latest_request(&self) -> &'a str {
        self.state.last_user_message().map(|message| message.content.as_str()).unwrap_or("")
    }

    /// Tool results this specialist received since the user last spoke.
    pub fn own_tool_results(&self) -> Vec<&'a Message> {
        self.state
            .messages_since_last_user()
            .iter()
            .filter(|message| {
                message.role == Role::Tool && message.specialist == Some(self.profile.id)
            })
            .collect()
    }

    pub fn has_tool_result(&self, tool_name: &str) -> bool {
        self.own_tool_results()
            .iter()
            .any(|message| message.tool_name.as_deref() == Some(tool_name))
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("decision backend failed: {0}")]
    Backend(String),
}

#[async_trait]
pub trait SpecialistPolicy: Send + Sync {
    async fn decide(&self, input: &PolicyInput<'_>) -> Result<StepDecision, PolicyError>;
}

const ARCHITECT_INDICATORS: [&str; 6] = [
    "custom code",
    "script",
    "business rule",
    "custom solution",
    "need to develop",
    "create a custom",
];

const IMPLEMENTATION_INDICATORS: [&str; 8] = [
    "check the instance",
    "check your instance",
    "live instance",
    "check the logs",
    "error logs",
    "recent changes",
    "not working",
    "errors",
];

const CONSULTANT_INDICATORS: [&str; 5] = [
    "best practice",
    "out-of-box",
    "standard configuration",
    "recommended approach",
    "general guidance",
];

fn tool_outcome(message: Option<&&Message>) -> String {
    match message {
        Some(message) if !message.is_error => message.content.clone(),
        Some(message) => format!("the lookup did not return results ({})", message.content),
        None => "no lookup was performed".to_string(),
    }
}

fn summarize_request(request: &str) -> String {
    let trimmed = request.trim();
    let mut summary = trimmed.chars().take(200).collect::<String>();
    if summary.len() < trimmed.len() {
        summary.push_str("...");
    }
    summary
}

/// Deterministic decisions keyed on indicator phrases in the user's latest
/// request. Each specialist researches with one tool call before answering or
/// handing off.
#[derive(Clone, Debug, Default)]
pub struct RuleBasedPolicy;

impl RuleBasedPolicy {
    fn consultant(&self, input: &PolicyInput<'_>) -> StepDecision {
        let request = input.latest_request();
        let results = input.own_tool_results();
        if results.is_empty() {
            return StepDecision::UseTool(ToolRequest::new(
                CONSULT_PUBLIC_DOCS,
                json!({ "query": request }),
            ));
        }

        if input.profile.can_hand_off {
            let architect = matching_phrases(request, &ARCHITECT_INDICATORS);
            if !architect.is_empty() {
                return StepDecision::HandOff(HandoffRequest::new(
                    SpecialistId::SolutionArchitect,
                    format!("Custom development needed ({})", architect.join(", ")),
                    format!(
                        "User request: {}. Out-of-box options were reviewed first: {}",
                        summarize_request(request),
                        tool_outcome(results.last())
                    ),
                ));
            }
            let implementation = matching_phrases(request, &IMPLEMENTATION_INDICATORS);
            if !implementation.is_empty() {
                return StepDecision::HandOff(HandoffRequest::new(
                    SpecialistId::Implementation,
                    format!("Live diagnostics needed ({})", implementation.join(", ")),
                    format!("User request: {}", summarize_request(request)),
                ));
            }
        }

        StepDecision::Answer(format!(
            "Based on the documentation, {}.\n\
             I recommend starting with the out-of-box configuration before considering any \
             customization.\n\
             Consider documenting the current process and the stakeholders involved so the \
             configuration can be validated against it.",
            tool_outcome(results.last())
        ))
    }

    fn solution_architect(&self, input: &PolicyInput<'_>) -> StepDecision {
        let request = input.latest_request();
        let results = input.own_tool_results();
        if results.is_empty() {
            return StepDecision::UseTool(ToolRequest::new(
                CONSULT_PUBLIC_DOCS,
                json!({ "query": request, "focus": "scripting and schema conventions" }),
            ));
        }

        let architect = matching_phrases(request, &ARCHITECT_INDICATORS);
        if input.profile.can_hand_off && architect.is_empty() {
            let implementation = matching_phrases(request, &IMPLEMENTATION_INDICATORS);
            if !implementation.is_empty() {
                return StepDecision::HandOff(HandoffRequest::new(
                    SpecialistId::Implementation,
                    format!("Live diagnostics needed ({})", implementation.join(", ")),
                    format!("User request: {}", summarize_request(request)),
                ));
            }
            let consultant = matching_phrases(request, &CONSULTANT_INDICATORS);
            if !consultant.is_empty() {
                return StepDecision::HandOff(HandoffRequest::new(
                    SpecialistId::Consultant,
                    format!("General guidance requested ({})", consultant.join(", ")),
                    format!("User request: {}", summarize_request(request)),
                ));
            }
        }

        StepDecision::Answer(format!(
            "According to the platform conventions, {}.\n\
             I recommend implementing this as a scoped, server-side script with the logic kept \
             in a reusable script include.\n\
             You should add automated tests and document the upgrade impact before deploying.",
            tool_outcome(results.last())
        ))
    }

    fn implementation(&self, input: &PolicyInput<'_>) -> StepDecision {
        let request = input.latest_request();
        if !input.has_tool_result(CHECK_LIVE_INSTANCE) {
            return StepDecision::UseTool(ToolRequest::new(
                CHECK_LIVE_INSTANCE,
                json!({ "query": request }),
            ));
        }
        if !input.has_tool_result(GET_ERROR_LOGS) {
            return StepDecision::UseTool(ToolRequest::new(
                GET_ERROR_LOGS,
                json!({ "query": request, "limit": 20 }),
            ));
        }

        let results = input.own_tool_results();
        let architect = matching_phrases(request, &ARCHITECT_INDICATORS);
        if input.profile.can_hand_off && !architect.is_empty() {
            return StepDecision::HandOff(HandoffRequest::new(
                SpecialistId::SolutionArchitect,
                format!("Fix requires custom development ({})", architect.join(", ")),
                format!(
                    "Diagnostics for: {}. Findings: {}",
                    summarize_request(request),
                    results
                        .iter()
                        .map(|message| tool_outcome(Some(message)))
                        .collect::<Vec<_>>()
                        .join("; ")
                ),
            ));
        }

        let findings = results
            .iter()
            .map(|message| format!("- {}", tool_outcome(Some(message))))
            .collect::<Vec<_>>()
            .join("\n");
        StepDecision::Answer(format!(
            "I checked the instance for: {}.\n{findings}\n\
             I recommend reviewing the most recent configuration changes against the failing \
             behavior before changing anything else.",
            summarize_request(request)
        ))
    }
}

#[async_trait]
impl SpecialistPolicy for RuleBasedPolicy {
    async fn decide(&self, input: &PolicyInput<'_>) -> Result<StepDecision, PolicyError> {
        Ok(match input.profile.id {
            SpecialistId::Consultant => self.consultant(input),
            SpecialistId::SolutionArchitect => self.solution_architect(input),
            SpecialistId::Implementation => self.implementation(input),
        })
    }
}

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum LlmDecision {
    Tool {
        tool: String,
        #[serde(default)]
        arguments: Value,
    },
    Answer {
        content: String,
    },
    Handoff {
        target: String,
        #[serde(default)]
        reason: String,
        #[serde(default)]
        context_summary: String,
    },
}

/// Asks an LLM for the next step as a JSON object. A completion that is not a
/// recognizable decision is taken as the answer text.
pub struct LlmPolicy {
    client: Arc<dyn LlmClient>,
}

impl LlmPolicy {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    fn prompt(input: &PolicyInput<'_>) -> String {
        let mut prompt = String::from(input.profile.system_prompt);
        prompt.push_str("\n\nAvailable tools: ");
        prompt.push_str(&input.profile.tools.join(", "));
        if input.state.consent_granted() {
            prompt.push_str("\n[PERMISSION GRANTED] You have permission to access the live instance.");
        }
        prompt.push_str(
            "\n\nReply with exactly one JSON object:\n\
             {\"action\": \"tool\", \"tool\": \"<name>\", \"arguments\": {...}}\n\
             {\"action\": \"answer\", \"content\": \"...\"}\n\
             {\"action\": \"handoff\", \"target\": \"consultant|solution_architect|implementation\", \
             \"reason\": \"...\", \"context_summary\": \"findings, constraints, open questions\"}\n\n\
             Conversation:\n",
        );
        for message in context_view(input.state.messages(), true) {
            let speaker = match (message.role, message.tool_name.as_deref()) {
                (Role::Tool, Some(tool)) => format!("tool:{tool}"),
                (role, _) => role.as_str().to_string(),
            };
            prompt.push_str(&format!("[{speaker}] {}\n", message.content));
        }
        prompt
    }

    fn parse(completion: &str) -> StepDecision {
        let decision = extract_json_object(completion)
            .and_then(|object| serde_json::from_str::<LlmDecision>(object).ok());
        match decision {
            Some(LlmDecision::Tool { tool, arguments }) => {
                StepDecision::UseTool(ToolRequest::new(tool, arguments))
            }
            Some(LlmDecision::Answer { content }) => StepDecision::Answer(content),
            Some(LlmDecision::Handoff { target, reason, context_summary }) => {
                match SpecialistId::parse(&target) {
                    Some(target) => {
                        StepDecision::HandOff(HandoffRequest::new(target, reason, context_summary))
                    }
                    None => StepDecision::Answer(if context_summary.is_empty() {
                        reason
                    } else {
                        context_summary
                    }),
                }
            }
            None => StepDecision::Answer(completion.trim().to_string()),
        }
    }
}

#[async_trait]
impl SpecialistPolicy for LlmPolicy {
    async fn decide(&self, input: &PolicyInput<'_>) -> Result<StepDecision, PolicyError> {
        let completion = self
            .client
            .complete(&Self::prompt(input))
            .await
            .map_err(|error| PolicyError::Backend(error.to_string()))?;
        Ok(Self::parse(&completion))
    }
}
