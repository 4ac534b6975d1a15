use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use switchboard_core::domain::conversation::ConversationState;
use switchboard_core::domain::specialist::SpecialistId;
use thiserror::Error;

use crate::llm::{extract_json_object, LlmClient};
use crate::text::matching_phrases;

/// Classifier confidence below this routes to the general specialist.
pub const MIN_CONFIDENCE: u8 = 50;

const ARCHITECT_SIGNALS: [&str; 12] = [
    "write a script",
    "write a business rule",
    "write me",
    "create a business rule",
    "create a custom",
    "custom table",
    "build an integration",
    "integrate with",
    "script include",
    "review my code",
    "schema design",
    "custom code",
];

const IMPLEMENTATION_SIGNALS: [&str; 14] = [
    "error",
    "errors",
    "not working",
    "isn't working",
    "aren't",
    "isn't",
    "broken",
    "failing",
    "stopped",
    "logs",
    "debug",
    "slow",
    "my instance",
    "what changed",
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub specialist: SpecialistId,
    /// 0..=100
    pub confidence: u8,
    pub reasoning: String,
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("classifier backend failed: {0}")]
    Backend(String),
    #[error("classifier returned an unusable answer: {0}")]
    UnparseableDecision(String),
}

#[async_trait]
pub trait Router: Send + Sync {
    async fn classify(&self, state: &ConversationState) -> Result<RouteDecision, RouterError>;
}

/// Routes an ownerless conversation. Never fails: a missing user message, a
/// classifier error, or low confidence all select the general specialist.
pub async fn select_initial(router: &dyn Router, state: &ConversationState) -> RouteDecision {
    if state.last_user_message().is_none() {
        return RouteDecision {
            specialist: SpecialistId::GENERAL,
            confidence: 0,
            reasoning: "no user message to classify".to_string(),
        };
    }

    match router.classify(state).await {
        Ok(decision) if decision.confidence >= MIN_CONFIDENCE => decision,
        Ok(decision) => RouteDecision {
            specialist: SpecialistId::GENERAL,
            confidence: decision.confidence,
            reasoning: format!(
                "low confidence ({}) for {}; defaulting to {}",
                decision.confidence,
                decision.specialist,
                SpecialistId::GENERAL
            ),
        },
        Err(error) => {
            tracing::warn!(
                event_name = "agent.routing.classifier_failed",
                conversation_id = %state.conversation_id.0,
                error = %error,
                "routing classifier failed; defaulting to general specialist"
            );
            RouteDecision {
                specialist: SpecialistId::GENERAL,
                confidence: 0,
                reasoning: format!("classifier failed: {error}"),
            }
        }
    }
}

/// Phrase-signal classifier: explicit build requests go to the architect,
/// reports of something broken go to implementation, everything else (and
/// any conflict between the two) goes to the consultant.
#[derive(Clone, Debug, Default)]
pub struct KeywordRouter;

#[async_trait]
impl Router for KeywordRouter {
    async fn classify(&self, state: &ConversationState) -> Result<RouteDecision, RouterError> {
        let text = state.last_user_message().map(|message| message.content.as_str()).unwrap_or("");
        let architect = matching_phrases(text, &ARCHITECT_SIGNALS);
        let implementation = matching_phrases(text, &IMPLEMENTATION_SIGNALS);

        let decision = match (architect.is_empty(), implementation.is_empty()) {
            (false, true) => RouteDecision {
                specialist: SpecialistId::SolutionArchitect,
                confidence: 80,
                reasoning: format!("explicit build request ({})", architect.join(", ")),
            },
            (true, false) => RouteDecision {
                specialist: SpecialistId::Implementation,
                confidence: 80,
                reasoning: format!("reported instance problem ({})", implementation.join(", ")),
            },
            (false, false) => RouteDecision {
                specialist: SpecialistId::SolutionArchitect,
                confidence: 30,
                reasoning: "conflicting build and troubleshooting signals".to_string(),
            },
            (true, true) => RouteDecision {
                specialist: SpecialistId::Consultant,
                confidence: 70,
                reasoning: "business or process question".to_string(),
            },
        };
        Ok(decision)
    }
}

const ROUTER_PROMPT: &str = "You route questions to one of three specialists.\n\
- consultant: business problems, process questions, best practices, out-of-box configuration. \
Default when unsure.\n\
- solution_architect: only explicit requests for custom code, custom schema, or integrations.\n\
- implementation: only reports of errors or broken behavior on the user's live instance.\n\
Reply with JSON: {\"agent\": \"consultant|solution_architect|implementation\", \
\"confidence\": 0-100, \"reasoning\": \"...\"}";

#[derive(Deserialize)]
struct LlmRouteReply {
    agent: String,
    #[serde(default)]
    confidence: Option<u8>,
    #[serde(default)]
    reasoning: String,
}

pub struct LlmRouter {
    client: Arc<dyn LlmClient>,
}

impl LlmRouter {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    fn parse(completion: &str) -> Result<RouteDecision, RouterError> {
        if let Some(object) = extract_json_object(completion) {
            let reply = serde_json::from_str::<LlmRouteReply>(object)
                .map_err(|error| RouterError::UnparseableDecision(error.to_string()))?;
            let specialist = SpecialistId::parse(&reply.agent)
                .ok_or_else(|| RouterError::UnparseableDecision(reply.agent.clone()))?;
            return Ok(RouteDecision {
                specialist,
                confidence: reply.confidence.unwrap_or(75).min(100),
                reasoning: reply.reasoning,
            });
        }

        SpecialistId::parse(completion)
            .map(|specialist| RouteDecision {
                specialist,
                confidence: 60,
                reasoning: "bare specialist name".to_string(),
            })
            .ok_or_else(|| RouterError::UnparseableDecision(completion.trim().to_string()))
    }
}

#[async_trait]
impl Router for LlmRouter {
    async fn classify(&self, state: &ConversationState) -> Result<RouteDecision, RouterError> {
        let query = state.last_user_message().map(|message| message.content.as_str()).unwrap_or("");
        let prompt = format!(
            "{ROUTER_PROMPT}\n\nRoute this query to the appropriate agent:\n\n{query}"
        );
        let completion = self
            .client
            .complete(&prompt)
            .await
            .map_err(|error| RouterError::Backend(error.to_string()))?;
        Self::parse(&completion)
    }
}
