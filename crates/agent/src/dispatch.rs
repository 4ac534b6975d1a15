use std::sync::Arc;

use serde::{Deserialize, Serialize};
use switchboard_core::domain::conversation::ConversationState;
use switchboard_core::errors::ApplicationError;
use switchboard_core::feature_flags::FeatureFlagGate;

use crate::fallback::FallbackResponder;
use crate::runtime::{AgentRuntime, TurnOutcome};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponsePath {
    MultiSpecialist,
    Fallback,
}

impl ResponsePath {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MultiSpecialist => "multi_specialist",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub path: ResponsePath,
    pub turn: TurnOutcome,
}

/// Per-request entry point: consults the rollout gate and sends the turn down
/// the multi-specialist runtime or the single-responder fallback.
pub struct Dispatcher {
    gate: Arc<FeatureFlagGate>,
    runtime: Arc<AgentRuntime>,
    fallback: Arc<FallbackResponder>,
}

impl Dispatcher {
    pub fn new(
        gate: Arc<FeatureFlagGate>,
        runtime: Arc<AgentRuntime>,
        fallback: Arc<FallbackResponder>,
    ) -> Self {
        Self { gate, runtime, fallback }
    }

    /// Builds the fallback from the runtime's own policy, tools and consent
    /// rules.
    pub fn with_runtime(gate: Arc<FeatureFlagGate>, runtime: Arc<AgentRuntime>) -> Self {
        let fallback = FallbackResponder::new(
            runtime.policy(),
            runtime.tools(),
            runtime.consent(),
            runtime.max_steps(),
        );
        Self::new(gate, runtime, Arc::new(fallback))
    }

    pub fn gate(&self) -> &Arc<FeatureFlagGate> {
        &self.gate
    }

    pub fn select_path(&self, user_id: Option<&str>) -> ResponsePath {
        if self.gate.is_enabled(user_id) {
            ResponsePath::MultiSpecialist
        } else {
            ResponsePath::Fallback
        }
    }

    pub async fn handle(
        &self,
        user_id: Option<&str>,
        state: &mut ConversationState,
        message: &str,
        correlation_id: &str,
    ) -> Result<DispatchOutcome, ApplicationError> {
        let path = self.select_path(user_id);
        tracing::debug!(
            event_name = "agent.dispatch.path_selected",
            correlation_id = %correlation_id,
            conversation_id = %state.conversation_id.0,
            path = path.as_str(),
            "response path selected"
        );

        let turn = match path {
            ResponsePath::MultiSpecialist => {
                self.runtime.run_turn(state, message, correlation_id).await?
            }
            ResponsePath::Fallback => self.fallback.respond(state, message, correlation_id).await?,
        };
        Ok(DispatchOutcome { path, turn })
    }
}
