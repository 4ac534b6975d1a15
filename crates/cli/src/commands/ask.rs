use std::sync::Arc;

use switchboard_agent::consent::ConsentGate;
use switchboard_agent::{AgentRuntime, Dispatcher};
use switchboard_core::domain::conversation::{ConversationId, ConversationState};
use switchboard_core::feature_flags::FeatureFlagGate;
use switchboard_db::{
    HandoffRepository, RolloutRepository, SqlHandoffRepository, SqlRolloutRepository,
};

use crate::commands::{
    invalid_input, persistence_failure, run_with_store, CommandResult, EXIT_CONFIG, EXIT_TURN,
};

pub fn run(user: Option<&str>, conversation: Option<&str>, message: &str) -> CommandResult {
    let user = user.map(str::trim).filter(|user| !user.is_empty()).map(str::to_string);
    let conversation_id = conversation
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4()));
    let message = message.to_string();

    run_with_store("ask", |config, pool| async move {
        if message.trim().is_empty() {
            return Err(invalid_input("message must not be empty"));
        }

        let rollout = SqlRolloutRepository::new(pool.clone())
            .load(config.rollout.initial_percentage)
            .await
            .map_err(persistence_failure)?;
        let runtime = AgentRuntime::builder(config.orchestration.clone())
            .consent(Arc::new(ConsentGate::from_config(&config.consent)))
            .build()
            .map_err(|error| ("config_validation", error.to_string(), EXIT_CONFIG))?;
        let dispatcher =
            Dispatcher::with_runtime(Arc::new(FeatureFlagGate::new(rollout)), Arc::new(runtime));

        let mut state = ConversationState::new(ConversationId(conversation_id), user.clone());
        let correlation_id = format!("req-{}", uuid::Uuid::new_v4());
        let outcome = dispatcher
            .handle(user.as_deref(), &mut state, &message, &correlation_id)
            .await
            .map_err(|error| ("turn_failed", error.to_string(), EXIT_TURN))?;

        let handoffs = SqlHandoffRepository::new(pool);
        handoffs
            .append_all(&state.conversation_id, &outcome.turn.accepted_handoffs)
            .await
            .map_err(persistence_failure)?;

        Ok(format!(
            "[{}] {} ({}, {} handoffs, conversation {}):\n{}",
            outcome.path.as_str(),
            outcome.turn.final_specialist.display_name(),
            outcome.turn.termination.as_str(),
            outcome.turn.accepted_handoffs.len(),
            state.conversation_id.0,
            outcome.turn.answer
        ))
    })
}
