use std::collections::BTreeSet;

use chrono::Utc;
use switchboard_core::config::OrchestrationConfig;
use switchboard_core::domain::conversation::{ConversationState, Message};
use switchboard_core::domain::handoff::{HandoffRecord, HandoffRequest};
use switchboard_core::domain::specialist::SpecialistId;
use thiserror::Error;

use crate::context::{handoff_message, handoff_summary};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HandoffRejection {
    #[error("no specialist currently owns the conversation")]
    NoActiveSpecialist,
    #[error("`{0}` cannot hand off to itself")]
    SelfHandoff(SpecialistId),
    #[error("`{0}` is not available in this deployment")]
    UnknownTarget(SpecialistId),
    #[error(
        "circular handoff between `{from}` and `{to}` ({occurrences} times in the last {lookback} handoffs)"
    )]
    CircularHandoffDetected {
        from: SpecialistId,
        to: SpecialistId,
        occurrences: usize,
        lookback: usize,
    },
    #[error("`{0}` has already used its whole step budget")]
    TargetBudgetExhausted(SpecialistId),
    #[error("handoff could not be recorded: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandoffDecision {
    Accepted(HandoffRecord),
    Rejected(HandoffRejection),
}

/// Number of handoffs between `a` and `b` (either direction) among the last
/// `lookback` records.
pub fn pair_occurrences(
    history: &[HandoffRecord],
    a: SpecialistId,
    b: SpecialistId,
    lookback: usize,
) -> usize {
    let start = history.len().saturating_sub(lookback);
    history[start..].iter().filter(|record| record.connects(a, b)).count()
}

/// The only component allowed to move ownership between specialists.
#[derive(Clone, Debug)]
pub struct HandoffCoordinator {
    lookback: usize,
    threshold: usize,
    max_steps: u32,
    registered: BTreeSet<SpecialistId>,
}

impl HandoffCoordinator {
    pub fn new(
        config: &OrchestrationConfig,
        registered: impl IntoIterator<Item = SpecialistId>,
    ) -> Self {
        Self {
            lookback: config.circular_lookback,
            threshold: config.circular_threshold,
            max_steps: config.max_steps_per_specialist,
            registered: registered.into_iter().collect(),
        }
    }

    pub fn validate(
        &self,
        state: &ConversationState,
        request: &HandoffRequest,
    ) -> Result<SpecialistId, HandoffRejection> {
        let from = state.current_specialist().ok_or(HandoffRejection::NoActiveSpecialist)?;
        let to = request.target;

        if from == to {
            return Err(HandoffRejection::SelfHandoff(from));
        }
        if !self.registered.contains(&to) {
            return Err(HandoffRejection::UnknownTarget(to));
        }

        let occurrences = pair_occurrences(state.handoff_history(), from, to, self.lookback);
        if occurrences >= self.threshold {
            return Err(HandoffRejection::CircularHandoffDetected {
                from,
                to,
                occurrences,
                lookback: self.lookback,
            });
        }

        if state.step_count(to) >= self.max_steps {
            return Err(HandoffRejection::TargetBudgetExhausted(to));
        }

        Ok(from)
    }

    /// Validates and, on acceptance, records the handoff, transfers ownership
    /// and leaves a handoff context note in the conversation. A rejected
    /// request leaves the state untouched.
    pub fn apply(
        &self,
        state: &mut ConversationState,
        request: &HandoffRequest,
    ) -> HandoffDecision {
        let from = match self.validate(state, request) {
            Ok(from) => from,
            Err(rejection) => {
                tracing::warn!(
                    event_name = "agent.handoff.rejected",
                    conversation_id = %state.conversation_id.0,
                    target = request.target.as_str(),
                    reason = %rejection,
                    "handoff rejected"
                );
                return HandoffDecision::Rejected(rejection);
            }
        };

        let now = Utc::now();
        let timestamp = state
            .handoff_history()
            .last()
            .map(|last| last.timestamp.max(now))
            .unwrap_or(now);
        let record = HandoffRecord {
            from_specialist: from,
            to_specialist: request.target,
            reason: request.reason.clone(),
            context_summary: request.context_summary.clone(),
            timestamp,
        };
        self.record(state, record)
    }

    fn record(&self, state: &mut ConversationState, record: HandoffRecord) -> HandoffDecision {
        let from = record.from_specialist;
        let summary = handoff_summary(from, &record.reason, state.context(from));

        if let Err(error) = state.apply_handoff(record.clone()) {
            tracing::error!(
                event_name = "agent.handoff.invariant_violation",
                conversation_id = %state.conversation_id.0,
                error = %error,
                "validated handoff could not be applied"
            );
            return HandoffDecision::Rejected(HandoffRejection::InvariantViolation(
                error.to_string(),
            ));
        }
        state.append_message(Message::system(handoff_message(&summary, &record.context_summary)));

        tracing::info!(
            event_name = "agent.handoff.accepted",
            conversation_id = %state.conversation_id.0,
            from = from.as_str(),
            to = record.to_specialist.as_str(),
            reason = %record.reason,
            "handoff accepted"
        );
        HandoffDecision::Accepted(record)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use switchboard_core::config::OrchestrationConfig;
    use switchboard_core::domain::conversation::{ConversationId, ConversationState, Role};
    use switchboard_core::domain::handoff::{HandoffRecord, HandoffRequest};
    use switchboard_core::domain::specialist::SpecialistId::{
        self, Consultant, Implementation, SolutionArchitect,
    };

    use super::{HandoffCoordinator, HandoffDecision, HandoffRejection};
    use crate::context::HANDOFF_CONTEXT_HEADER;

    fn coordinator() -> HandoffCoordinator {
        HandoffCoordinator::new(&OrchestrationConfig::default(), SpecialistId::ALL)
    }

    fn owned_by(owner: SpecialistId) -> ConversationState {
        let mut state = ConversationState::new(ConversationId("conv".to_string()), None);
        state.assign_initial_specialist(owner).expect("ownerless");
        state
    }

    fn request(target: SpecialistId) -> HandoffRequest {
        HandoffRequest::new(target, "needs another specialist", "what we know so far")
    }

    #[test]
    fn accepted_handoff_transfers_ownership_and_leaves_note() {
        let coordinator = coordinator();
        let mut state = owned_by(Consultant);

        let decision = coordinator.apply(&mut state, &request(SolutionArchitect));

        assert!(matches!(decision, HandoffDecision::Accepted(ref record)
            if record.from_specialist == Consultant && record.to_specialist == SolutionArchitect));
        assert_eq!(state.current_specialist(), Some(SolutionArchitect));
        assert_eq!(state.previous_specialist(), Some(Consultant));
        let note = state.messages().last().expect("note appended");
        assert_eq!(note.role, Role::System);
        assert!(note.content.starts_with(HANDOFF_CONTEXT_HEADER));
        assert!(note.content.contains("Handoff from consultant agent."));
        assert_eq!(
            state.context(SolutionArchitect).map(|context| context.handoff_notes.clone()),
            Some(vec!["what we know so far".to_string()])
        );
    }

    #[test]
    fn self_handoff_is_rejected_without_mutation() {
        let coordinator = coordinator();
        let mut state = owned_by(Implementation);
        let before = state.clone();

        let decision = coordinator.apply(&mut state, &request(Implementation));

        assert_eq!(decision, HandoffDecision::Rejected(HandoffRejection::SelfHandoff(Implementation)));
        assert_eq!(state, before);
    }

    #[test]
    fn unregistered_target_is_rejected() {
        let coordinator = HandoffCoordinator::new(
            &OrchestrationConfig::default(),
            [Consultant, SolutionArchitect],
        );
        let mut state = owned_by(Consultant);
        assert_eq!(
            coordinator.apply(&mut state, &request(Implementation)),
            HandoffDecision::Rejected(HandoffRejection::UnknownTarget(Implementation))
        );
    }

    #[test]
    fn ping_pong_is_stopped_at_threshold() {
        let coordinator = coordinator();
        let mut state = owned_by(Consultant);

        for target in [SolutionArchitect, Consultant, SolutionArchitect] {
            assert!(matches!(coordinator.apply(&mut state, &request(target)), HandoffDecision::Accepted(_)));
        }

        let decision = coordinator.apply(&mut state, &request(Consultant));
        assert!(matches!(
            decision,
            HandoffDecision::Rejected(HandoffRejection::CircularHandoffDetected { occurrences: 3, .. })
        ));
        assert_eq!(state.handoff_history().len(), 3);
        assert_eq!(state.current_specialist(), Some(SolutionArchitect));
    }

    #[test]
    fn unrelated_pairs_do_not_trip_the_breaker() {
        let coordinator = coordinator();
        let mut state = owned_by(Consultant);
        for target in [SolutionArchitect, Consultant, SolutionArchitect, Implementation] {
            assert!(matches!(coordinator.apply(&mut state, &request(target)), HandoffDecision::Accepted(_)));
        }
        // The consultant <-> implementation pair has not been seen yet.
        assert!(matches!(
            coordinator.apply(&mut state, &request(Consultant)),
            HandoffDecision::Accepted(_)
        ));
    }

    #[test]
    fn target_with_exhausted_budget_is_rejected() {
        let coordinator = HandoffCoordinator::new(
            &OrchestrationConfig { max_steps_per_specialist: 2, ..OrchestrationConfig::default() },
            SpecialistId::ALL,
        );
        let mut state = owned_by(Consultant);
        state.record_step(Implementation, 2).expect("step 1");
        state.record_step(Implementation, 2).expect("step 2");

        assert_eq!(
            coordinator.apply(&mut state, &request(Implementation)),
            HandoffDecision::Rejected(HandoffRejection::TargetBudgetExhausted(Implementation))
        );
    }

    #[test]
    fn history_timestamps_are_monotonic() {
        let coordinator = coordinator();
        let mut state = owned_by(Consultant);
        for target in [SolutionArchitect, Implementation, Consultant] {
            let _ = coordinator.apply(&mut state, &request(target));
        }
        let history = state.handoff_history();
        assert!(history.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp));
    }

    #[test]
    fn record_that_breaks_ownership_is_reported_as_invariant_violation() {
        let coordinator = coordinator();
        let mut state = owned_by(Consultant);
        let before = state.clone();
        let stale = HandoffRecord {
            from_specialist: Implementation,
            to_specialist: SolutionArchitect,
            reason: "stale owner".to_string(),
            context_summary: String::new(),
            timestamp: Utc::now(),
        };

        let decision = coordinator.record(&mut state, stale);

        assert!(matches!(
            decision,
            HandoffDecision::Rejected(HandoffRejection::InvariantViolation(ref message))
                if message.contains("owned by")
        ));
        assert_eq!(state, before);
    }
}
