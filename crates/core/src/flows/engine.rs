use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::flows::states::{TerminationCause, TransitionOutcome, TurnEvent, TurnState};

/// Pure transition table for the per-turn state machine.
#[derive(Clone, Copy, Debug, Default)]
pub struct TurnEngine;

impl TurnEngine {
    pub fn initial_state(&self) -> TurnState {
        TurnState::Routing
    }

    pub fn apply(
        &self,
        current: &TurnState,
        event: &TurnEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &TurnState,
        event: &TurnEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    audit
                        .event("turn.transition_applied", AuditCategory::Specialist, AuditOutcome::Success)
                        .with_metadata("from", format!("{:?}", outcome.from))
                        .with_metadata("to", format!("{:?}", outcome.to))
                        .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    audit
                        .event("turn.transition_rejected", AuditCategory::Specialist, AuditOutcome::Rejected)
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: TurnState, event: TurnEvent },
}

fn transition(
    current: &TurnState,
    event: &TurnEvent,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use TurnEvent::{
        BudgetExhausted, FinalAnswer, HandoffAccepted, HandoffRejected, Routed, ToolRequested,
        ToolResolved,
    };
    use TurnState::{AwaitingTool, Routing, Specialist, Terminated};

    let to = match (current, event) {
        (Routing, Routed(target)) => Specialist(*target),
        (Specialist(owner), ToolRequested) => AwaitingTool(*owner),
        (AwaitingTool(owner), ToolResolved) => Specialist(*owner),
        (Specialist(owner), HandoffAccepted(target)) if owner != target => Specialist(*target),
        (Specialist(_), FinalAnswer) => Terminated(TerminationCause::FinalAnswer),
        (Specialist(_), BudgetExhausted) => Terminated(TerminationCause::StepBudgetExhausted),
        (Specialist(_), HandoffRejected) => Terminated(TerminationCause::HandoffRejected),
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: current.clone(),
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: current.clone(), to, event: event.clone() })
}
