use serde::{Deserialize, Serialize};

use crate::domain::specialist::SpecialistId;

/// Lifecycle of a single turn. Starts in `Routing`, always ends in `Terminated`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnState {
    Routing,
    Specialist(SpecialistId),
    AwaitingTool(SpecialistId),
    Terminated(TerminationCause),
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnEvent {
    Routed(SpecialistId),
    ToolRequested,
    ToolResolved,
    HandoffAccepted(SpecialistId),
    HandoffRejected,
    FinalAnswer,
    BudgetExhausted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationCause {
    FinalAnswer,
    StepBudgetExhausted,
    HandoffRejected,
}

impl TerminationCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FinalAnswer => "final_answer",
            Self::StepBudgetExhausted => "step_budget_exhausted",
            Self::HandoffRejected => "handoff_rejected",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: TurnState,
    pub to: TurnState,
    pub event: TurnEvent,
}
