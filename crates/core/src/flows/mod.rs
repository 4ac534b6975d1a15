pub mod engine;
pub mod states;

pub use engine::{FlowTransitionError, TurnEngine};
pub use states::{TerminationCause, TransitionOutcome, TurnEvent, TurnState};
