pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod feature_flags;
pub mod flows;

pub use domain::conversation::{AgentContext, ConversationId, ConversationState, Message, Role};
pub use domain::handoff::{HandoffRecord, HandoffRequest};
pub use domain::specialist::SpecialistId;
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use feature_flags::{FeatureFlagGate, RolloutConfig, RolloutError};
pub use flows::{TerminationCause, TurnEngine, TurnEvent, TurnState};
