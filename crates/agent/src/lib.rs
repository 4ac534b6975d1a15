//! Multi-specialist conversation runtime.
//!
//! A turn flows through a constrained loop:
//! 1. **Dispatch** (`dispatch`) - the rollout gate picks the multi-specialist
//!    path or the single-responder `fallback`.
//! 2. **Routing** (`router`) - ownerless conversations are classified to one
//!    specialist; ambiguity goes to the general specialist.
//! 3. **Specialist steps** (`specialist`, `policy`) - the owning specialist
//!    returns a tool request, a final answer, or a handoff request.
//! 4. **Tools** (`tools`) - invoked under a timeout; sensitive tools only
//!    after the `consent` gate has recorded the user's permission.
//! 5. **Handoffs** (`coordinator`) - the only place ownership changes, guarded
//!    by the circular-handoff and step-budget breakers.
//!
//! Decision logic behind `SpecialistPolicy` and `Router` is swappable
//! (rule-based or LLM-backed) without touching the coordinator or consent
//! rules.

pub mod consent;
pub mod context;
pub mod coordinator;
pub mod dispatch;
pub mod fallback;
pub mod llm;
pub mod policy;
pub mod profiles;
pub mod router;
pub mod runtime;
pub mod specialist;
pub mod text;
pub mod tools;

pub use dispatch::{DispatchOutcome, Dispatcher, ResponsePath};
pub use runtime::{AgentRuntime, AgentRuntimeBuilder, TurnOutcome};
