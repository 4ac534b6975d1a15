use switchboard_core::domain::specialist::SpecialistId;

use crate::tools::{
    CHECK_LIVE_INSTANCE, CHECK_TABLE_SCHEMA, CONSULT_PUBLIC_DOCS, CONSULT_USER_CONTEXT,
    FETCH_RECENT_CHANGES, GET_ERROR_LOGS, SAVE_LEARNED_PREFERENCE,
};

const CONSULTANT_PROMPT: &str = "You are a platform consultant. Understand the business problem \
before recommending anything, prefer out-of-box configuration, and explain the maintenance and \
upgrade cost of custom work. Hand off to the solution architect only once custom code is truly \
needed, and to implementation when the user reports a problem on their live instance.";

const SOLUTION_ARCHITECT_PROMPT: &str = "You are a solution architect. Design custom code, \
schema changes and integrations that follow platform conventions. Check existing table schemas \
before proposing changes. Hand off to implementation when live diagnostics are required.";

const IMPLEMENTATION_PROMPT: &str = "You are an implementation specialist. Diagnose problems on \
the user's live instance using logs, recent changes and configuration checks. Never touch the \
live instance without the user's explicit permission.";

/// What a specialist is allowed to do and how it should behave.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecialistProfile {
    pub id: SpecialistId,
    pub tools: Vec<&'static str>,
    pub system_prompt: &'static str,
    pub can_hand_off: bool,
}

impl SpecialistProfile {
    pub fn for_specialist(id: SpecialistId) -> Self {
        match id {
            SpecialistId::Consultant => Self {
                id,
                tools: vec![CONSULT_PUBLIC_DOCS, CONSULT_USER_CONTEXT, SAVE_LEARNED_PREFERENCE],
                system_prompt: CONSULTANT_PROMPT,
                can_hand_off: true,
            },
            SpecialistId::SolutionArchitect => Self {
                id,
                tools: vec![
                    CONSULT_PUBLIC_DOCS,
                    CONSULT_USER_CONTEXT,
                    SAVE_LEARNED_PREFERENCE,
                    CHECK_TABLE_SCHEMA,
                ],
                system_prompt: SOLUTION_ARCHITECT_PROMPT,
                can_hand_off: true,
            },
            SpecialistId::Implementation => Self {
                id,
                tools: vec![
                    CHECK_LIVE_INSTANCE,
                    CHECK_TABLE_SCHEMA,
                    CONSULT_PUBLIC_DOCS,
                    GET_ERROR_LOGS,
                    FETCH_RECENT_CHANGES,
                ],
                system_prompt: IMPLEMENTATION_PROMPT,
                can_hand_off: true,
            },
        }
    }

    /// Single responder used when the multi-specialist path is disabled: every
    /// tool, no handoffs.
    pub fn generalist() -> Self {
        Self {
            id: SpecialistId::GENERAL,
            tools: vec![
                CONSULT_PUBLIC_DOCS,
                CONSULT_USER_CONTEXT,
                SAVE_LEARNED_PREFERENCE,
                CHECK_TABLE_SCHEMA,
                CHECK_LIVE_INSTANCE,
                GET_ERROR_LOGS,
                FETCH_RECENT_CHANGES,
            ],
            system_prompt: CONSULTANT_PROMPT,
            can_hand_off: false,
        }
    }

    pub fn permits(&self, tool_name: &str) -> bool {
        self.tools.iter().any(|tool| *tool == tool_name)
    }
}
