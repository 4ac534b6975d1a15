use std::fmt;

use serde::{Deserialize, Serialize};

/// Fixed enumeration of specialists a conversation can be routed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialistId {
    /// Business process, best practice, and out-of-box configuration guidance.
    Consultant,
    /// Custom code, schema design, and integration architecture.
    SolutionArchitect,
    /// Live-system diagnostics and troubleshooting.
    Implementation,
}

impl SpecialistId {
    pub const ALL: [SpecialistId; 3] =
        [SpecialistId::Consultant, SpecialistId::SolutionArchitect, SpecialistId::Implementation];

    /// The specialist ambiguous or low-confidence turns fall back to.
    pub const GENERAL: SpecialistId = SpecialistId::Consultant;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consultant => "consultant",
            Self::SolutionArchitect => "solution_architect",
            Self::Implementation => "implementation",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Consultant => "Consultant",
            Self::SolutionArchitect => "Solution Architect",
            Self::Implementation => "Implementation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "consultant" => Some(Self::Consultant),
            "solution_architect" | "architect" => Some(Self::SolutionArchitect),
            "implementation" => Some(Self::Implementation),
            _ => None,
        }
    }
}

impl fmt::Display for SpecialistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
