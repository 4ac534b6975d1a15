use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::specialist::SpecialistId;

/// A request by the active specialist to transfer ownership of the
/// conversation. Only the handoff coordinator may act on it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffRequest {
    pub target: SpecialistId,
    pub reason: String,
    pub context_summary: String,
}

impl HandoffRequest {
    pub fn new(
        target: SpecialistId,
        reason: impl Into<String>,
        context_summary: impl Into<String>,
    ) -> Self {
        Self { target, reason: reason.into(), context_summary: context_summary.into() }
    }
}

/// An accepted handoff. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffRecord {
    pub from_specialist: SpecialistId,
    pub to_specialist: SpecialistId,
    pub reason: String,
    pub context_summary: String,
    pub timestamp: DateTime<Utc>,
}

impl HandoffRecord {
    /// True when this record moves ownership between `a` and `b`, in either
    /// direction.
    pub fn connects(&self, a: SpecialistId, b: SpecialistId) -> bool {
        (self.from_specialist == a && self.to_specialist == b)
            || (self.from_specialist == b && self.to_specialist == a)
    }
}
