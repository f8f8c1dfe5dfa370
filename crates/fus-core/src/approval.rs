//! Approval lifecycle shared by virtual fits, tracking results and solutions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{PlanResult, PlanningError};

/// Operator approval state of a result.
///
/// ```text
/// Pending ──approve──▶ Approved ──revoke──▶ Revoked
///    │
///    └────reject────▶ Rejected
/// ```
///
/// `Rejected` and `Revoked` are terminal for that instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Revoked,
}

impl ApprovalStatus {
    /// Returns the next state, or an error if the transition is not allowed.
    pub fn transition(self, to: ApprovalStatus) -> PlanResult<ApprovalStatus> {
        use ApprovalStatus::*;
        match (self, to) {
            (Pending, Approved) | (Pending, Rejected) | (Approved, Revoked) => Ok(to),
            (from, to) => Err(PlanningError::InvalidTransition { from, to }),
        }
    }

    pub fn is_approved(self) -> bool {
        self == ApprovalStatus::Approved
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ApprovalStatus::Rejected | ApprovalStatus::Revoked)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Revoked => "revoked",
        };
        f.write_str(s)
    }
}
