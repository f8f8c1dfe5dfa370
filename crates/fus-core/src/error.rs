//! Error kinds surfaced by the planning core.

use thiserror::Error;

use crate::{ApprovalStatus, Real};

/// Errors produced by the planning algorithms and the approval workflow.
///
/// Safety findings are not errors: they are attached to a solution as data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanningError {
    #[error("invalid transform: {0}")]
    InvalidTransform(String),
    #[error("no feasible virtual fit: {0}")]
    NoFeasibleFit(String),
    #[error("registration diverged after {iterations} iterations (rms {rms_mm:.4} mm)")]
    RegistrationDiverged { iterations: usize, rms_mm: Real },
    #[error("insufficient overlap: coverage {coverage:.3} below minimum {minimum:.3}")]
    InsufficientOverlap { coverage: Real, minimum: Real },
    #[error("invalid focal pattern: {0}")]
    InvalidPattern(String),
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),
    #[error("stale pose: {0}")]
    StalePose(String),
    #[error("invalid approval transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: ApprovalStatus,
        to: ApprovalStatus,
    },
    #[error("invalid constraint: {0}")]
    InvalidConstraint(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("solution has {0} fatal finding(s) and cannot be approved")]
    FatalFindings(usize),
    #[error("solution has {0} warning(s) that must be acknowledged before approval")]
    WarningsNotAcknowledged(usize),
    #[error("protocol does not match the solution: {0}")]
    IncompatibleProtocol(String),
    #[error("hardware hand-off refused: {0}")]
    HandoffRefused(String),
    #[error("unknown result id '{0}'")]
    UnknownResult(String),
}

/// Convenience alias for results carrying a [`PlanningError`].
pub type PlanResult<T> = std::result::Result<T, PlanningError>;
