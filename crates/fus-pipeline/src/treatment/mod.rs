//! Treatment planning problem.
//!
//! Steps, in the order an operator uses them:
//!
//! 1. [`step_virtual_fit`] / [`step_manual_fit`] and [`step_track`] produce
//!    pending pose results;
//! 2. [`approve_virtual_fit`] / [`approve_tracking`] make one of them the
//!    active pose ([`revoke_pose`] clears it);
//! 3. [`step_plan`] computes a pending [`Solution`](fus_beamform::Solution)
//!    for a target against the active pose, [`step_reanalyze`] re-validates
//!    it;
//! 4. [`approve_solution`] checks the pose is still active and the findings
//!    allow approval;
//! 5. [`step_handoff`] exports the approved solution for the hardware.

mod handoff;
mod problem;
mod state;
mod steps;

pub use handoff::{HandoffPoint, HardwareHandoff};
pub use problem::{PlanningConfig, TrackingScan, TreatmentInput, TreatmentProblem};
pub use state::{ApprovalLedger, TreatmentState};
pub use steps::{
    PlanOptions, TrackOptions, VirtualFitStepOptions, approve_solution, approve_tracking,
    approve_virtual_fit, reject_solution, reject_tracking, reject_virtual_fit, revoke_pose,
    revoke_solution, run_virtual_fit, step_handoff, step_manual_fit, step_plan, step_reanalyze,
    step_track, step_virtual_fit,
};

/// Session type for treatment planning.
pub type TreatmentSession = crate::session::PlanningSession<TreatmentProblem>;
