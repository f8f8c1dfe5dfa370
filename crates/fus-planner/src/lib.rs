//! High-level entry crate for focused-ultrasound treatment planning.
//!
//! The planner places a transducer relative to the patient's anatomy and
//! computes, for an approved placement, the per-element delays and weights
//! that focus it on a target, together with the safety analysis that gates
//! approval.
//!
//! # Quick Start
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! # let input = unimplemented!();
//! use fus_planner::prelude::*;
//!
//! let mut session = TreatmentSession::new();
//! session.set_input(input)?;
//!
//! // Candidate placements come back pending, best first...
//! let fits = run_virtual_fit(&mut session, "target-1")?;
//!
//! // ...the operator approves one, plans, and approves the solution.
//! approve_virtual_fit(&mut session, &fits[0])?;
//! step_plan(&mut session, "target-1", None)?;
//! approve_solution(&mut session, false)?;
//! let handoff = step_handoff(&mut session, None)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`session`]: session container (`PlanningSession`, `ProblemType`)
//! - [`treatment`]: the treatment-planning problem and its steps
//! - [`core`]: frames, meshes, transducer, protocol, targets, errors
//! - [`registration`]: virtual fit, landmarks, ICP tracking
//! - [`beamform`]: focal patterns, delays, apodization, safety, solutions
//! - [`synthetic`]: deterministic test data
//!
//! | Step | Produces |
//! |------|----------|
//! | `step_virtual_fit` / `step_manual_fit` | pending `VirtualFitResult`s |
//! | `step_track` | pending `TrackingResult` |
//! | `approve_virtual_fit` / `approve_tracking` | active pose |
//! | `step_plan` | pending `Solution` |
//! | `approve_solution` | approved `Solution` |
//! | `step_handoff` | `HardwareHandoff` |

// ═══════════════════════════════════════════════════════════════════════════════
// Session Framework
// ═══════════════════════════════════════════════════════════════════════════════

/// Session container and problem-type trait.
pub mod session {
    pub use fus_pipeline::session::{
        ExportRecord, InvalidationPolicy, LogEntry, PlanningSession, ProblemType,
        SessionMetadata,
    };
}

/// Treatment planning steps, approval ledger and hand-off.
pub mod treatment {
    pub use fus_pipeline::treatment::*;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Foundation Crates
// ═══════════════════════════════════════════════════════════════════════════════

pub mod core {
    pub use fus_core::*;
}

pub mod registration {
    pub use fus_registration::*;
}

pub mod beamform {
    pub use fus_beamform::*;
}

/// Synthetic meshes, arrays and noise.
pub mod synthetic {
    pub use fus_core::synthetic::*;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Prelude
// ═══════════════════════════════════════════════════════════════════════════════

/// The types and steps most programs need.
pub mod prelude {
    pub use fus_beamform::{Finding, PoseKind, PoseRef, Severity, Solution};
    pub use fus_core::{
        ApprovalStatus, FocalPattern, Frame, PlanningError, Protocol, Pt3, RigidTransform,
        SkinSurfaceMesh, Target, TransducerModel,
    };
    pub use fus_pipeline::session::{PlanningSession, ProblemType};
    pub use fus_pipeline::treatment::{
        HardwareHandoff, PlanningConfig, TrackingScan, TreatmentInput, TreatmentProblem,
        TreatmentSession, approve_solution, approve_tracking, approve_virtual_fit,
        revoke_pose, run_virtual_fit, step_handoff, step_plan, step_track, step_virtual_fit,
    };
}
