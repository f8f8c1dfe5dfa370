//! Beamforming and safety analysis for a placed transducer.
//!
//! Given an approved transducer → patient pose, a [`Target`](fus_core::Target)
//! and a [`Protocol`](fus_core::Protocol), this crate:
//!
//! 1. expands the target into focal points ([`focal_points`]),
//! 2. solves per-element delays and apodization weights for each point,
//! 3. estimates the acoustic field and validates it against the protocol's
//!    constraints ([`check_point`], [`check_target`]),
//! 4. aggregates everything into one [`Solution`] ([`compute_solution`]).

mod apodization;
mod delays;
mod field;
mod pattern;
mod safety;
mod solution;

pub use apodization::{element_angle_deg, element_apodizations};
pub use delays::element_delays;
pub use field::{FieldEstimate, FieldModel, Medium, estimate_field};
pub use pattern::{FocalPoint, focal_points};
pub use safety::{Finding, PointMetrics, Severity, Subject, check_point, check_target};
pub use solution::{
    AnalysisSummary, ElementSolution, PointSolution, PoseKind, PoseRef, Solution,
    SolutionRequest, SolverOptions, SolveMethods, WorstCase, compute_solution, reanalyze,
};
