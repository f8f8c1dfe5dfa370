//! [`ProblemType`] implementation for treatment planning.

use std::collections::HashSet;

use anyhow::{Context, Result, ensure};
use fus_beamform::{Solution, SolverOptions};
use fus_core::{
    PhotoscanMesh, PlanningError, Protocol, RigidTransform, SkinSurfaceMesh, Target,
    TransducerModel,
};
use fus_registration::{FacialLandmarks, IcpOptions, TrackingOptions, VirtualFitOptions};
use serde::{Deserialize, Serialize};

use crate::session::{InvalidationPolicy, ProblemType};

use super::handoff::HardwareHandoff;
use super::state::TreatmentState;

/// Plan one treatment: place the transducer, then compute and approve a
/// solution for a target.
#[derive(Debug)]
pub struct TreatmentProblem;

/// Everything the planner reads but never modifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreatmentInput {
    /// Skin surface segmented from the planning volume, in patient space.
    pub skin: SkinSurfaceMesh,
    pub transducer: TransducerModel,
    /// Active protocol. Re-analysis may swap it for a compatible one.
    pub protocol: Protocol,
    /// Targets in patient space; ids are unique.
    pub targets: Vec<Target>,
    /// Landmarks picked on the skin surface, used to seed tracking.
    #[serde(default)]
    pub skin_landmarks: Option<FacialLandmarks>,
}

impl TreatmentInput {
    /// Look up a target by id.
    pub fn target(&self, id: &str) -> Result<&Target> {
        self.targets
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| PlanningError::UnknownResult(format!("target '{id}'")).into())
    }
}

/// One photoscan of the patient wearing the transducer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingScan {
    /// Scan mesh in its own frame and units.
    pub photoscan: PhotoscanMesh,
    /// Transducer → photoscan, found by locating the transducer in the scan.
    pub transducer_in_photoscan: RigidTransform,
    /// Landmarks picked on the scan, matched to `skin_landmarks`.
    #[serde(default)]
    pub landmarks: Option<FacialLandmarks>,
}

/// Step configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningConfig {
    // ─────────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────────
    pub virtual_fit: VirtualFitOptions,
    pub tracking: TrackingOptions,

    // ─────────────────────────────────────────────────────────────────────────
    // Planning
    // ─────────────────────────────────────────────────────────────────────────
    pub solver: SolverOptions,
    /// Report the target-to-skin distance of every focal point.
    pub skin_distance: bool,
}

impl PlanningConfig {
    /// Options for [`virtual_fit`](fus_registration::virtual_fit), before
    /// per-step overrides.
    pub fn virtual_fit_opts(&self) -> VirtualFitOptions {
        self.virtual_fit
    }

    /// ICP settings nested in the tracking options.
    pub fn icp_opts(&self) -> IcpOptions {
        self.tracking.icp
    }

    /// Options for tracking registration, before per-step overrides.
    pub fn tracking_opts(&self) -> TrackingOptions {
        self.tracking
    }

    /// Solver options for [`step_plan`](super::step_plan).
    pub fn solver_opts(&self) -> SolverOptions {
        self.solver
    }
}

impl ProblemType for TreatmentProblem {
    type Config = PlanningConfig;
    type Input = TreatmentInput;
    type State = TreatmentState;
    type Output = Solution;
    type Export = HardwareHandoff;

    fn name() -> &'static str {
        "treatment_planning"
    }

    fn validate_input(input: &Self::Input) -> Result<()> {
        input.skin.mesh.validate().context("invalid skin surface")?;
        input.transducer.validate().context("invalid transducer")?;
        input.protocol.validate().context("invalid protocol")?;
        ensure!(!input.targets.is_empty(), "at least one target is required");
        let mut seen = HashSet::new();
        for t in &input.targets {
            ensure!(seen.insert(t.id.as_str()), "duplicate target id '{}'", t.id);
            ensure!(
                t.position.iter().all(|v| v.is_finite()),
                "target '{}' has a non-finite position",
                t.id
            );
        }
        Ok(())
    }

    fn validate_config(config: &Self::Config) -> Result<()> {
        let vf = &config.virtual_fit;
        ensure!(vf.max_results > 0, "virtual_fit.max_results must be positive");
        ensure!(vf.search_radius_mm > 0.0, "virtual_fit.search_radius_mm must be positive");
        ensure!(
            (0.0..=1.0).contains(&vf.min_contact_fraction),
            "virtual_fit.min_contact_fraction must be in [0, 1]"
        );
        let icp = &config.tracking.icp;
        ensure!(icp.max_iterations > 0, "tracking.icp.max_iterations must be positive");
        ensure!(icp.num_samples >= 3, "tracking.icp.num_samples must be at least 3");
        ensure!(
            icp.max_correspondence_distance_mm > 0.0,
            "tracking.icp.max_correspondence_distance_mm must be positive"
        );
        ensure!(
            (0.0..=1.0).contains(&icp.min_coverage),
            "tracking.icp.min_coverage must be in [0, 1]"
        );
        ensure!(
            (0.0..=1.0).contains(&config.tracking.confidence_threshold),
            "tracking.confidence_threshold must be in [0, 1]"
        );
        Ok(())
    }

    fn on_input_change() -> InvalidationPolicy {
        // Poses and solutions refer to the previous anatomy and transducer.
        InvalidationPolicy::CLEAR_COMPUTED
    }

    fn export(output: &Self::Output, _config: &Self::Config) -> Result<Self::Export> {
        Ok(HardwareHandoff::from_solution(output)?)
    }
}
