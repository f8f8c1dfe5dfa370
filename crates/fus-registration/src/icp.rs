//! Surface registration by iterative closest point.
//!
//! Registration is a bounded state machine. [`IcpProblem`] holds the
//! immutable inputs (a deterministic vertex sample of the source surface and
//! a nearest-neighbour index over the target), [`icp_step`] advances an
//! [`IcpState`] by exactly one iteration without side effects, and
//! [`run_icp`] drives the machine to a terminal [`IcpPhase`]. Callers that
//! need cancellation drive [`icp_step`] themselves and may stop between
//! iterations.
//!
//! Per iteration:
//! 1. match each sampled source vertex (under the current estimate) to its
//!    nearest target vertex within `max_correspondence_distance_mm`,
//! 2. compute the area-weighted RMS residual and coverage,
//! 3. decide the phase from the residual history,
//! 4. update the estimate with a weighted Kabsch fit on the matches.

use fus_core::{Iso3, PlanResult, PlanningError, PointGrid, Pt3, Real, TriangleMesh};
use log::debug;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::rigid::fit_rigid;

/// Options for [`run_icp`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpOptions {
    pub max_iterations: usize,
    /// Source vertices sampled per registration (all when fewer).
    pub num_samples: usize,
    /// Pairs farther apart than this are not matched.
    pub max_correspondence_distance_mm: Real,
    /// Converged once the residual changes by less than this between
    /// iterations.
    pub min_improvement_mm: Real,
    /// Diverged after this many consecutive iterations without a new best
    /// residual.
    pub divergence_patience: usize,
    /// Minimum matched fraction of the sampled source area.
    pub min_coverage: Real,
    /// Seed for the source subsample.
    pub seed: u64,
}

impl Default for IcpOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            num_samples: 200,
            max_correspondence_distance_mm: 15.0,
            min_improvement_mm: 1e-4,
            divergence_patience: 5,
            min_coverage: 0.3,
            seed: 0,
        }
    }
}

/// Phase of the registration state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IcpPhase {
    #[default]
    Searching,
    Converged,
    Diverged,
    /// Too little of the source matched the target.
    InsufficientOverlap,
    MaxIterationsReached,
}

impl IcpPhase {
    pub fn is_terminal(self) -> bool {
        self != IcpPhase::Searching
    }
}

/// Registration state after some number of iterations.
#[derive(Debug, Clone, PartialEq)]
pub struct IcpState {
    pub iteration: usize,
    /// Current source → target estimate.
    pub transform: Iso3,
    pub phase: IcpPhase,
    /// Residual of the latest iteration, before its update (mm).
    pub rms_mm: Real,
    pub best_rms_mm: Real,
    pub previous_rms_mm: Option<Real>,
    /// Consecutive iterations without a new best residual.
    pub stalled: usize,
    pub coverage: Real,
    /// Match distances of the latest iteration, in sample order.
    pub residuals_mm: Vec<Real>,
}

impl IcpState {
    pub fn new(initial: Iso3) -> Self {
        Self {
            iteration: 0,
            transform: initial,
            phase: IcpPhase::Searching,
            rms_mm: Real::INFINITY,
            best_rms_mm: Real::INFINITY,
            previous_rms_mm: None,
            stalled: 0,
            coverage: 0.0,
            residuals_mm: Vec::new(),
        }
    }
}

/// Immutable inputs of one registration.
#[derive(Debug, Clone)]
pub struct IcpProblem {
    samples: Vec<Pt3>,
    weights: Vec<Real>,
    total_weight: Real,
    target: PointGrid,
    opts: IcpOptions,
}

impl IcpProblem {
    /// Sample `source` and index `target`.
    ///
    /// Source vertices are weighted by their share of surface area, so
    /// coverage is an area fraction.
    pub fn new(
        source: &TriangleMesh,
        target: &TriangleMesh,
        opts: IcpOptions,
    ) -> PlanResult<Self> {
        if source.vertices.is_empty() || target.vertices.is_empty() {
            return Err(PlanningError::InvalidInput(
                "registration needs non-empty source and target surfaces".into(),
            ));
        }
        if opts.max_correspondence_distance_mm <= 0.0 || opts.num_samples < 3 {
            return Err(PlanningError::InvalidInput(
                "correspondence distance must be positive and at least 3 samples used".into(),
            ));
        }
        let areas = source.vertex_areas();
        let indices = sample_indices(source.num_vertices(), opts.num_samples, opts.seed);
        let samples: Vec<Pt3> = indices.iter().map(|&i| source.vertices[i]).collect();
        let weights: Vec<Real> = indices.iter().map(|&i| areas[i].max(1e-12)).collect();
        let total_weight = weights.iter().sum();
        Ok(Self {
            samples,
            weights,
            total_weight,
            target: PointGrid::new(&target.vertices),
            opts,
        })
    }

    pub fn options(&self) -> &IcpOptions {
        &self.opts
    }

    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }
}

/// Deterministic ascending subsample of `0..n`.
fn sample_indices(n: usize, count: usize, seed: u64) -> Vec<usize> {
    if n <= count {
        return (0..n).collect();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, n, count).into_vec();
    picked.sort_unstable();
    picked
}

/// Advance `state` by one iteration. Terminal states are returned unchanged.
pub fn icp_step(problem: &IcpProblem, state: &IcpState) -> IcpState {
    if state.phase.is_terminal() {
        return state.clone();
    }
    let opts = &problem.opts;
    let max_d = opts.max_correspondence_distance_mm;

    let matches: Vec<Option<(usize, Real)>> = problem
        .samples
        .par_iter()
        .map(|p| problem.target.nearest(&state.transform.transform_point(p), Some(max_d)))
        .collect();

    let mut src = Vec::new();
    let mut dst = Vec::new();
    let mut w = Vec::new();
    let mut residuals = Vec::new();
    let mut sq = 0.0;
    let mut matched_weight = 0.0;
    for (i, m) in matches.iter().enumerate() {
        if let Some((j, d)) = *m {
            src.push(problem.samples[i]);
            dst.push(problem.target.points()[j]);
            w.push(problem.weights[i]);
            residuals.push(d);
            sq += problem.weights[i] * d * d;
            matched_weight += problem.weights[i];
        }
    }

    let mut next = state.clone();
    next.iteration += 1;
    next.coverage = matched_weight / problem.total_weight;
    next.residuals_mm = residuals;
    next.rms_mm = if matched_weight > 0.0 {
        (sq / matched_weight).sqrt()
    } else {
        Real::INFINITY
    };

    if next.coverage < opts.min_coverage || src.len() < 3 {
        next.phase = IcpPhase::InsufficientOverlap;
        return next;
    }

    next.phase = decide_phase(&mut next, opts);
    next.previous_rms_mm = Some(next.rms_mm);

    match fit_rigid(&src, &dst, Some(&w)) {
        Ok(fit) => next.transform = fit.iso,
        // Degenerate matches (e.g. collapsed onto a line) cannot be improved.
        Err(_) => next.phase = IcpPhase::Diverged,
    }
    if next.phase == IcpPhase::Searching && next.iteration >= opts.max_iterations {
        next.phase = IcpPhase::MaxIterationsReached;
    }
    debug!(
        "icp iter {}: rms {:.4} mm, coverage {:.3}, phase {:?}",
        next.iteration, next.rms_mm, next.coverage, next.phase
    );
    next
}

fn decide_phase(state: &mut IcpState, opts: &IcpOptions) -> IcpPhase {
    let rms = state.rms_mm;
    if let Some(prev) = state.previous_rms_mm
        && (prev - rms).abs() < opts.min_improvement_mm
    {
        return IcpPhase::Converged;
    }
    if rms < state.best_rms_mm {
        state.best_rms_mm = rms;
        state.stalled = 0;
        IcpPhase::Searching
    } else {
        state.stalled += 1;
        if state.stalled >= opts.divergence_patience {
            IcpPhase::Diverged
        } else {
            IcpPhase::Searching
        }
    }
}

/// Terminal outcome of a successful registration.
#[derive(Debug, Clone, PartialEq)]
pub struct IcpOutcome {
    pub transform: Iso3,
    pub phase: IcpPhase,
    pub iterations: usize,
    pub rms_mm: Real,
    pub coverage: Real,
    pub residuals_mm: Vec<Real>,
    pub num_samples: usize,
}

/// Drive the state machine from `initial` to a terminal phase.
///
/// `Converged` and `MaxIterationsReached` return the last estimate.
/// `Diverged` maps to [`PlanningError::RegistrationDiverged`] and
/// `InsufficientOverlap` to [`PlanningError::InsufficientOverlap`].
pub fn run_icp(
    source: &TriangleMesh,
    target: &TriangleMesh,
    initial: Iso3,
    opts: &IcpOptions,
) -> PlanResult<IcpOutcome> {
    let problem = IcpProblem::new(source, target, *opts)?;
    let mut state = IcpState::new(initial);
    while !state.phase.is_terminal() {
        state = icp_step(&problem, &state);
    }
    finish(&problem, state)
}

/// Map a terminal state to an outcome or error.
pub fn finish(problem: &IcpProblem, state: IcpState) -> PlanResult<IcpOutcome> {
    match state.phase {
        IcpPhase::Diverged => Err(PlanningError::RegistrationDiverged {
            iterations: state.iteration,
            rms_mm: state.rms_mm,
        }),
        IcpPhase::InsufficientOverlap => Err(PlanningError::InsufficientOverlap {
            coverage: state.coverage,
            minimum: problem.opts.min_coverage,
        }),
        IcpPhase::Searching => Err(PlanningError::InvalidInput(
            "registration stopped before reaching a terminal phase".into(),
        )),
        IcpPhase::Converged | IcpPhase::MaxIterationsReached => Ok(IcpOutcome {
            transform: state.transform,
            phase: state.phase,
            iterations: state.iteration,
            rms_mm: state.rms_mm,
            coverage: state.coverage,
            residuals_mm: state.residuals_mm,
            num_samples: problem.num_samples(),
        }),
    }
}

/// How a registration's confidence score is computed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfidenceModel {
    /// `coverage * exp(-rms / residual_scale_mm)`.
    ResidualCoverage { residual_scale_mm: Real },
    /// Fraction of sampled vertices matched within `inlier_distance_mm`.
    InlierRatio { inlier_distance_mm: Real },
}

impl Default for ConfidenceModel {
    fn default() -> Self {
        ConfidenceModel::ResidualCoverage {
            residual_scale_mm: 2.0,
        }
    }
}

impl ConfidenceModel {
    /// Confidence in `[0, 1]`.
    pub fn score(&self, outcome: &IcpOutcome) -> Real {
        let c = match *self {
            ConfidenceModel::ResidualCoverage { residual_scale_mm } => {
                outcome.coverage * (-outcome.rms_mm / residual_scale_mm.max(1e-9)).exp()
            }
            ConfidenceModel::InlierRatio { inlier_distance_mm } => {
                let inliers = outcome
                    .residuals_mm
                    .iter()
                    .filter(|d| **d <= inlier_distance_mm)
                    .count();
                inliers as Real / outcome.num_samples.max(1) as Real
            }
        };
        c.clamp(0.0, 1.0)
    }
}
