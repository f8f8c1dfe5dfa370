//! Solution aggregation: pattern → per-point solve and validation → one
//! auditable [`Solution`].

use fus_core::{
    ApodizationMethod, ApprovalStatus, DelayMethod, Element, FocalPattern, Observation,
    PlanResult, PlanningError, PointGrid, Protocol, Pt3, Pulse, QuantityKind, Real,
    RigidTransform, SafetyQuantity, SegmentationMethod, Sequence, SkinSurfaceMesh, Target,
    TransducerModel,
};
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::apodization::element_apodizations;
use crate::delays::element_delays;
use crate::field::{FieldModel, estimate_field};
use crate::pattern::{FocalPoint, focal_points};
use crate::safety::{Finding, PointMetrics, Severity, check_point, check_target};

/// Which kind of approved result a pose came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseKind {
    VirtualFit,
    Tracking,
}

/// Reference to the pose a solution was computed against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoseRef {
    pub kind: PoseKind,
    pub id: String,
    /// Session pose generation at the time of approval.
    pub generation: u64,
}

/// Delay and weight of one element for one focal point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementSolution {
    pub delay_s: Real,
    pub apodization: Real,
}

/// Solved elements, metrics and findings of one focal point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointSolution {
    pub focal_point: FocalPoint,
    pub elements: Vec<ElementSolution>,
    pub metrics: PointMetrics,
    pub findings: Vec<Finding>,
}

/// Largest observed value of a quantity and the focal point producing it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorstCase {
    pub quantity: SafetyQuantity,
    pub value: Real,
    pub focal_point: usize,
}

/// Finding counts over the whole solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub warnings: usize,
    pub fatals: usize,
    /// Warnings present; approval needs explicit acknowledgement.
    pub requires_acknowledgement: bool,
}

/// Protocol methods a solution was solved with.
///
/// Together with the pulse and sequence these fix the delays, apodizations
/// and field metrics; re-analysis only accepts protocols that agree on them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveMethods {
    pub focal_pattern: FocalPattern,
    pub delay_method: DelayMethod,
    pub apodization_method: ApodizationMethod,
    pub segmentation_method: SegmentationMethod,
}

impl SolveMethods {
    pub fn of(protocol: &Protocol) -> Self {
        Self {
            focal_pattern: protocol.focal_pattern,
            delay_method: protocol.delay_method,
            apodization_method: protocol.apodization_method,
            segmentation_method: protocol.segmentation_method,
        }
    }
}

/// Planned sonication for one target and pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub id: String,
    pub target_id: String,
    pub target_position_ras_mm: Pt3,
    pub protocol_id: String,
    pub transducer_id: String,
    pub pose: PoseRef,
    pub pulse: Pulse,
    pub sequence: Sequence,
    pub methods: SolveMethods,
    pub points: Vec<PointSolution>,
    pub target_findings: Vec<Finding>,
    pub global: Vec<WorstCase>,
    pub analysis: AnalysisSummary,
    #[serde(default)]
    pub status: ApprovalStatus,
    /// Warning findings the operator acknowledged when approving.
    #[serde(default)]
    pub acknowledged_warnings: Vec<Finding>,
    /// Seconds since the Unix epoch; set by the session layer.
    #[serde(default)]
    pub created_at: u64,
}

impl Solution {
    /// All findings, target placement first, then per point.
    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.target_findings
            .iter()
            .chain(self.points.iter().flat_map(|p| p.findings.iter()))
    }

    pub fn has_fatal(&self) -> bool {
        self.analysis.fatals > 0
    }

    /// Warnings not among those acknowledged at approval.
    pub fn unacknowledged_warnings(&self) -> usize {
        self.findings()
            .filter(|f| f.severity == Severity::Warning)
            .filter(|f| !self.acknowledged_warnings.contains(f))
            .count()
    }

    /// Worst case of `quantity` over the focal points, if observed.
    pub fn worst(&self, quantity: SafetyQuantity) -> Option<&WorstCase> {
        self.global.iter().find(|w| w.quantity == quantity)
    }
}

/// Solver settings that are not part of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub field: FieldModel,
}

/// Inputs of [`compute_solution`].
#[derive(Debug, Clone, Copy)]
pub struct SolutionRequest<'a> {
    pub id: &'a str,
    pub pose_ref: &'a PoseRef,
    /// Transducer → patient.
    pub pose: &'a RigidTransform,
    pub target: &'a Target,
    pub protocol: &'a Protocol,
    pub transducer: &'a TransducerModel,
    /// Enables the target-to-skin distance metric.
    pub skin: Option<&'a SkinSurfaceMesh>,
    pub options: &'a SolverOptions,
}

/// Compute a pending solution.
///
/// Focal points are solved and validated independently in parallel and then
/// joined; point order is the pattern order. Identical requests produce
/// bit-identical delays and apodizations.
pub fn compute_solution(req: &SolutionRequest<'_>) -> PlanResult<Solution> {
    req.protocol.validate()?;
    req.transducer.validate()?;
    let transducer = req.transducer.in_mm();
    let points = focal_points(req.target, &req.protocol.focal_pattern, req.pose)?;
    let skin_grid = req.skin.map(|s| PointGrid::new(&s.mesh.vertices));

    let solved: Vec<PointSolution> = points
        .into_par_iter()
        .map(|fp| {
            solve_point(
                fp,
                &transducer.elements,
                req.protocol,
                req.options,
                skin_grid.as_ref(),
            )
        })
        .collect::<PlanResult<Vec<_>>>()?;
    if let Some(q) = unobservable(&solved, req.protocol) {
        return Err(PlanningError::InvalidInput(format!(
            "protocol '{}' constrains {q}, which this request cannot observe{}",
            req.protocol.id,
            if req.skin.is_none() { " without the skin surface" } else { "" }
        )));
    }

    let target_position = req.target.position_ras_mm();
    let target_findings = check_target(&target_position, &req.protocol.target_constraints);
    let global = worst_cases(&solved);
    let analysis = summarize(&solved, &target_findings);
    debug!(
        "solution {}: {} points, {} warnings, {} fatal",
        req.id,
        solved.len(),
        analysis.warnings,
        analysis.fatals
    );

    Ok(Solution {
        id: req.id.to_string(),
        target_id: req.target.id.clone(),
        target_position_ras_mm: target_position,
        protocol_id: req.protocol.id.clone(),
        transducer_id: transducer.id.clone(),
        pose: req.pose_ref.clone(),
        pulse: req.protocol.pulse,
        sequence: req.protocol.sequence,
        methods: SolveMethods::of(req.protocol),
        points: solved,
        target_findings,
        global,
        analysis,
        status: ApprovalStatus::Pending,
        acknowledged_warnings: Vec::new(),
        created_at: 0,
    })
}

fn solve_point(
    focal_point: FocalPoint,
    elements: &[Element],
    protocol: &Protocol,
    options: &SolverOptions,
    skin: Option<&PointGrid>,
) -> PlanResult<PointSolution> {
    let focus = focal_point.transducer;
    let delays = element_delays(elements, &focus, &protocol.delay_method)?;
    let apodizations = element_apodizations(elements, &focus, &protocol.apodization_method)?;
    let field = estimate_field(&options.field, elements, &apodizations, &focus, protocol)?;

    let n = elements.len().max(1) as Real;
    let metrics = PointMetrics {
        field,
        delay_span_us: delays.iter().copied().fold(0.0, Real::max) * 1e6,
        active_element_fraction: apodizations.iter().filter(|w| **w > 0.0).count() as Real / n,
        focus_ahead: focus.z > 0.0,
        target_skin_distance_mm: skin
            .and_then(|g| g.nearest(&focal_point.patient, None))
            .map(|(_, d)| d),
    };
    let findings = check_point(&metrics, &protocol.parameter_constraints, focal_point.index);
    let elements = delays
        .into_iter()
        .zip(apodizations)
        .map(|(delay_s, apodization)| ElementSolution {
            delay_s,
            apodization,
        })
        .collect();
    Ok(PointSolution {
        focal_point,
        elements,
        metrics,
        findings,
    })
}

/// First constrained quantity some point has no observation for.
fn unobservable(points: &[PointSolution], protocol: &Protocol) -> Option<SafetyQuantity> {
    protocol
        .parameter_constraints
        .iter()
        .map(|c| c.quantity)
        .find(|&q| points.iter().any(|p| p.metrics.observe(q).is_none()))
}

/// Protocol parts that differ from what `solution` was solved with.
fn solve_differences(solution: &Solution, protocol: &Protocol) -> Vec<&'static str> {
    let m = SolveMethods::of(protocol);
    let s = &solution.methods;
    [
        ("pulse", protocol.pulse == solution.pulse),
        ("sequence", protocol.sequence == solution.sequence),
        ("focal pattern", m.focal_pattern == s.focal_pattern),
        ("delay method", m.delay_method == s.delay_method),
        ("apodization method", m.apodization_method == s.apodization_method),
        ("segmentation method", m.segmentation_method == s.segmentation_method),
    ]
    .into_iter()
    .filter(|(_, same)| !same)
    .map(|(what, _)| what)
    .collect()
}

/// Per scalar quantity, the maximum over points; ties keep the lowest index.
fn worst_cases(points: &[PointSolution]) -> Vec<WorstCase> {
    SafetyQuantity::ALL
        .iter()
        .filter(|q| q.kind() == QuantityKind::Scalar)
        .filter_map(|&quantity| {
            let mut worst: Option<WorstCase> = None;
            for p in points {
                let Some(Observation::Scalar(value)) = p.metrics.observe(quantity) else {
                    continue;
                };
                if value.is_nan() {
                    continue;
                }
                if worst.is_none_or(|w| value > w.value) {
                    worst = Some(WorstCase {
                        quantity,
                        value,
                        focal_point: p.focal_point.index,
                    });
                }
            }
            worst
        })
        .collect()
}

fn summarize(points: &[PointSolution], target_findings: &[Finding]) -> AnalysisSummary {
    let all = target_findings
        .iter()
        .chain(points.iter().flat_map(|p| p.findings.iter()));
    let (mut warnings, mut fatals) = (0, 0);
    for f in all {
        match f.severity {
            Severity::Warning => warnings += 1,
            Severity::Fatal => fatals += 1,
        }
    }
    AnalysisSummary {
        warnings,
        fatals,
        requires_acknowledgement: warnings > 0,
    }
}

/// Re-run validation of an existing solution against `protocol` without
/// recomputing delays or apodizations.
///
/// Only the constraints may differ: a protocol with another pulse, sequence
/// or method, or one constraining a quantity the solution never observed,
/// fails with [`PlanningError::IncompatibleProtocol`]. The result records
/// `protocol.id`. Approval status and acknowledgements are carried over.
pub fn reanalyze(solution: &Solution, protocol: &Protocol) -> PlanResult<Solution> {
    protocol.validate()?;
    let changed = solve_differences(solution, protocol);
    if !changed.is_empty() {
        return Err(PlanningError::IncompatibleProtocol(format!(
            "protocol '{}' changes the {} of solution '{}'; plan again instead",
            protocol.id,
            changed.join(", "),
            solution.id
        )));
    }
    if let Some(q) = unobservable(&solution.points, protocol) {
        return Err(PlanningError::IncompatibleProtocol(format!(
            "protocol '{}' constrains {q}, which solution '{}' did not compute",
            protocol.id, solution.id
        )));
    }
    let mut out = solution.clone();
    if out.protocol_id != protocol.id {
        debug!(
            "solution {}: re-analysed under protocol {} (was {})",
            out.id, protocol.id, out.protocol_id
        );
        out.protocol_id = protocol.id.clone();
    }
    for p in &mut out.points {
        p.findings = check_point(
            &p.metrics,
            &protocol.parameter_constraints,
            p.focal_point.index,
        );
    }
    out.target_findings = check_target(&out.target_position_ras_mm, &protocol.target_constraints);
    out.global = worst_cases(&out.points);
    out.analysis = summarize(&out.points, &out.target_findings);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fus_core::synthetic::arrays::planar_array;
    use fus_core::test_utils::make_transform;
    use fus_core::{ConstraintRule, FocalPattern, Frame, ParameterConstraint};

    fn pose() -> RigidTransform {
        // Transducer above the head looking down (-z in patient space).
        make_transform(
            Frame::Transducer,
            Frame::Patient,
            (std::f64::consts::PI, 0.0, 0.0),
            (0.0, 0.0, 90.0),
        )
    }

    fn wheel_protocol() -> Protocol {
        let mut p = Protocol::new("wheel");
        p.focal_pattern = FocalPattern::Wheel {
            include_center: true,
            num_spokes: 4,
            spoke_radius_mm: 5.0,
        };
        p
    }

    fn solve(protocol: &Protocol) -> Solution {
        let transducer = planar_array(8, 8, 4.0, 10.0);
        let target = Target::new("t", Pt3::new(0.0, 0.0, 40.0));
        let pose_ref = PoseRef {
            kind: PoseKind::VirtualFit,
            id: "vf-1".into(),
            generation: 1,
        };
        compute_solution(&SolutionRequest {
            id: "sol-1",
            pose_ref: &pose_ref,
            pose: &pose(),
            target: &target,
            protocol,
            transducer: &transducer,
            skin: None,
            options: &SolverOptions::default(),
        })
        .unwrap()
    }

    #[test]
    fn every_point_has_zero_minimum_delay() {
        let s = solve(&wheel_protocol());
        assert_eq!(s.points.len(), 5);
        for p in &s.points {
            let min = p.elements.iter().map(|e| e.delay_s).fold(Real::INFINITY, Real::min);
            assert_eq!(min, 0.0);
            let max_w = p.elements.iter().map(|e| e.apodization).fold(0.0, Real::max);
            assert_eq!(max_w, 1.0);
            assert!(p.metrics.focus_ahead);
        }
        assert_eq!(s.status, ApprovalStatus::Pending);
        assert!(!s.has_fatal());
    }

    #[test]
    fn repeated_runs_are_bit_identical() {
        let a = solve(&wheel_protocol());
        let b = solve(&wheel_protocol());
        for (pa, pb) in a.points.iter().zip(&b.points) {
            for (ea, eb) in pa.elements.iter().zip(&pb.elements) {
                assert_eq!(ea.delay_s.to_bits(), eb.delay_s.to_bits());
                assert_eq!(ea.apodization.to_bits(), eb.apodization.to_bits());
            }
        }
        assert_eq!(a, b);
    }

    #[test]
    fn worst_case_ties_pick_lowest_index() {
        let s = solve(&wheel_protocol());
        let peak = s
            .points
            .iter()
            .map(|p| p.metrics.field.peak_pressure_mpa)
            .fold(Real::NEG_INFINITY, Real::max);
        assert_eq!(s.worst(SafetyQuantity::PeakPressure).unwrap().value, peak);

        let mut twins = vec![s.points[2].clone(), s.points[2].clone()];
        twins[0].focal_point.index = 0;
        twins[1].focal_point.index = 1;
        let global = worst_cases(&twins);
        assert!(global.iter().all(|w| w.focal_point == 0));
        // Skin distance is unobservable without a skin mesh; flags are not scalars.
        assert!(global.iter().all(|w| w.quantity != SafetyQuantity::TargetSkinDistance));
        assert!(global.iter().all(|w| w.quantity != SafetyQuantity::FocusAhead));
    }

    #[test]
    fn reanalysis_applies_new_limits_without_resolving() {
        let s = solve(&wheel_protocol());
        let mut strict = wheel_protocol();
        strict.parameter_constraints.push(ParameterConstraint {
            quantity: SafetyQuantity::SteeringAngle,
            warning: Some(ConstraintRule::Range {
                min: None,
                max: Some(1.0),
                inclusive: true,
            }),
            error: None,
        });
        let r = reanalyze(&s, &strict).unwrap();
        // Centre is on axis; the four spokes are steered.
        assert_eq!(r.analysis.warnings, 4);
        assert!(r.analysis.requires_acknowledgement);
        assert!(!r.has_fatal());
        assert_eq!(r.points[0].elements, s.points[0].elements);
        assert_eq!(r.findings().count(), 4);
    }

    #[test]
    fn reanalysis_records_the_new_protocol() {
        let s = solve(&wheel_protocol());
        let mut renamed = wheel_protocol();
        renamed.id = "wheel-v2".into();
        let r = reanalyze(&s, &renamed).unwrap();
        assert_eq!(r.protocol_id, "wheel-v2");
        assert_eq!(s.protocol_id, "wheel");
    }

    #[test]
    fn reanalysis_refuses_protocols_solved_differently() {
        let s = solve(&wheel_protocol());

        let mut faster = wheel_protocol();
        faster.pulse.frequency_hz = 650e3;
        let err = reanalyze(&s, &faster).unwrap_err();
        assert!(
            matches!(&err, PlanningError::IncompatibleProtocol(m) if m.contains("pulse")),
            "{err}"
        );

        // Single point instead of the wheel.
        let err = reanalyze(&s, &Protocol::new("wheel")).unwrap_err();
        assert!(
            matches!(&err, PlanningError::IncompatibleProtocol(m) if m.contains("focal pattern")),
            "{err}"
        );
    }

    #[test]
    fn skin_limits_need_a_skin_surface() {
        let mut protocol = wheel_protocol();
        protocol.parameter_constraints.push(ParameterConstraint {
            quantity: SafetyQuantity::TargetSkinDistance,
            warning: Some(ConstraintRule::Range {
                min: Some(5.0),
                max: None,
                inclusive: true,
            }),
            error: None,
        });
        let transducer = planar_array(8, 8, 4.0, 10.0);
        let target = Target::new("t", Pt3::new(0.0, 0.0, 40.0));
        let pose_ref = PoseRef {
            kind: PoseKind::VirtualFit,
            id: "vf-1".into(),
            generation: 1,
        };
        let err = compute_solution(&SolutionRequest {
            id: "sol-1",
            pose_ref: &pose_ref,
            pose: &pose(),
            target: &target,
            protocol: &protocol,
            transducer: &transducer,
            skin: None,
            options: &SolverOptions::default(),
        })
        .unwrap_err();
        assert!(matches!(err, PlanningError::InvalidInput(_)), "{err}");

        // Adding the limit afterwards cannot be checked either.
        let s = solve(&wheel_protocol());
        let err = reanalyze(&s, &protocol).unwrap_err();
        assert!(matches!(err, PlanningError::IncompatibleProtocol(_)), "{err}");
    }
}
