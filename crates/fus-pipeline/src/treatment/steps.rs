//! Step functions for treatment planning.
//!
//! Every step validates the session first and commits nothing unless it
//! succeeds. Refused approvals and failed registrations are still recorded
//! in the session log.

use anyhow::{Context, Result, bail};
use fus_beamform::{
    Finding, PoseKind, PoseRef, Severity, Solution, SolutionRequest, compute_solution, reanalyze,
};
use fus_core::{
    ApprovalStatus, PlanningError, Protocol, Real, RigidTransform, SafetyQuantity,
};
use fus_registration::{
    TrackingInput, VirtualFitResult, distance_to_virtual_fit, manual_fit, register_tracking,
    seed_from_pose, virtual_fit,
};
use log::{debug, warn};

use crate::session::{PlanningSession, current_timestamp};

use super::handoff::HardwareHandoff;
use super::problem::{TrackingScan, TreatmentProblem};

type Session = PlanningSession<TreatmentProblem>;

// ─────────────────────────────────────────────────────────────────────────────
// Step Options
// ─────────────────────────────────────────────────────────────────────────────

/// Overrides for [`step_virtual_fit`].
#[derive(Debug, Clone, Default)]
pub struct VirtualFitStepOptions {
    /// Number of ranked candidates kept.
    pub max_results: Option<usize>,
    /// Radius around the target entry point searched for anchors (mm).
    pub search_radius_mm: Option<Real>,
}

/// Overrides for [`step_track`].
#[derive(Debug, Clone, Default)]
pub struct TrackOptions {
    /// Photoscan → patient initial guess; replaces landmark seeding.
    pub seed: Option<RigidTransform>,
    /// Without an explicit `seed`, start from the active pose and the
    /// transducer located in the photoscan.
    pub seed_from_active_pose: bool,
    /// Confidence below which the result is flagged.
    pub confidence_threshold: Option<Real>,
}

/// Overrides for [`step_plan`].
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Compute focal-point to skin distances. Always on when the protocol
    /// constrains them.
    pub skin_distance: Option<bool>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn logged<T>(session: &mut Session, operation: &str, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        session.log_failure(operation, format!("{e:#}"));
    }
    result
}

/// Pending fits of earlier runs can no longer be approved.
fn supersede_pending_fits(fits: &mut [VirtualFitResult]) -> Result<usize> {
    let mut n = 0;
    for r in fits.iter_mut().filter(|r| r.status == ApprovalStatus::Pending) {
        r.status = r.status.transition(ApprovalStatus::Rejected)?;
        n += 1;
    }
    Ok(n)
}

/// Revoke the current solution if it is approved; returns its id.
fn revoke_approved_solution(session: &mut Session) -> Result<Option<String>> {
    session.state.ledger.approved_solution = None;
    match session.output_mut() {
        Some(solution) if solution.status.is_approved() => {
            solution.status = solution.status.transition(ApprovalStatus::Revoked)?;
            Ok(Some(solution.id.clone()))
        }
        _ => Ok(None),
    }
}

fn approve_pose(session: &mut Session, kind: PoseKind, id: &str) -> Result<PoseRef> {
    let approved = session
        .state
        .pose_status_mut(kind, id)?
        .transition(ApprovalStatus::Approved)?;
    let superseded = session.state.revoke_approved_poses()?;
    let revoked_solution = revoke_approved_solution(session)?;
    *session.state.pose_status_mut(kind, id)? = approved;
    let pose = session.state.ledger.activate(kind, id);

    let mut notes = format!("{id} active (generation {})", pose.generation);
    if !superseded.is_empty() {
        notes.push_str(&format!("; superseded {}", superseded.join(", ")));
    }
    if let Some(sol) = revoked_solution {
        notes.push_str(&format!("; revoked solution {sol}"));
    }
    debug!("{notes}");
    session.log_success_with_notes("approve_pose", notes);
    Ok(pose)
}

fn active_pose_seed(session: &Session, scan: &TrackingScan) -> Result<RigidTransform> {
    let (pose, transform) = session.state.active_transform()?;
    debug!(
        "seeding tracking from {} (generation {})",
        pose.id, pose.generation
    );
    Ok(seed_from_pose(
        &transform,
        &scan.transducer_in_photoscan,
        scan.photoscan.units,
    )?)
}

fn reject_pose(session: &mut Session, kind: PoseKind, id: &str) -> Result<()> {
    let status = session.state.pose_status_mut(kind, id)?;
    *status = status.transition(ApprovalStatus::Rejected)?;
    session.log_success_with_notes("reject_pose", id);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Registration Steps
// ─────────────────────────────────────────────────────────────────────────────

/// Search ranked transducer placements for a target.
///
/// Earlier pending candidates are superseded (rejected); an approved pose is
/// left in place until another one is approved.
pub fn step_virtual_fit(
    session: &mut Session,
    target_id: &str,
    opts: Option<VirtualFitStepOptions>,
) -> Result<()> {
    session.validate()?;
    let opts = opts.unwrap_or_default();
    let mut vf_opts = session.config.virtual_fit_opts();
    if let Some(n) = opts.max_results {
        vf_opts.max_results = n;
    }
    if let Some(r) = opts.search_radius_mm {
        vf_opts.search_radius_mm = r;
    }

    let run = session.state.runs + 1;
    let input = session.require_input()?;
    let target = input.target(target_id)?;
    let result = virtual_fit(
        &format!("vf{run}"),
        &input.skin,
        &input.transducer,
        target,
        &vf_opts,
    )
    .with_context(|| format!("virtual fit for target '{target_id}' failed"));
    let fits = logged(session, "virtual_fit", result)?;

    session.state.runs = run;
    let superseded = supersede_pending_fits(&mut session.state.virtual_fits)?;
    let notes = match fits.first() {
        Some(best) => format!(
            "target {target_id}: {} candidates, best {} (score {:.3}, tilt {:.0} deg); \
             {superseded} superseded",
            fits.len(),
            best.id,
            best.score.map_or(0.0, |s| s.total),
            best.tilt_deg
        ),
        None => format!("target {target_id}: no candidates"),
    };
    session.state.virtual_fits.extend(fits);
    session.log_success_with_notes("virtual_fit", notes);
    Ok(())
}

/// Record an operator-placed transducer pose as a pending virtual fit.
pub fn step_manual_fit(
    session: &mut Session,
    target_id: &str,
    transform: RigidTransform,
) -> Result<String> {
    session.validate()?;
    session.require_input()?.target(target_id)?;
    let run = session.state.runs + 1;
    let id = format!("vf{run}-manual");
    let fit = manual_fit(&id, target_id, transform)?;

    session.state.runs = run;
    supersede_pending_fits(&mut session.state.virtual_fits)?;
    session.state.virtual_fits.push(fit);
    session.log_success_with_notes("manual_fit", format!("{id} for target {target_id}"));
    Ok(id)
}

/// Register a photoscan and store the pending tracking result.
///
/// The initial guess is the explicit seed, else the active pose when
/// [`TrackOptions::seed_from_active_pose`] is set, else landmarks or
/// centroid alignment. Low-confidence results are stored and flagged, never
/// rejected.
pub fn step_track(
    session: &mut Session,
    scan: &TrackingScan,
    opts: Option<TrackOptions>,
) -> Result<String> {
    session.validate()?;
    let opts = opts.unwrap_or_default();
    let mut tracking_opts = session.config.tracking_opts();
    if let Some(t) = opts.confidence_threshold {
        tracking_opts.confidence_threshold = t;
    }

    let from_active_pose = opts.seed.is_none() && opts.seed_from_active_pose;
    let seed = match opts.seed {
        Some(seed) => Some(seed),
        None if from_active_pose => {
            let seeded = active_pose_seed(session, scan);
            Some(logged(session, "track", seeded)?)
        }
        None => None,
    };

    let run = session.state.runs + 1;
    let id = format!("trk{run}");
    let input = session.require_input()?;
    let tracking_input = TrackingInput {
        photoscan: &scan.photoscan,
        skin: &input.skin,
        transducer_in_photoscan: &scan.transducer_in_photoscan,
        seed: seed.as_ref(),
        photoscan_landmarks: scan.landmarks.as_ref(),
        skin_landmarks: input.skin_landmarks.as_ref(),
    };
    let result = register_tracking(&id, &tracking_input, &tracking_opts)
        .with_context(|| format!("tracking of photoscan '{}' failed", scan.photoscan.id));
    let tracked = logged(session, "track", result)?;

    let mut notes = format!(
        "{id}: confidence {:.3}, rms {:.3} mm, coverage {:.2}, {} iterations ({:?})",
        tracked.confidence,
        tracked.rms_residual_mm,
        tracked.coverage,
        tracked.iterations,
        tracked.phase
    );
    if tracked.low_confidence {
        notes.push_str(", low confidence");
    }
    if from_active_pose {
        notes.push_str(", seeded from the active pose");
    }
    if let Some(fit) = session.state.approved_virtual_fit() {
        let d = distance_to_virtual_fit(&tracked.transform()?, &fit.transform);
        notes.push_str(&format!(", {d:.1} mm from {}", fit.id));
    }
    session.state.runs = run;
    session.state.tracking.push(tracked);
    session.log_success_with_notes("track", notes);
    Ok(id)
}

// ─────────────────────────────────────────────────────────────────────────────
// Pose Approval
// ─────────────────────────────────────────────────────────────────────────────

/// Make a virtual fit the active pose, superseding any approved pose.
pub fn approve_virtual_fit(session: &mut Session, id: &str) -> Result<PoseRef> {
    approve_pose(session, PoseKind::VirtualFit, id)
}

/// Reject a pending virtual fit.
pub fn reject_virtual_fit(session: &mut Session, id: &str) -> Result<()> {
    reject_pose(session, PoseKind::VirtualFit, id)
}

/// Make a tracking result the active pose, superseding any approved pose.
///
/// Low-confidence results may be approved; that is the operator's call.
pub fn approve_tracking(session: &mut Session, id: &str) -> Result<PoseRef> {
    if session.state.tracking_result(id)?.low_confidence {
        warn!("approving low-confidence tracking result {id}");
    }
    approve_pose(session, PoseKind::Tracking, id)
}

/// Reject a pending tracking result.
pub fn reject_tracking(session: &mut Session, id: &str) -> Result<()> {
    reject_pose(session, PoseKind::Tracking, id)
}

/// Revoke the active pose and any solution approved against it.
pub fn revoke_pose(session: &mut Session) -> Result<()> {
    let Some(active) = session.state.ledger.active_pose.clone() else {
        bail!("no pose is approved");
    };
    let status = session.state.pose_status_mut(active.kind, &active.id)?;
    *status = status.transition(ApprovalStatus::Revoked)?;
    let revoked_solution = revoke_approved_solution(session)?;
    session.state.ledger.clear();

    let mut notes = format!("{} revoked", active.id);
    if let Some(sol) = revoked_solution {
        notes.push_str(&format!("; revoked solution {sol}"));
    }
    session.log_success_with_notes("revoke_pose", notes);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Planning Steps
// ─────────────────────────────────────────────────────────────────────────────

/// Compute a pending solution for `target_id` against the active pose.
///
/// The previous solution moves to the history; if it was approved it is
/// revoked.
pub fn step_plan(session: &mut Session, target_id: &str, opts: Option<PlanOptions>) -> Result<()> {
    session.validate()?;
    let opts = opts.unwrap_or_default();
    let solver = session.config.solver_opts();
    let (pose_ref, pose) = session.state.active_transform()?;

    let run = session.state.runs + 1;
    let id = format!("sol{run}");
    let input = session.require_input()?;
    let target = input.target(target_id)?;
    let skin_constrained = input
        .protocol
        .constraint_for(SafetyQuantity::TargetSkinDistance)
        .is_some();
    let skin_distance =
        opts.skin_distance.unwrap_or(session.config.skin_distance) || skin_constrained;
    let result = compute_solution(&SolutionRequest {
        id: &id,
        pose_ref: &pose_ref,
        pose: &pose,
        target,
        protocol: &input.protocol,
        transducer: &input.transducer,
        skin: skin_distance.then_some(&input.skin),
        options: &solver,
    })
    .with_context(|| format!("planning target '{target_id}' failed"));
    let mut solution = logged(session, "plan", result)?;
    solution.created_at = current_timestamp();

    let notes = format!(
        "{id}: target {target_id} on {} (generation {}), {} points, {} warnings, {} fatal",
        pose_ref.id,
        pose_ref.generation,
        solution.points.len(),
        solution.analysis.warnings,
        solution.analysis.fatals
    );
    session.state.runs = run;
    if let Some(mut previous) = session.set_output(solution) {
        if previous.status.is_approved() {
            previous.status = previous.status.transition(ApprovalStatus::Revoked)?;
            session.state.ledger.approved_solution = None;
        }
        session.state.solution_history.push(previous);
    }
    session.log_success_with_notes("plan", notes);
    Ok(())
}

fn reanalysis(session: &Session, protocol: Option<&Protocol>) -> Result<Solution> {
    session.validate()?;
    let protocol = match protocol {
        Some(p) => {
            p.validate().context("invalid protocol")?;
            p
        }
        None => &session.require_input()?.protocol,
    };
    Ok(reanalyze(session.require_output()?, protocol)?)
}

/// Re-validate the current solution, optionally against a new protocol.
///
/// Only the constraints are re-applied; delays and apodizations are kept, so
/// a new protocol must match the pulse, sequence and methods the solution
/// was solved with. It then replaces the session protocol. An approved
/// solution that now has a fatal finding or a warning the operator did not
/// acknowledge is revoked.
pub fn step_reanalyze(session: &mut Session, protocol: Option<Protocol>) -> Result<()> {
    let checked = reanalysis(session, protocol.as_ref());
    let mut updated = logged(session, "reanalyze", checked)?;
    if let Some(protocol) = protocol {
        session.require_input_mut()?.protocol = protocol;
    }

    let mut notes = format!(
        "{} under {}: {} warnings, {} fatal",
        updated.id, updated.protocol_id, updated.analysis.warnings, updated.analysis.fatals
    );
    let unacknowledged = updated.unacknowledged_warnings();
    if updated.status.is_approved() && (updated.has_fatal() || unacknowledged > 0) {
        updated.status = updated.status.transition(ApprovalStatus::Revoked)?;
        session.state.ledger.approved_solution = None;
        warn!(
            "solution {} revoked on re-analysis: {} fatal, {} unacknowledged warnings",
            updated.id, updated.analysis.fatals, unacknowledged
        );
        notes.push_str("; approval revoked");
    }
    session.set_output(updated);
    session.log_success_with_notes("reanalyze", notes);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Solution Approval
// ─────────────────────────────────────────────────────────────────────────────

fn check_solution_approval(session: &Session, acknowledge_warnings: bool) -> Result<()> {
    let solution = session.require_output()?;
    solution.status.transition(ApprovalStatus::Approved)?;
    session.state.ledger.ensure_current(&solution.pose)?;
    if solution.analysis.fatals > 0 {
        return Err(PlanningError::FatalFindings(solution.analysis.fatals).into());
    }
    if solution.analysis.requires_acknowledgement && !acknowledge_warnings {
        return Err(PlanningError::WarningsNotAcknowledged(solution.analysis.warnings).into());
    }
    Ok(())
}

/// Approve the current solution.
///
/// Refused with [`PlanningError::StalePose`] if its pose is no longer the
/// active one, [`PlanningError::FatalFindings`] if any finding is fatal, and
/// [`PlanningError::WarningsNotAcknowledged`] if it has warnings and
/// `acknowledge_warnings` is false.
pub fn approve_solution(session: &mut Session, acknowledge_warnings: bool) -> Result<()> {
    let checked = check_solution_approval(session, acknowledge_warnings);
    logged(session, "approve_solution", checked)?;

    let solution = session.require_output_mut()?;
    let acknowledged: Vec<Finding> = solution
        .findings()
        .filter(|f| f.severity == Severity::Warning)
        .cloned()
        .collect();
    solution.acknowledged_warnings = acknowledged;
    solution.status = ApprovalStatus::Approved;
    let id = solution.id.clone();
    let warnings = solution.analysis.warnings;
    session.state.ledger.approved_solution = Some(id.clone());
    let notes = if warnings > 0 {
        format!("{id} approved with {warnings} acknowledged warnings")
    } else {
        format!("{id} approved")
    };
    session.log_success_with_notes("approve_solution", notes);
    Ok(())
}

/// Reject the current pending solution.
pub fn reject_solution(session: &mut Session) -> Result<()> {
    let solution = session.require_output_mut()?;
    solution.status = solution.status.transition(ApprovalStatus::Rejected)?;
    let id = solution.id.clone();
    session.log_success_with_notes("reject_solution", id);
    Ok(())
}

/// Withdraw approval of the current solution.
pub fn revoke_solution(session: &mut Session) -> Result<()> {
    let solution = session.require_output_mut()?;
    solution.status = solution.status.transition(ApprovalStatus::Revoked)?;
    let id = solution.id.clone();
    session.state.ledger.approved_solution = None;
    session.log_success_with_notes("revoke_solution", id);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Hand-off
// ─────────────────────────────────────────────────────────────────────────────

fn check_handoff(session: &Session) -> Result<()> {
    let solution = session.require_output()?;
    if !session.state.ledger.is_current(&solution.pose) {
        return Err(PlanningError::HandoffRefused(format!(
            "pose {} of solution {} is no longer active",
            solution.pose.id, solution.id
        ))
        .into());
    }
    Ok(())
}

/// Export the approved solution for the hardware and record the export.
pub fn step_handoff(session: &mut Session, notes: Option<String>) -> Result<HardwareHandoff> {
    let checked = check_handoff(session);
    logged(session, "handoff", checked)?;
    let exported = session.export(notes);
    let handoff = logged(session, "handoff", exported)?;
    session.log_success_with_notes(
        "handoff",
        format!("{}: {} points", handoff.solution_id, handoff.points.len()),
    );
    Ok(handoff)
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline Function
// ─────────────────────────────────────────────────────────────────────────────

/// Run a virtual fit for `target_id` and return the new candidate ids, best
/// first.
///
/// Every candidate stays pending. The operator picks one with
/// [`approve_virtual_fit`] before [`step_plan`].
pub fn run_virtual_fit(session: &mut Session, target_id: &str) -> Result<Vec<String>> {
    step_virtual_fit(session, target_id, None)?;
    let prefix = format!("vf{}-", session.state.runs);
    let mut ranked: Vec<&VirtualFitResult> = session
        .state
        .virtual_fits
        .iter()
        .filter(|r| r.id.starts_with(&prefix) && r.status == ApprovalStatus::Pending)
        .collect();
    if ranked.is_empty() {
        return Err(PlanningError::NoFeasibleFit(format!("target '{target_id}'")).into());
    }
    ranked.sort_by_key(|r| r.rank);
    Ok(ranked.into_iter().map(|r| r.id.clone()).collect())
}
