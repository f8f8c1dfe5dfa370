//! Intermediate state of a treatment-planning session.

use fus_beamform::{PoseKind, PoseRef, Solution};
use fus_core::{ApprovalStatus, PlanResult, PlanningError, RigidTransform};
use fus_registration::{TrackingResult, VirtualFitResult};
use serde::{Deserialize, Serialize};

/// Which pose is active and which solution is approved.
///
/// `pose_generation` increases on every approval or revocation of a pose.
/// A solution records the [`PoseRef`] it was computed against; it can only be
/// approved while that exact reference is still active.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalLedger {
    pub pose_generation: u64,
    pub active_pose: Option<PoseRef>,
    /// Id of the solution cleared for hand-off.
    pub approved_solution: Option<String>,
}

impl ApprovalLedger {
    /// Make `id` the active pose under a new generation.
    pub fn activate(&mut self, kind: PoseKind, id: &str) -> PoseRef {
        self.pose_generation += 1;
        let pose = PoseRef {
            kind,
            id: id.to_string(),
            generation: self.pose_generation,
        };
        self.active_pose = Some(pose.clone());
        self.approved_solution = None;
        pose
    }

    /// Clear the active pose; returns the one cleared.
    pub fn clear(&mut self) -> Option<PoseRef> {
        self.pose_generation += 1;
        self.approved_solution = None;
        self.active_pose.take()
    }

    /// `pose` is the active pose at the same generation.
    pub fn is_current(&self, pose: &PoseRef) -> bool {
        self.active_pose.as_ref() == Some(pose)
    }

    /// Fail with [`PlanningError::StalePose`] unless `pose` is current.
    pub fn ensure_current(&self, pose: &PoseRef) -> PlanResult<()> {
        if self.is_current(pose) {
            return Ok(());
        }
        let now = match &self.active_pose {
            Some(p) => format!("active pose is {} (generation {})", p.id, p.generation),
            None => "no pose is approved".to_string(),
        };
        Err(PlanningError::StalePose(format!(
            "solution was computed against {} (generation {}); {now}",
            pose.id, pose.generation
        )))
    }
}

/// Results produced so far, including superseded ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreatmentState {
    /// Every virtual fit candidate, ranked within its run.
    pub virtual_fits: Vec<VirtualFitResult>,
    /// Tracking results in the order they were registered.
    pub tracking: Vec<TrackingResult>,
    /// Earlier solutions replaced by a newer plan.
    pub solution_history: Vec<Solution>,
    pub ledger: ApprovalLedger,
    /// Number of completed registration and planning runs; used in ids.
    pub runs: u64,
}

impl TreatmentState {
    /// Virtual fit by id, in any status.
    pub fn virtual_fit(&self, id: &str) -> PlanResult<&VirtualFitResult> {
        self.virtual_fits
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| PlanningError::UnknownResult(format!("virtual fit '{id}'")))
    }

    /// Tracking result by id, in any status.
    pub fn tracking_result(&self, id: &str) -> PlanResult<&TrackingResult> {
        self.tracking
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| PlanningError::UnknownResult(format!("tracking result '{id}'")))
    }

    /// Best-ranked virtual fit still awaiting a decision.
    pub fn best_pending_fit(&self) -> Option<&VirtualFitResult> {
        self.virtual_fits
            .iter()
            .filter(|r| r.status == ApprovalStatus::Pending)
            .min_by_key(|r| r.rank)
    }

    /// The virtual fit currently approved, if any.
    pub fn approved_virtual_fit(&self) -> Option<&VirtualFitResult> {
        self.virtual_fits.iter().find(|r| r.status.is_approved())
    }

    pub(crate) fn pose_status_mut(
        &mut self,
        kind: PoseKind,
        id: &str,
    ) -> PlanResult<&mut ApprovalStatus> {
        let status = match kind {
            PoseKind::VirtualFit => self
                .virtual_fits
                .iter_mut()
                .find(|r| r.id == id)
                .map(|r| &mut r.status),
            PoseKind::Tracking => self
                .tracking
                .iter_mut()
                .find(|r| r.id == id)
                .map(|r| &mut r.status),
        };
        status.ok_or_else(|| PlanningError::UnknownResult(format!("{kind:?} result '{id}'")))
    }

    /// Transducer → patient transform of the active pose.
    pub fn active_transform(&self) -> PlanResult<(PoseRef, RigidTransform)> {
        let pose = self.ledger.active_pose.clone().ok_or_else(|| {
            PlanningError::StalePose("no pose is approved for this session".into())
        })?;
        let transform = match pose.kind {
            PoseKind::VirtualFit => self.virtual_fit(&pose.id)?.transform.clone(),
            PoseKind::Tracking => self.tracking_result(&pose.id)?.transform()?,
        };
        Ok((pose, transform))
    }

    /// Move every approved pose result to `Revoked`.
    pub(crate) fn revoke_approved_poses(&mut self) -> PlanResult<Vec<String>> {
        let mut revoked = Vec::new();
        for r in self.virtual_fits.iter_mut().filter(|r| r.status.is_approved()) {
            r.status = r.status.transition(ApprovalStatus::Revoked)?;
            revoked.push(r.id.clone());
        }
        for r in self.tracking.iter_mut().filter(|r| r.status.is_approved()) {
            r.status = r.status.transition(ApprovalStatus::Revoked)?;
            revoked.push(r.id.clone());
        }
        Ok(revoked)
    }
}
