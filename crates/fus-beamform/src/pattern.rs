//! Expansion of a target into the focal points that are sonicated.

use fus_core::{
    FocalPattern, Frame, PlanResult, PlanningError, Pt3, Real, RigidTransform, Target, Vec3,
    plane_basis,
};
use serde::{Deserialize, Serialize};

/// One point the array focuses on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocalPoint {
    pub index: usize,
    /// `"center"` or `"spoke-k"` (1-based).
    pub label: String,
    /// Position in transducer space (mm).
    pub transducer: Pt3,
    /// Position in patient space (RAS mm).
    pub patient: Pt3,
}

/// Expand `target` under `pattern` for a transducer at `pose`.
///
/// Wheel spokes lie in the plane perpendicular to the approach direction
/// (the target's own approach if it has one, otherwise from the transducer
/// origin to the target). Spoke 1 points along the in-plane projection of
/// the transducer x axis and the rest follow counter-clockwise about the
/// approach direction.
pub fn focal_points(
    target: &Target,
    pattern: &FocalPattern,
    pose: &RigidTransform,
) -> PlanResult<Vec<FocalPoint>> {
    pattern.validate()?;
    if pose.from_frame() != Frame::Transducer || pose.to_frame() != Frame::Patient {
        return Err(PlanningError::InvalidTransform(format!(
            "focal points need a transducer→patient pose, got {}→{}",
            pose.from_frame(),
            pose.to_frame()
        )));
    }
    let to_transducer = pose.inverse();
    let center = target.position_ras_mm();
    let point = |index: usize, label: String, patient: Pt3| FocalPoint {
        index,
        label,
        transducer: to_transducer.apply_point(&patient),
        patient,
    };

    match *pattern {
        FocalPattern::SinglePoint => Ok(vec![point(0, "center".into(), center)]),
        FocalPattern::Wheel {
            include_center,
            num_spokes,
            spoke_radius_mm,
        } => {
            let approach = approach_direction(target, pose);
            let (e1, e2) = plane_basis(&approach, &pose.apply_vector(&Vec3::x()));
            let mut out = Vec::with_capacity(pattern.num_points());
            if include_center {
                out.push(point(0, "center".into(), center));
            }
            for k in 0..num_spokes {
                let theta = std::f64::consts::TAU * k as Real / num_spokes as Real;
                let offset = (e1 * theta.cos() + e2 * theta.sin()) * spoke_radius_mm;
                out.push(point(out.len(), format!("spoke-{}", k + 1), center + offset));
            }
            Ok(out)
        }
    }
}

fn approach_direction(target: &Target, pose: &RigidTransform) -> Vec3 {
    if let Some(a) = target.approach_ras() {
        return a;
    }
    let d = target.position_ras_mm() - pose.apply_point(&Pt3::origin());
    if d.norm() > 1e-9 {
        d.normalize()
    } else {
        pose.apply_vector(&Vec3::z())
    }
}
