//! Virtual fit: an initial transducer pose from the skin surface alone.
//!
//! Candidate placements put the centre of the transducer's contact surface
//! on a skin vertex near the target, with the beam axis tilted away from the
//! inward skin normal by a swept angle and azimuth. Each candidate is scored
//! by how well the contact surface sits on the skin and by how directly the
//! axis points at the target. Feasible candidates are ranked, best first.

use fus_core::{
    ApprovalStatus, Frame, Mat3, PlanResult, PlanningError, PointGrid, Pt3, Real,
    RigidTransform, SkinSurfaceMesh, Target, TransducerModel, Vec3, build_iso, plane_basis,
};
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Search space and scoring weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualFitOptions {
    /// Anchors are skin vertices within this distance of the entry point.
    pub search_radius_mm: Real,
    pub max_anchors: usize,
    pub min_tilt_deg: Real,
    pub max_tilt_deg: Real,
    pub tilt_step_deg: Real,
    pub azimuth_step_deg: Real,
    /// Gap between the contact surface and the skin along the axis.
    pub min_standoff_mm: Real,
    pub max_standoff_mm: Real,
    pub standoff_step_mm: Real,
    /// Contact samples within this distance of the nominal gap count as
    /// touching.
    pub contact_tolerance_mm: Real,
    pub min_contact_fraction: Real,
    pub contact_weight: Real,
    pub angle_weight: Real,
    pub max_results: usize,
}

impl Default for VirtualFitOptions {
    fn default() -> Self {
        Self {
            search_radius_mm: 25.0,
            max_anchors: 32,
            min_tilt_deg: 0.0,
            max_tilt_deg: 20.0,
            tilt_step_deg: 5.0,
            azimuth_step_deg: 45.0,
            min_standoff_mm: 0.0,
            max_standoff_mm: 0.0,
            standoff_step_mm: 1.0,
            contact_tolerance_mm: 3.0,
            min_contact_fraction: 0.6,
            contact_weight: 1.0,
            angle_weight: 1.0,
            max_results: 10,
        }
    }
}

/// Score breakdown of a fitted candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitScore {
    pub contact: Real,
    pub angle: Real,
    pub total: Real,
}

/// Transducer placement proposed without photographs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualFitResult {
    pub id: String,
    pub target_id: String,
    /// Transducer → patient.
    pub transform: RigidTransform,
    /// 1 is best.
    pub rank: usize,
    /// `None` for operator placements.
    pub score: Option<FitScore>,
    pub tilt_deg: Real,
    pub azimuth_deg: Real,
    pub standoff_mm: Real,
    pub manual: bool,
    #[serde(default)]
    pub status: ApprovalStatus,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    /// Position in the anchor list (closest to the entry point first).
    anchor_order: usize,
    anchor: usize,
    tilt_deg: Real,
    azimuth_deg: Real,
    standoff_mm: Real,
}

#[derive(Debug, Clone, PartialEq)]
struct Scored {
    candidate: Candidate,
    transform: RigidTransform,
    score: FitScore,
}

fn sweep(min: Real, max: Real, step: Real) -> Option<Vec<Real>> {
    if !(min.is_finite() && max.is_finite()) || min > max {
        return None;
    }
    if step <= 0.0 || max - min < 1e-9 {
        return Some(vec![min]);
    }
    let n = ((max - min) / step + 1e-9).floor() as usize;
    Some((0..=n).map(|k| min + k as Real * step).collect())
}

fn azimuths(step_deg: Real) -> Vec<Real> {
    if step_deg <= 0.0 || step_deg >= 360.0 {
        return vec![0.0];
    }
    let n = (360.0 / step_deg - 1e-9).ceil() as usize;
    (0..n).map(|k| k as Real * step_deg).collect()
}

/// Skin vertex where the beam would enter for `target`.
///
/// Without an approach direction this is the closest skin vertex; with one
/// it is the vertex closest to the ray running back from the target against
/// the approach.
fn entry_vertex(skin: &[Pt3], target: &Pt3, approach: Option<Vec3>) -> Option<usize> {
    let dist = |v: &Pt3| {
        let w = v - target;
        match approach {
            Some(a) => {
                let s = -w.dot(&a);
                if s <= 0.0 { w.norm() } else { (w + a * s).norm() }
            }
            None => w.norm(),
        }
    };
    skin.iter()
        .enumerate()
        .map(|(i, v)| (i, dist(v)))
        .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
        .map(|(i, _)| i)
}

struct FitContext<'a> {
    skin: &'a [Pt3],
    normals: Vec<Vec3>,
    grid: PointGrid,
    contact: Vec<Pt3>,
    contact_center: Pt3,
    target: Pt3,
    opts: &'a VirtualFitOptions,
}

impl FitContext<'_> {
    fn pose(&self, c: &Candidate) -> RigidTransform {
        let n = self.normals[c.anchor];
        let (e1, e2) = plane_basis(&n, &Vec3::z());
        let (tilt, az) = (c.tilt_deg.to_radians(), c.azimuth_deg.to_radians());
        let axis = (-n * tilt.cos() + (e1 * az.cos() + e2 * az.sin()) * tilt.sin()).normalize();
        let (x, y) = plane_basis(&axis, &Vec3::z());
        let r = Mat3::from_columns(&[x, y, axis]);
        let anchor = self.skin[c.anchor];
        let origin = anchor - axis * c.standoff_mm - r * self.contact_center.coords;
        RigidTransform::from_iso(Frame::Transducer, Frame::Patient, build_iso(r, origin.coords))
    }

    fn evaluate(&self, c: &Candidate) -> Option<Scored> {
        let opts = self.opts;
        let transform = self.pose(c);
        let axis = transform.apply_vector(&Vec3::z());
        let origin = transform.apply_point(&Pt3::origin());
        let to_target = self.target - origin;
        if to_target.dot(&axis) <= 0.0 {
            return None;
        }

        let mut touching = 0usize;
        let mut abs_gap = 0.0;
        for p in &self.contact {
            let q = transform.apply_point(p);
            let (v, _) = self.grid.nearest(&q, None)?;
            let gap = (q - self.skin[v]).dot(&self.normals[v]) - c.standoff_mm;
            if gap < -opts.contact_tolerance_mm {
                debug!("virtual fit: anchor {} tilt {:.1} penetrates skin", c.anchor, c.tilt_deg);
                return None;
            }
            if gap.abs() <= opts.contact_tolerance_mm {
                touching += 1;
            }
            abs_gap += gap.abs();
        }
        let m = self.contact.len() as Real;
        let fraction = touching as Real / m;
        if fraction < opts.min_contact_fraction {
            return None;
        }
        let contact = fraction / (1.0 + abs_gap / m / opts.contact_tolerance_mm.max(1e-9));
        let angle = to_target.normalize().dot(&axis);
        Some(Scored {
            candidate: *c,
            transform,
            score: FitScore {
                contact,
                angle,
                total: opts.contact_weight * contact + opts.angle_weight * angle,
            },
        })
    }
}

/// Best first: total score, then smaller tilt, then anchor closer to the
/// entry point, then azimuth and standoff.
fn rank_candidates(mut scored: Vec<Scored>) -> Vec<Scored> {
    scored.sort_by(|a, b| {
        b.score
            .total
            .total_cmp(&a.score.total)
            .then(a.candidate.tilt_deg.total_cmp(&b.candidate.tilt_deg))
            .then(a.candidate.anchor_order.cmp(&b.candidate.anchor_order))
            .then(a.candidate.azimuth_deg.total_cmp(&b.candidate.azimuth_deg))
            .then(a.candidate.standoff_mm.total_cmp(&b.candidate.standoff_mm))
    });
    scored
}

/// Search transducer placements on `skin` for `target`.
///
/// Returns up to `max_results` unapproved results ranked best first, with
/// ids `"{id_prefix}-{rank}"`. Fails with [`PlanningError::NoFeasibleFit`]
/// when the search space is empty or no candidate meets the contact and
/// geometry requirements.
pub fn virtual_fit(
    id_prefix: &str,
    skin: &SkinSurfaceMesh,
    transducer: &TransducerModel,
    target: &Target,
    opts: &VirtualFitOptions,
) -> PlanResult<Vec<VirtualFitResult>> {
    transducer.validate()?;
    skin.mesh.validate()?;
    let transducer = transducer.in_mm();
    let target_pt = target.position_ras_mm();

    let tilts = sweep(opts.min_tilt_deg, opts.max_tilt_deg, opts.tilt_step_deg)
        .filter(|t| t.iter().all(|v| (0.0..90.0).contains(v)))
        .ok_or_else(|| {
            PlanningError::NoFeasibleFit(format!(
                "tilt range {}..{} deg is empty",
                opts.min_tilt_deg, opts.max_tilt_deg
            ))
        })?;
    let standoffs = sweep(opts.min_standoff_mm, opts.max_standoff_mm, opts.standoff_step_mm)
        .filter(|s| s.iter().all(|v| *v >= 0.0))
        .ok_or_else(|| {
            PlanningError::NoFeasibleFit(format!(
                "standoff range {}..{} mm is empty",
                opts.min_standoff_mm, opts.max_standoff_mm
            ))
        })?;

    let vertices = &skin.mesh.vertices;
    let grid = PointGrid::new(vertices);
    let entry = entry_vertex(vertices, &target_pt, target.approach_ras()).ok_or_else(|| {
        PlanningError::NoFeasibleFit("skin surface has no vertices".into())
    })?;
    let mut anchors = grid.within(&vertices[entry], opts.search_radius_mm);
    anchors.sort_by(|&a, &b| {
        let da = (vertices[a] - vertices[entry]).norm();
        let db = (vertices[b] - vertices[entry]).norm();
        da.total_cmp(&db).then(a.cmp(&b))
    });
    anchors.truncate(opts.max_anchors.max(1));

    // Normals face away from the target.
    let normals: Vec<Vec3> = skin
        .mesh
        .vertex_normals()
        .into_iter()
        .zip(vertices)
        .map(|(n, v)| {
            let n = if n.norm() > 0.0 { n } else { (v - target_pt).normalize() };
            if (v - target_pt).dot(&n) < 0.0 { -n } else { n }
        })
        .collect();

    let ctx = FitContext {
        skin: vertices,
        normals,
        grid,
        contact: transducer.contact_surface.clone(),
        contact_center: transducer.contact_center(),
        target: target_pt,
        opts,
    };

    let azimuth_sweep = azimuths(opts.azimuth_step_deg);
    let mut candidates = Vec::new();
    for (anchor_order, &anchor) in anchors.iter().enumerate() {
        for &tilt_deg in &tilts {
            let az: &[Real] = if tilt_deg == 0.0 { &[0.0] } else { &azimuth_sweep };
            for &azimuth_deg in az {
                for &standoff_mm in &standoffs {
                    candidates.push(Candidate {
                        anchor_order,
                        anchor,
                        tilt_deg,
                        azimuth_deg,
                        standoff_mm,
                    });
                }
            }
        }
    }

    let scored: Vec<Scored> = candidates.par_iter().filter_map(|c| ctx.evaluate(c)).collect();
    debug!(
        "virtual fit for target {}: {} of {} candidates feasible",
        target.id,
        scored.len(),
        candidates.len()
    );
    if scored.is_empty() {
        return Err(PlanningError::NoFeasibleFit(format!(
            "none of {} candidate placements near target '{}' meets the contact requirement",
            candidates.len(),
            target.id
        )));
    }

    Ok(rank_candidates(scored)
        .into_iter()
        .take(opts.max_results.max(1))
        .enumerate()
        .map(|(i, s)| VirtualFitResult {
            id: format!("{id_prefix}-{}", i + 1),
            target_id: target.id.clone(),
            transform: s.transform,
            rank: i + 1,
            score: Some(s.score),
            tilt_deg: s.candidate.tilt_deg,
            azimuth_deg: s.candidate.azimuth_deg,
            standoff_mm: s.candidate.standoff_mm,
            manual: false,
            status: ApprovalStatus::Pending,
        })
        .collect())
}

/// Operator-placed transducer pose.
pub fn manual_fit(
    id: &str,
    target_id: &str,
    transform: RigidTransform,
) -> PlanResult<VirtualFitResult> {
    if transform.from_frame() != Frame::Transducer || transform.to_frame() != Frame::Patient {
        return Err(PlanningError::InvalidTransform(format!(
            "manual fit must map transducer→patient, got {}→{}",
            transform.from_frame(),
            transform.to_frame()
        )));
    }
    Ok(VirtualFitResult {
        id: id.to_string(),
        target_id: target_id.to_string(),
        transform,
        rank: 1,
        score: None,
        tilt_deg: 0.0,
        azimuth_deg: 0.0,
        standoff_mm: 0.0,
        manual: true,
        status: ApprovalStatus::Pending,
    })
}

/// Distance between the transducer origins of two poses (mm).
pub fn distance_to_virtual_fit(tracked: &RigidTransform, fitted: &RigidTransform) -> Real {
    (tracked.translation() - fitted.translation()).norm()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fus_core::synthetic::arrays::planar_array;
    use fus_core::synthetic::meshes::ellipsoid;

    fn sphere_skin() -> SkinSurfaceMesh {
        SkinSurfaceMesh::new(ellipsoid(Pt3::origin(), Vec3::repeat(80.0), 48, 96)).unwrap()
    }

    #[test]
    fn best_fit_sits_over_target() {
        let skin = sphere_skin();
        let transducer = planar_array(8, 8, 4.0, 10.0);
        let target = Target::new("t1", Pt3::new(0.0, 0.0, 40.0));
        let opts = VirtualFitOptions::default();
        let fits = virtual_fit("vf", &skin, &transducer, &target, &opts).unwrap();
        assert!(!fits.is_empty() && fits.len() <= opts.max_results);
        let best = &fits[0];
        assert_eq!(best.rank, 1);
        assert_eq!(best.id, "vf-1");
        assert_eq!(best.status, ApprovalStatus::Pending);
        assert!(best.score.unwrap().angle > 0.99);

        // The contact centre rests on the skin above the target.
        let contact = best.transform.apply_point(&transducer.contact_center());
        assert!((contact.coords.norm() - 80.0).abs() < 1e-6);
        assert!(contact.z > 75.0);
        let axis = best.transform.apply_vector(&Vec3::z());
        assert!(axis.z < -0.95);

        assert!(fits.windows(2).all(|w| {
            let (a, b) = (w[0].score.unwrap(), w[1].score.unwrap());
            a.total >= b.total
        }));
    }

    #[test]
    fn search_is_deterministic() {
        let skin = sphere_skin();
        let transducer = planar_array(6, 6, 4.0, 10.0);
        let target = Target::new("t1", Pt3::new(20.0, 10.0, 30.0));
        let opts = VirtualFitOptions::default();
        let a = virtual_fit("vf", &skin, &transducer, &target, &opts).unwrap();
        let b = virtual_fit("vf", &skin, &transducer, &target, &opts).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_tilt_range_is_infeasible() {
        let skin = sphere_skin();
        let transducer = planar_array(4, 4, 4.0, 10.0);
        let target = Target::new("t1", Pt3::new(0.0, 0.0, 40.0));
        let opts = VirtualFitOptions {
            min_tilt_deg: 30.0,
            max_tilt_deg: 20.0,
            ..VirtualFitOptions::default()
        };
        assert!(matches!(
            virtual_fit("vf", &skin, &transducer, &target, &opts),
            Err(PlanningError::NoFeasibleFit(_))
        ));
        let strict = VirtualFitOptions {
            min_contact_fraction: 1.5,
            ..VirtualFitOptions::default()
        };
        assert!(matches!(
            virtual_fit("vf", &skin, &transducer, &target, &strict),
            Err(PlanningError::NoFeasibleFit(_))
        ));
    }

    #[test]
    fn equal_scores_prefer_smaller_tilt() {
        let make = |anchor_order: usize, tilt_deg: Real| Scored {
            candidate: Candidate {
                anchor_order,
                anchor: anchor_order,
                tilt_deg,
                azimuth_deg: 0.0,
                standoff_mm: 0.0,
            },
            transform: RigidTransform::from_iso(
                Frame::Transducer,
                Frame::Patient,
                fus_core::Iso3::identity(),
            ),
            score: FitScore {
                contact: 0.5,
                angle: 0.5,
                total: 1.0,
            },
        };
        let ranked = rank_candidates(vec![make(0, 10.0), make(2, 0.0), make(1, 0.0)]);
        let order: Vec<(usize, Real)> = ranked
            .iter()
            .map(|s| (s.candidate.anchor_order, s.candidate.tilt_deg))
            .collect();
        assert_eq!(order, vec![(1, 0.0), (2, 0.0), (0, 10.0)]);
    }

    #[test]
    fn manual_fit_checks_frames() {
        let ok = RigidTransform::from_iso(
            Frame::Transducer,
            Frame::Patient,
            fus_core::Iso3::identity(),
        );
        let fit = manual_fit("m1", "t1", ok.clone()).unwrap();
        assert!(fit.manual && fit.score.is_none());
        assert!(manual_fit("m2", "t1", ok.inverse()).is_err());
        assert_eq!(distance_to_virtual_fit(&ok, &fit.transform), 0.0);
    }
}
