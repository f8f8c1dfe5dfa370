//! Facial landmarks: initial photoscan-to-skin alignment and the facial
//! region of interest used to restrict tracking.

use std::fmt;

use fus_core::{PlanResult, PointGrid, Pt3, Real, TriangleMesh};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::rigid::{RigidFit, fit_rigid};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacialLandmark {
    RightEar,
    Nasion,
    LeftEar,
}

impl fmt::Display for FacialLandmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FacialLandmark::RightEar => "right_ear",
            FacialLandmark::Nasion => "nasion",
            FacialLandmark::LeftEar => "left_ear",
        };
        f.write_str(s)
    }
}

/// The three landmarks picked on one surface, in that surface's frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FacialLandmarks {
    pub right_ear: Pt3,
    pub nasion: Pt3,
    pub left_ear: Pt3,
}

impl FacialLandmarks {
    pub fn get(&self, landmark: FacialLandmark) -> Pt3 {
        match landmark {
            FacialLandmark::RightEar => self.right_ear,
            FacialLandmark::Nasion => self.nasion,
            FacialLandmark::LeftEar => self.left_ear,
        }
    }

    /// Points ordered right ear, nasion, left ear.
    pub fn points(&self) -> [Pt3; 3] {
        [self.right_ear, self.nasion, self.left_ear]
    }

    /// Points spaced evenly by arc length along right ear → nasion → left ear,
    /// endpoints included.
    pub fn path(&self, count: usize) -> Vec<Pt3> {
        let count = count.max(2);
        let first = (self.nasion - self.right_ear).norm();
        let second = (self.left_ear - self.nasion).norm();
        let total = first + second;
        (0..count)
            .map(|i| {
                let s = total * i as Real / (count - 1) as Real;
                if s <= first && first > 0.0 {
                    self.right_ear + (self.nasion - self.right_ear) * (s / first)
                } else if second > 0.0 {
                    let u = ((s - first) / second).clamp(0.0, 1.0);
                    self.nasion + (self.left_ear - self.nasion) * u
                } else {
                    self.nasion
                }
            })
            .collect()
    }
}

/// Rigid fit mapping `source` landmarks onto `target` landmarks.
///
/// The uniform scale between the two triples is reported in the fit but not
/// applied.
pub fn register_landmarks(
    source: &FacialLandmarks,
    target: &FacialLandmarks,
) -> PlanResult<RigidFit> {
    let fit = fit_rigid(&source.points(), &target.points(), None)?;
    debug!(
        "landmark fit: rms {:.3} mm, scale {:.4}",
        fit.rms_mm, fit.scale
    );
    Ok(fit)
}

/// Facial region-of-interest settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoiOptions {
    /// Points sampled along the landmark path.
    pub path_points: usize,
    /// Vertices within this distance of a snapped path point are kept.
    pub radius_mm: Real,
}

impl Default for RoiOptions {
    fn default() -> Self {
        Self {
            path_points: 8,
            radius_mm: 40.0,
        }
    }
}

/// Restrict `mesh` to the band of vertices around the landmark path.
///
/// Each path point is snapped to its closest vertex; every vertex within
/// `radius_mm` of a snapped point is kept, together with the triangles
/// fully inside the selection.
pub fn facial_roi(
    mesh: &TriangleMesh,
    landmarks: &FacialLandmarks,
    opts: &RoiOptions,
) -> TriangleMesh {
    let grid = PointGrid::new(&mesh.vertices);
    let mut keep = vec![false; mesh.num_vertices()];
    for p in landmarks.path(opts.path_points) {
        let Some((snap, _)) = grid.nearest(&p, None) else {
            continue;
        };
        for i in grid.within(&mesh.vertices[snap], opts.radius_mm) {
            keep[i] = true;
        }
    }
    let roi = mesh.submesh(&keep);
    debug!(
        "facial ROI keeps {} of {} vertices",
        roi.num_vertices(),
        mesh.num_vertices()
    );
    roi
}

#[cfg(test)]
mod tests {
    use super::*;
    use fus_core::synthetic::meshes::head_surface;
    use fus_core::test_utils::{make_iso, pose_error};

    fn skin_landmarks() -> FacialLandmarks {
        FacialLandmarks {
            right_ear: Pt3::new(75.0, 0.0, 0.0),
            nasion: Pt3::new(0.0, 95.0, 0.0),
            left_ear: Pt3::new(-75.0, 0.0, 0.0),
        }
    }

    #[test]
    fn path_hits_landmarks_and_is_evenly_spaced() {
        let lm = skin_landmarks();
        let path = lm.path(8);
        assert_eq!(path.len(), 8);
        assert!((path[0] - lm.right_ear).norm() < 1e-9);
        assert!((path[7] - lm.left_ear).norm() < 1e-9);
        let steps: Vec<Real> = path.windows(2).map(|w| (w[1] - w[0]).norm()).collect();
        // Steps across the nasion corner are shorter as chords.
        assert!(steps.iter().all(|s| *s <= steps[0] + 1e-9));
    }

    #[test]
    fn landmark_registration_recovers_pose() {
        let truth = make_iso((0.1, -0.2, 0.4), (10.0, -5.0, 3.0));
        let skin = skin_landmarks();
        let inv = truth.inverse();
        let scan = FacialLandmarks {
            right_ear: inv.transform_point(&skin.right_ear),
            nasion: inv.transform_point(&skin.nasion),
            left_ear: inv.transform_point(&skin.left_ear),
        };
        let fit = register_landmarks(&scan, &skin).unwrap();
        let (rot_deg, trans) = pose_error(&fit.iso, &truth);
        assert!(rot_deg < 1e-8 && trans < 1e-8);
    }

    #[test]
    fn roi_is_a_band_around_the_face() {
        let head = head_surface();
        let roi = facial_roi(&head, &skin_landmarks(), &RoiOptions::default());
        assert!(roi.num_vertices() > 0);
        assert!(roi.num_vertices() < head.num_vertices());
        // Back of the head is far from every path point.
        assert!(roi.vertices.iter().all(|v| v.y > -60.0));
    }
}
