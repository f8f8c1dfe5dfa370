//! Tracking registration: place the transducer in patient space from a
//! photoscan of the patient wearing it.
//!
//! The result is stored as two transforms, transducer → photoscan (where the
//! transducer was found in the photoscan) and photoscan → patient (surface
//! registration of the photoscan against the skin), and composed on demand.

use fus_core::{
    ApprovalStatus, Frame, Iso3, LengthUnit, PhotoscanMesh, PlanResult, PlanningError, Pt3,
    Real, RigidTransform, SkinSurfaceMesh, compose, invert,
};
use log::{debug, warn};
use nalgebra::{Translation3, UnitQuaternion};
use serde::{Deserialize, Serialize};

use crate::icp::{ConfidenceModel, IcpOptions, IcpPhase, run_icp};
use crate::landmarks::{FacialLandmarks, RoiOptions, facial_roi, register_landmarks};

/// Options for [`register_tracking`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingOptions {
    pub icp: IcpOptions,
    /// Restrict the photoscan to the facial region when landmarks are given.
    pub use_roi: bool,
    pub roi: RoiOptions,
    pub confidence: ConfidenceModel,
    /// Results scoring below this are flagged low-confidence.
    pub confidence_threshold: Real,
}

impl Default for TrackingOptions {
    fn default() -> Self {
        Self {
            icp: IcpOptions::default(),
            use_roi: true,
            roi: RoiOptions::default(),
            confidence: ConfidenceModel::default(),
            confidence_threshold: 0.5,
        }
    }
}

/// Inputs of one tracking registration.
#[derive(Debug, Clone, Copy)]
pub struct TrackingInput<'a> {
    pub photoscan: &'a PhotoscanMesh,
    pub skin: &'a SkinSurfaceMesh,
    /// Transducer pose located in the photoscan (transducer → photoscan),
    /// translation in photoscan units.
    pub transducer_in_photoscan: &'a RigidTransform,
    /// Initial photoscan → patient estimate (mm).
    pub seed: Option<&'a RigidTransform>,
    /// Landmarks picked on the photoscan, in photoscan units.
    pub photoscan_landmarks: Option<&'a FacialLandmarks>,
    /// The same landmarks picked on the skin (mm).
    pub skin_landmarks: Option<&'a FacialLandmarks>,
}

/// Outcome of a tracking registration awaiting operator approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingResult {
    pub id: String,
    pub photoscan_id: String,
    pub transducer_to_photoscan: RigidTransform,
    pub photoscan_to_patient: RigidTransform,
    pub confidence: Real,
    /// Set when `confidence` is below the configured threshold. Such results
    /// may still be approved by the operator.
    pub low_confidence: bool,
    pub rms_residual_mm: Real,
    pub coverage: Real,
    pub iterations: usize,
    pub phase: IcpPhase,
    #[serde(default)]
    pub status: ApprovalStatus,
}

impl TrackingResult {
    /// Transducer → patient pose.
    pub fn transform(&self) -> PlanResult<RigidTransform> {
        compose(&self.transducer_to_photoscan, &self.photoscan_to_patient)
    }
}

fn expect_frames(t: &RigidTransform, from: Frame, to: Frame, what: &str) -> PlanResult<()> {
    if t.from_frame() != from || t.to_frame() != to {
        return Err(PlanningError::InvalidTransform(format!(
            "{what} must map {from}→{to}, got {}→{}",
            t.from_frame(),
            t.to_frame()
        )));
    }
    Ok(())
}

fn scaled(lm: &FacialLandmarks, s: Real) -> FacialLandmarks {
    let f = |p: Pt3| Pt3::from(p.coords * s);
    FacialLandmarks {
        right_ear: f(lm.right_ear),
        nasion: f(lm.nasion),
        left_ear: f(lm.left_ear),
    }
}

/// Photoscan → patient estimate implied by a known transducer pose.
///
/// `transducer_to_patient` is the approved pose (mm) and
/// `transducer_in_photoscan` the transducer located in the photoscan, in
/// `photoscan_units`. Seeding tracking with the result starts the
/// registration where the transducer was last placed.
pub fn seed_from_pose(
    transducer_to_patient: &RigidTransform,
    transducer_in_photoscan: &RigidTransform,
    photoscan_units: LengthUnit,
) -> PlanResult<RigidTransform> {
    expect_frames(
        transducer_to_patient,
        Frame::Transducer,
        Frame::Patient,
        "approved pose",
    )?;
    expect_frames(
        transducer_in_photoscan,
        Frame::Transducer,
        Frame::Photoscan,
        "transducer pose",
    )?;
    let in_mm = transducer_in_photoscan.rescale_translation(photoscan_units.to_mm());
    compose(&invert(&in_mm), transducer_to_patient)
}

/// Register a photoscan against the skin surface and chain the transducer
/// pose found in the photoscan into patient space.
///
/// The initial estimate is, in order of preference, the explicit seed, the
/// landmark fit, or a centroid alignment.
pub fn register_tracking(
    id: &str,
    input: &TrackingInput<'_>,
    opts: &TrackingOptions,
) -> PlanResult<TrackingResult> {
    expect_frames(
        input.transducer_in_photoscan,
        Frame::Transducer,
        Frame::Photoscan,
        "transducer pose",
    )?;
    if let Some(seed) = input.seed {
        expect_frames(seed, Frame::Photoscan, Frame::Patient, "seed")?;
    }
    input.skin.mesh.validate()?;
    let to_mm = input.photoscan.units.to_mm();
    let scan = input.photoscan.in_mm();
    scan.mesh.validate()?;
    let scan_landmarks = input.photoscan_landmarks.map(|lm| scaled(lm, to_mm));

    let initial: Iso3 = match (input.seed, scan_landmarks.as_ref(), input.skin_landmarks) {
        (Some(seed), _, _) => *seed.iso(),
        (None, Some(scan_lm), Some(skin_lm)) => register_landmarks(scan_lm, skin_lm)?.iso,
        _ => {
            let shift = input.skin.mesh.centroid() - scan.mesh.centroid();
            debug!("tracking {id}: no seed or landmarks, aligning centroids");
            Iso3::from_parts(Translation3::from(shift), UnitQuaternion::identity())
        }
    };

    let source = match scan_landmarks.as_ref() {
        Some(lm) if opts.use_roi => facial_roi(&scan.mesh, lm, &opts.roi),
        _ => scan.mesh.clone(),
    };
    let outcome = run_icp(&source, &input.skin.mesh, initial, &opts.icp)?;
    let confidence = opts.confidence.score(&outcome);
    let low_confidence = confidence < opts.confidence_threshold;
    if low_confidence {
        warn!(
            "tracking {id}: low confidence {confidence:.3} < {:.3} (rms {:.3} mm, coverage {:.3})",
            opts.confidence_threshold, outcome.rms_mm, outcome.coverage
        );
    }

    Ok(TrackingResult {
        id: id.to_string(),
        photoscan_id: input.photoscan.id.clone(),
        transducer_to_photoscan: input.transducer_in_photoscan.rescale_translation(to_mm),
        photoscan_to_patient: RigidTransform::from_iso(
            Frame::Photoscan,
            Frame::Patient,
            outcome.transform,
        ),
        confidence,
        low_confidence,
        rms_residual_mm: outcome.rms_mm,
        coverage: outcome.coverage,
        iterations: outcome.iterations,
        phase: outcome.phase,
        status: ApprovalStatus::Pending,
    })
}
