//! Coarse acoustic field estimate at a focal point.
//!
//! This is not a wave simulation. With delays aligned, every element's
//! contribution arrives in phase at the focus, so the focal pressure is the
//! sum of the per-element amplitudes after spherical spreading and
//! attenuation. The remaining metrics are derived from that pressure.

use fus_core::{
    Element, PlanResult, PlanningError, Protocol, Pt3, Real, SegmentationMethod, Vec3,
};
use serde::{Deserialize, Serialize};

/// Homogeneous acoustic medium.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Medium {
    pub speed_of_sound_m_s: Real,
    pub density_kg_m3: Real,
    pub attenuation_db_cm_mhz: Real,
}

impl Medium {
    pub const WATER: Medium = Medium {
        speed_of_sound_m_s: 1500.0,
        density_kg_m3: 1000.0,
        attenuation_db_cm_mhz: 0.0022,
    };

    pub const TISSUE: Medium = Medium {
        speed_of_sound_m_s: 1540.0,
        density_kg_m3: 1050.0,
        attenuation_db_cm_mhz: 0.5,
    };

    /// Medium for a segmentation method. Voxel-wise media need a full
    /// simulation and are not supported by the coarse estimate.
    pub fn for_segmentation(method: SegmentationMethod) -> PlanResult<Medium> {
        match method {
            SegmentationMethod::Water => Ok(Medium::WATER),
            SegmentationMethod::Tissue => Ok(Medium::TISSUE),
            SegmentationMethod::Segmented => Err(PlanningError::UnsupportedMethod(
                "segmented media need a full acoustic simulation".into(),
            )),
        }
    }

    /// Amplitude attenuation in nepers per mm at `frequency_hz`.
    fn attenuation_np_mm(&self, frequency_hz: Real) -> Real {
        let db_per_mm = self.attenuation_db_cm_mhz * (frequency_hz / 1e6) / 10.0;
        db_per_mm * std::f64::consts::LN_10 / 20.0
    }
}

/// How focal pressure is estimated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldModel {
    /// `p0 · a · w_i · A_i / (λ r_i) · exp(-α r_i)` summed over elements.
    SphericalSpreading {
        /// Element surface pressure at full drive (MPa).
        surface_pressure_mpa: Real,
    },
}

impl Default for FieldModel {
    fn default() -> Self {
        FieldModel::SphericalSpreading {
            surface_pressure_mpa: 0.1,
        }
    }
}

/// Field metrics at one focal point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldEstimate {
    pub peak_pressure_mpa: Real,
    pub mechanical_index: Real,
    pub isppa_w_cm2: Real,
    pub ispta_w_cm2: Real,
    pub focal_distance_mm: Real,
    pub steering_angle_deg: Real,
}

/// Estimate the field at `focus` (transducer space) for the given weights.
pub fn estimate_field(
    model: &FieldModel,
    elements: &[Element],
    apodizations: &[Real],
    focus: &Pt3,
    protocol: &Protocol,
) -> PlanResult<FieldEstimate> {
    if elements.len() != apodizations.len() {
        return Err(PlanningError::InvalidInput(format!(
            "{} apodization weights for {} elements",
            apodizations.len(),
            elements.len()
        )));
    }
    let medium = Medium::for_segmentation(protocol.segmentation_method)?;
    let f = protocol.pulse.frequency_hz;
    let wavelength_mm = medium.speed_of_sound_m_s * 1e3 / f;
    let alpha = medium.attenuation_np_mm(f);

    let pressure_mpa = match *model {
        FieldModel::SphericalSpreading {
            surface_pressure_mpa,
        } => {
            let p0 = surface_pressure_mpa * protocol.pulse.amplitude;
            elements
                .iter()
                .zip(apodizations)
                .map(|(e, w)| {
                    let r = (focus - e.position).norm().max(wavelength_mm);
                    p0 * w * e.area() / (wavelength_mm * r) * (-alpha * r).exp()
                })
                .sum::<Real>()
        }
    };

    let p_pa = pressure_mpa * 1e6;
    let isppa_w_m2 = p_pa * p_pa / (2.0 * medium.density_kg_m3 * medium.speed_of_sound_m_s);
    let isppa_w_cm2 = isppa_w_m2 * 1e-4;
    let duty = protocol.sequence.duty_cycle(&protocol.pulse);
    let axis_angle = {
        let n = focus.coords.norm();
        if n > 0.0 {
            (focus.coords.dot(&Vec3::z()) / n).clamp(-1.0, 1.0).acos().to_degrees()
        } else {
            0.0
        }
    };

    Ok(FieldEstimate {
        peak_pressure_mpa: pressure_mpa,
        mechanical_index: pressure_mpa / (f / 1e6).sqrt(),
        isppa_w_cm2,
        ispta_w_cm2: isppa_w_cm2 * duty,
        focal_distance_mm: focus.coords.norm(),
        steering_angle_deg: axis_angle,
    })
}
