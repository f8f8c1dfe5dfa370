//! Per-element firing delays.

use fus_core::{DelayMethod, Element, PlanResult, Pt3, Real};

/// Delays (s) that make every element's wavefront arrive at `focus`
/// together. The farthest element fires first, so the minimum delay is
/// exactly zero.
pub fn element_delays(
    elements: &[Element],
    focus: &Pt3,
    method: &DelayMethod,
) -> PlanResult<Vec<Real>> {
    method.validate()?;
    let tof: Vec<Real> = match *method {
        DelayMethod::Direct { speed_of_sound_m_s } => {
            let c_mm_s = speed_of_sound_m_s * 1e3;
            elements
                .iter()
                .map(|e| (focus - e.position).norm() / c_mm_s)
                .collect()
        }
    };
    let latest = tof.iter().copied().fold(Real::NEG_INFINITY, Real::max);
    Ok(tof.iter().map(|t| latest - t).collect())
}
