//! Per-element amplitude weights.

use fus_core::{ApodizationMethod, Element, PlanResult, Pt3, Real};

/// Angle (deg) between an element's normal and the direction to `focus`.
pub fn element_angle_deg(element: &Element, focus: &Pt3) -> Real {
    let d = focus - element.position;
    let n = d.norm();
    if n == 0.0 {
        return 0.0;
    }
    (element.normal.dot(&d) / n).clamp(-1.0, 1.0).acos().to_degrees()
}

/// Weights in `[0, 1]` with maximum 1, or all zero when every element is
/// switched off.
pub fn element_apodizations(
    elements: &[Element],
    focus: &Pt3,
    method: &ApodizationMethod,
) -> PlanResult<Vec<Real>> {
    method.validate()?;
    let raw: Vec<Real> = elements
        .iter()
        .map(|e| {
            let angle = element_angle_deg(e, focus);
            match *method {
                ApodizationMethod::Uniform => 1.0,
                ApodizationMethod::MaxAngle { max_angle_deg } => {
                    if angle <= max_angle_deg { 1.0 } else { 0.0 }
                }
                ApodizationMethod::PiecewiseLinear {
                    rolloff_start_deg,
                    rolloff_end_deg,
                } => {
                    if angle <= rolloff_start_deg {
                        1.0
                    } else if angle >= rolloff_end_deg {
                        0.0
                    } else {
                        (rolloff_end_deg - angle) / (rolloff_end_deg - rolloff_start_deg)
                    }
                }
            }
        })
        .collect();
    let max = raw.iter().copied().fold(0.0, Real::max);
    if max <= 0.0 {
        return Ok(vec![0.0; raw.len()]);
    }
    Ok(raw.into_iter().map(|w| w / max).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fus_core::synthetic::arrays::planar_array;

    #[test]
    fn max_angle_switches_off_oblique_elements() {
        let t = planar_array(8, 8, 4.0, 10.0);
        let focus = t.elements[0].position + fus_core::Vec3::new(0.0, 0.0, 20.0);
        let m = ApodizationMethod::MaxAngle {
            max_angle_deg: 30.0,
        };
        let w = element_apodizations(&t.elements, &focus, &m).unwrap();
        assert_eq!(w[0], 1.0);
        assert_eq!(w[63], 0.0);
        assert!(w.iter().all(|v| *v == 0.0 || *v == 1.0));
    }

    #[test]
    fn piecewise_linear_peaks_at_one() {
        let t = planar_array(8, 8, 4.0, 10.0);
        let focus = Pt3::new(30.0, 0.0, 10.0);
        let m = ApodizationMethod::PiecewiseLinear {
            rolloff_start_deg: 10.0,
            rolloff_end_deg: 80.0,
        };
        let w = element_apodizations(&t.elements, &focus, &m).unwrap();
        let max = w.iter().copied().fold(0.0, Real::max);
        assert_eq!(max, 1.0);
        assert!(w.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn focus_behind_array_gives_all_zero() {
        let t = planar_array(4, 4, 4.0, 10.0);
        let focus = Pt3::new(0.0, 0.0, -30.0);
        let m = ApodizationMethod::MaxAngle {
            max_angle_deg: 45.0,
        };
        let w = element_apodizations(&t.elements, &focus, &m).unwrap();
        assert!(w.iter().all(|v| *v == 0.0));
    }
}
