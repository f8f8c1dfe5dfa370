//! Safety validation of per-point metrics and target placement.
//!
//! Validation never fails and never changes its inputs: every violated rule
//! becomes a [`Finding`] attached to the solution.

use fus_core::{
    AnatomicalDirection, Observation, ParameterConstraint, Pt3, Real, SafetyQuantity,
    TargetConstraint,
};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::field::FieldEstimate;

/// Everything the validator can observe about one focal point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointMetrics {
    #[serde(flatten)]
    pub field: FieldEstimate,
    pub delay_span_us: Real,
    pub active_element_fraction: Real,
    /// Focal point lies in front of the array face (`z > 0`).
    pub focus_ahead: bool,
    /// Distance from the focal point to the nearest skin vertex, when the
    /// skin surface is known.
    #[serde(default)]
    pub target_skin_distance_mm: Option<Real>,
}

impl PointMetrics {
    pub fn observe(&self, quantity: SafetyQuantity) -> Option<Observation> {
        let scalar = |v: Real| Some(Observation::Scalar(v));
        match quantity {
            SafetyQuantity::PeakPressure => scalar(self.field.peak_pressure_mpa),
            SafetyQuantity::MechanicalIndex => scalar(self.field.mechanical_index),
            SafetyQuantity::Isppa => scalar(self.field.isppa_w_cm2),
            SafetyQuantity::Ispta => scalar(self.field.ispta_w_cm2),
            SafetyQuantity::FocalDistance => scalar(self.field.focal_distance_mm),
            SafetyQuantity::SteeringAngle => scalar(self.field.steering_angle_deg),
            SafetyQuantity::TargetSkinDistance => {
                self.target_skin_distance_mm.map(Observation::Scalar)
            }
            SafetyQuantity::DelaySpan => scalar(self.delay_span_us),
            SafetyQuantity::ActiveElementFraction => scalar(self.active_element_fraction),
            SafetyQuantity::FocusAhead => Some(Observation::Flag(self.focus_ahead)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Needs operator acknowledgement before approval.
    Warning,
    /// Blocks approval.
    Fatal,
}

/// What a finding is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Subject {
    Parameter { quantity: SafetyQuantity },
    TargetPosition { direction: AnatomicalDirection },
}

/// A violated constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub subject: Subject,
    pub observed: Observation,
    /// Human-readable allowed range, e.g. `[0, 1.9]`.
    pub allowed: String,
    pub severity: Severity,
    /// Focal point index; `None` for target placement findings.
    pub focal_point: Option<usize>,
}

/// Check one focal point's metrics against the parameter constraints.
///
/// A violated `error` rule gives a fatal finding; otherwise a violated
/// `warning` rule gives a warning. Quantities that cannot be observed for
/// this point are skipped.
pub fn check_point(
    metrics: &PointMetrics,
    constraints: &[ParameterConstraint],
    focal_point: usize,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    for c in constraints {
        let Some(observed) = metrics.observe(c.quantity) else {
            debug!("point {focal_point}: {} not observable, skipped", c.quantity);
            continue;
        };
        let violated = [(Severity::Fatal, &c.error), (Severity::Warning, &c.warning)]
            .into_iter()
            .find_map(|(severity, rule)| {
                rule.as_ref()
                    .filter(|r| !r.admits(&observed))
                    .map(|r| (severity, r))
            });
        if let Some((severity, rule)) = violated {
            findings.push(Finding {
                subject: Subject::Parameter {
                    quantity: c.quantity,
                },
                observed,
                allowed: rule.to_string(),
                severity,
                focal_point: Some(focal_point),
            });
        }
    }
    findings
}

/// Check a patient-space target position (RAS mm) against the target
/// constraints. Violations are fatal.
pub fn check_target(position_ras_mm: &Pt3, constraints: &[TargetConstraint]) -> Vec<Finding> {
    constraints
        .iter()
        .filter_map(|c| {
            let value = position_ras_mm.coords.dot(&c.direction.ras_vector()) / c.units.to_mm();
            if (c.min..=c.max).contains(&value) {
                return None;
            }
            Some(Finding {
                subject: Subject::TargetPosition {
                    direction: c.direction,
                },
                observed: Observation::Scalar(value),
                allowed: format!("[{}, {}] {}", c.min, c.max, c.units.symbol()),
                severity: Severity::Fatal,
                focal_point: None,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fus_core::{ConstraintRule, LengthUnit};

    fn metrics(mi: Real) -> PointMetrics {
        PointMetrics {
            field: FieldEstimate {
                peak_pressure_mpa: mi * 0.63,
                mechanical_index: mi,
                isppa_w_cm2: 10.0,
                ispta_w_cm2: 1.0,
                focal_distance_mm: 50.0,
                steering_angle_deg: 5.0,
            },
            delay_span_us: 3.0,
            active_element_fraction: 1.0,
            focus_ahead: true,
            target_skin_distance_mm: None,
        }
    }

    fn mi_constraint() -> ParameterConstraint {
        ParameterConstraint {
            quantity: SafetyQuantity::MechanicalIndex,
            warning: Some(ConstraintRule::Range {
                min: None,
                max: Some(1.0),
                inclusive: true,
            }),
            error: Some(ConstraintRule::Range {
                min: None,
                max: Some(1.9),
                inclusive: true,
            }),
        }
    }

    #[test]
    fn tiers() {
        let c = [mi_constraint()];
        assert!(check_point(&metrics(0.8), &c, 0).is_empty());
        let warn = check_point(&metrics(1.2), &c, 3);
        assert_eq!(warn.len(), 1);
        assert_eq!(warn[0].severity, Severity::Warning);
        assert_eq!(warn[0].focal_point, Some(3));
        let fatal = check_point(&metrics(2.5), &c, 0);
        assert_eq!(fatal[0].severity, Severity::Fatal);
        assert_eq!(fatal[0].allowed, "[-inf, 1.9]");
    }

    #[test]
    fn flags_and_unobservable_quantities() {
        let c = [
            ParameterConstraint {
                quantity: SafetyQuantity::FocusAhead,
                warning: None,
                error: Some(ConstraintRule::Flag { expected: true }),
            },
            ParameterConstraint {
                quantity: SafetyQuantity::TargetSkinDistance,
                warning: None,
                error: Some(ConstraintRule::Range {
                    min: Some(10.0),
                    max: None,
                    inclusive: true,
                }),
            },
        ];
        let mut m = metrics(0.5);
        assert!(check_point(&m, &c, 0).is_empty());
        m.focus_ahead = false;
        m.target_skin_distance_mm = Some(4.0);
        let f = check_point(&m, &c, 0);
        assert_eq!(f.len(), 2);
        assert!(f.iter().all(|x| x.severity == Severity::Fatal));
    }

    #[test]
    fn target_constraints_use_their_units() {
        let c = [TargetConstraint {
            direction: AnatomicalDirection::S,
            units: LengthUnit::Centimeter,
            min: -5.0,
            max: 5.0,
        }];
        assert!(check_target(&Pt3::new(0.0, 0.0, 40.0), &c).is_empty());
        let f = check_target(&Pt3::new(0.0, 0.0, 60.0), &c);
        assert_eq!(f.len(), 1);
        assert_eq!(f[0].observed, Observation::Scalar(6.0));
        assert_eq!(f[0].focal_point, None);
    }
}
