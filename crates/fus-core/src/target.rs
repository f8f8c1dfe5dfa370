use serde::{Deserialize, Serialize};

use crate::{Convention, LengthUnit, Pt3, Vec3, convert_point};

/// A clinical target point.
///
/// Positions are stored as entered (any convention, any unit);
/// [`Target::position_ras_mm`] gives the patient-space position used by the
/// planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub position: Pt3,
    #[serde(default)]
    pub convention: Convention,
    #[serde(default)]
    pub units: LengthUnit,
    /// Optional approach direction in the same convention; defaults to the
    /// transducer axis when absent.
    #[serde(default)]
    pub approach: Option<Vec3>,
}

impl Target {
    pub fn new(id: impl Into<String>, position_ras_mm: Pt3) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            position: position_ras_mm,
            convention: Convention::RAS,
            units: LengthUnit::Millimeter,
            approach: None,
        }
    }

    pub fn position_ras_mm(&self) -> Pt3 {
        let p = Pt3::from(self.position.coords * self.units.to_mm());
        convert_point(&p, self.convention, Convention::RAS)
    }

    pub fn approach_ras(&self) -> Option<Vec3> {
        self.approach
            .map(|a| self.convention.matrix_to(&Convention::RAS) * a)
            .filter(|a| a.norm() > 1e-9)
            .map(|a| a.normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lps_cm_target_maps_to_ras_mm() {
        let t = Target {
            id: "t".into(),
            name: "t".into(),
            position: Pt3::new(1.0, 2.0, 3.0),
            convention: Convention::LPS,
            units: LengthUnit::Centimeter,
            approach: Some(Vec3::new(0.0, 0.0, -2.0)),
        };
        assert_eq!(t.position_ras_mm(), Pt3::new(-10.0, -20.0, 30.0));
        assert_eq!(t.approach_ras(), Some(Vec3::new(0.0, 0.0, -1.0)));
    }
}
