//! Transducer geometry: array elements and the contact (coupling) surface.

use serde::{Deserialize, Serialize};

use crate::{LengthUnit, PlanResult, PlanningError, Pt3, Real, Vec3};

/// One array element in transducer space.
///
/// Position and size are in the units of the owning [`TransducerModel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: usize,
    /// Element centre.
    pub position: Pt3,
    /// Unit emitting direction.
    pub normal: Vec3,
    pub width: Real,
    pub length: Real,
}

impl Element {
    /// Emitting area in model units squared (mm² after
    /// [`TransducerModel::in_mm`]).
    pub fn area(&self) -> Real {
        self.width * self.length
    }
}

/// Transducer reference geometry.
///
/// Transducer space has its origin at the array centre and the beam axis
/// along `+z`. The contact surface is sampled as points in the same frame and
/// describes where the coupling surface meets the skin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransducerModel {
    pub id: String,
    pub elements: Vec<Element>,
    pub contact_surface: Vec<Pt3>,
    #[serde(default)]
    pub units: LengthUnit,
}

impl TransducerModel {
    /// Check that the model has elements, a contact surface, unit normals
    /// and positive element sizes.
    pub fn validate(&self) -> PlanResult<()> {
        if self.elements.is_empty() {
            return Err(PlanningError::InvalidInput(format!(
                "transducer '{}' has no elements",
                self.id
            )));
        }
        if self.contact_surface.is_empty() {
            return Err(PlanningError::InvalidInput(format!(
                "transducer '{}' has an empty contact surface",
                self.id
            )));
        }
        for e in &self.elements {
            if (e.normal.norm() - 1.0).abs() > 1e-6 {
                return Err(PlanningError::InvalidInput(format!(
                    "element {} normal is not unit length",
                    e.id
                )));
            }
            if !(e.width > 0.0 && e.length > 0.0) {
                return Err(PlanningError::InvalidInput(format!(
                    "element {} has non-positive size",
                    e.id
                )));
            }
        }
        Ok(())
    }

    /// Number of array elements.
    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    /// Copy with positions and sizes expressed in millimetres.
    pub fn in_mm(&self) -> TransducerModel {
        let s = self.units.to_mm();
        let mut out = self.clone();
        if s != 1.0 {
            for e in &mut out.elements {
                e.position = Pt3::from(e.position.coords * s);
                e.width *= s;
                e.length *= s;
            }
            for p in &mut out.contact_surface {
                *p = Pt3::from(p.coords * s);
            }
        }
        out.units = LengthUnit::Millimeter;
        out
    }

    /// Centroid of the contact surface samples.
    pub fn contact_center(&self) -> Pt3 {
        let n = self.contact_surface.len().max(1) as Real;
        let sum = self
            .contact_surface
            .iter()
            .fold(Vec3::zeros(), |acc, p| acc + p.coords);
        Pt3::from(sum / n)
    }
}
