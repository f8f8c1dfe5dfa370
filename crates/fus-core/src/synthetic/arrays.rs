//! Synthetic transducer arrays.

use crate::{Element, LengthUnit, Pt3, Real, TransducerModel, Vec3};

/// Flat `nx x ny` array in the `z = 0` plane, centred at the origin, with
/// every element facing `+z`.
///
/// The contact surface is a disk of sample points at `z = contact_offset_mm`
/// covering the array footprint.
pub fn planar_array(
    nx: usize,
    ny: usize,
    pitch_mm: Real,
    contact_offset_mm: Real,
) -> TransducerModel {
    let x0 = -(nx.saturating_sub(1) as Real) * pitch_mm / 2.0;
    let y0 = -(ny.saturating_sub(1) as Real) * pitch_mm / 2.0;
    let elements: Vec<Element> = (0..ny)
        .flat_map(|j| (0..nx).map(move |i| (i, j)))
        .enumerate()
        .map(|(id, (i, j))| Element {
            id,
            position: Pt3::new(x0 + i as Real * pitch_mm, y0 + j as Real * pitch_mm, 0.0),
            normal: Vec3::z(),
            width: pitch_mm * 0.9,
            length: pitch_mm * 0.9,
        })
        .collect();

    let radius = 0.5 * pitch_mm * nx.max(ny) as Real;
    TransducerModel {
        id: format!("planar-{nx}x{ny}"),
        elements,
        contact_surface: contact_disk(radius, contact_offset_mm, 4, 12),
        units: LengthUnit::Millimeter,
    }
}

/// Concentric rings of sample points plus the centre, at height `z`.
pub fn contact_disk(radius: Real, z: Real, rings: usize, per_ring: usize) -> Vec<Pt3> {
    let mut pts = vec![Pt3::new(0.0, 0.0, z)];
    for r in 1..=rings {
        let rho = radius * r as Real / rings as Real;
        let count = per_ring * r;
        for k in 0..count {
            let phi = std::f64::consts::TAU * k as Real / count as Real;
            pts.push(Pt3::new(rho * phi.cos(), rho * phi.sin(), z));
        }
    }
    pts
}
