use nalgebra::{
    Isometry3, Matrix3, Matrix4, Point3, Rotation3, Translation3, UnitQuaternion, Vector3,
};

pub type Real = f64;

pub type Vec3 = Vector3<Real>;
pub type Pt3 = Point3<Real>;
pub type Mat3 = Matrix3<Real>;
pub type Mat4 = Matrix4<Real>;
pub type Iso3 = Isometry3<Real>;

/// Tolerance for accepting a 3x3 matrix as a proper rotation.
pub const ROTATION_TOLERANCE: Real = 1e-6;

/// Largest absolute entry of `RᵀR - I`.
pub fn orthonormality_error(r: &Mat3) -> Real {
    (r.transpose() * r - Mat3::identity()).abs().max()
}

/// Project a 3x3 matrix onto SO(3) (polar decomposition via SVD).
///
/// Returns `None` when the SVD does not produce both factors.
pub fn project_to_so3(m: &Mat3) -> Option<Mat3> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        Some(u_flipped * v_t)
    } else {
        Some(r)
    }
}

/// Rotation angle (radians) of a rotation matrix.
pub fn rotation_angle(r: &Mat3) -> Real {
    let cos_theta = ((r.trace() - 1.0) * 0.5).clamp(-1.0, 1.0);
    cos_theta.acos()
}

/// Build an isometry from an orthonormal rotation matrix and a translation.
pub fn build_iso(r: Mat3, t: Vec3) -> Iso3 {
    let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    Iso3::from_parts(Translation3::from(t), rot)
}

/// Two unit vectors completing `axis` to a right-handed orthonormal frame.
///
/// The first returned vector is the projection of `reference` onto the plane
/// orthogonal to `axis`; when `reference` is (nearly) parallel to `axis` the
/// world x or y axis is used instead.
pub fn plane_basis(axis: &Vec3, reference: &Vec3) -> (Vec3, Vec3) {
    let n = axis.normalize();
    let mut e1 = reference - n * n.dot(reference);
    if e1.norm() < 1e-9 {
        let fallback = if n.x.abs() < 0.9 { Vec3::x() } else { Vec3::y() };
        e1 = fallback - n * n.dot(&fallback);
    }
    let e1 = e1.normalize();
    let e2 = n.cross(&e1);
    (e1, e2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_to_so3_fixes_reflection() {
        let m = Mat3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, -1.0);
        let r = project_to_so3(&m).unwrap();
        assert!((r.determinant() - 1.0).abs() < 1e-12);
        assert!(orthonormality_error(&r) < 1e-12);
    }

    #[test]
    fn plane_basis_is_right_handed() {
        let axis = Vec3::new(0.2, -0.3, 1.0);
        let (e1, e2) = plane_basis(&axis, &Vec3::x());
        let n = axis.normalize();
        assert!(e1.dot(&n).abs() < 1e-12);
        assert!(e2.dot(&n).abs() < 1e-12);
        assert!((e1.cross(&e2) - n).norm() < 1e-12);
    }
}
