//! Helpers shared by the workspace test suites.
//!
//! Public so integration tests in other crates can use them; not intended for
//! production use.

use nalgebra::{Translation3, UnitQuaternion};

use crate::{Frame, Iso3, Real, RigidTransform, Vec3};

/// Isometry from roll/pitch/yaw (radians) and a translation.
pub fn make_iso(angles: (Real, Real, Real), t: (Real, Real, Real)) -> Iso3 {
    let rot = UnitQuaternion::from_euler_angles(angles.0, angles.1, angles.2);
    Iso3::from_parts(Translation3::new(t.0, t.1, t.2), rot)
}

/// Rigid transform between two frames from roll/pitch/yaw and a translation.
pub fn make_transform(
    from: Frame,
    to: Frame,
    angles: (Real, Real, Real),
    t: (Real, Real, Real),
) -> RigidTransform {
    RigidTransform::from_iso(from, to, make_iso(angles, t))
}

/// `(rotation error in degrees, translation error in mm)` between two poses.
pub fn pose_error(estimated: &Iso3, truth: &Iso3) -> (Real, Real) {
    let delta = estimated.inverse() * truth;
    let rot_deg = delta.rotation.angle().to_degrees();
    let trans = (estimated.translation.vector - truth.translation.vector).norm();
    (rot_deg, trans)
}

/// Unit vector along `(x, y, z)`.
pub fn unit(x: Real, y: Real, z: Real) -> Vec3 {
    Vec3::new(x, y, z).normalize()
}
