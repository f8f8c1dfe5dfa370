//! Coordinate frames, anatomical conventions and validated rigid transforms.
//!
//! Every pose in the planner is a [`RigidTransform`] tagged with the frame it
//! maps from and the frame it maps to. Composition checks that the frames
//! chain (`X→Y` followed by `Y→Z`), so a transform can never be applied in
//! the wrong space silently.
//!
//! Anatomical axis conventions (`RAS`, `LPS`, ...) are described by
//! [`Convention`]; [`convert_point`] and [`RigidTransform::convert_handedness`]
//! move points and transforms between them. A convention change is a signed
//! axis permutation, so a right-handed/left-handed change keeps the rotation
//! block proper when applied by conjugation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{
    Iso3, Mat3, Mat4, PlanResult, PlanningError, Pt3, ROTATION_TOLERANCE, Real, Vec3, build_iso,
    orthonormality_error, rotation_angle,
};

/// Named coordinate frames known to the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frame {
    /// Transducer-local space. The beam axis is `+z`.
    Transducer,
    /// Patient image space (skin surface, targets).
    Patient,
    /// Local frame of a photogrammetric reconstruction.
    Photoscan,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Frame::Transducer => "transducer",
            Frame::Patient => "patient",
            Frame::Photoscan => "photoscan",
        };
        f.write_str(name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Anatomical conventions
// ─────────────────────────────────────────────────────────────────────────────

/// Anatomical direction an axis points towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnatomicalDirection {
    /// Right.
    R,
    /// Left.
    L,
    /// Anterior.
    A,
    /// Posterior.
    P,
    /// Superior.
    S,
    /// Inferior.
    I,
}

impl AnatomicalDirection {
    fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'R' => Some(Self::R),
            'L' => Some(Self::L),
            'A' => Some(Self::A),
            'P' => Some(Self::P),
            'S' => Some(Self::S),
            'I' => Some(Self::I),
            _ => None,
        }
    }

    fn as_char(self) -> char {
        match self {
            Self::R => 'R',
            Self::L => 'L',
            Self::A => 'A',
            Self::P => 'P',
            Self::S => 'S',
            Self::I => 'I',
        }
    }

    /// Index of the anatomical axis (0 = left/right, 1 = anterior/posterior,
    /// 2 = superior/inferior).
    pub fn axis(self) -> usize {
        match self {
            Self::R | Self::L => 0,
            Self::A | Self::P => 1,
            Self::S | Self::I => 2,
        }
    }

    /// Unit vector of this direction in RAS coordinates.
    pub fn ras_vector(self) -> Vec3 {
        match self {
            Self::R => Vec3::new(1.0, 0.0, 0.0),
            Self::L => Vec3::new(-1.0, 0.0, 0.0),
            Self::A => Vec3::new(0.0, 1.0, 0.0),
            Self::P => Vec3::new(0.0, -1.0, 0.0),
            Self::S => Vec3::new(0.0, 0.0, 1.0),
            Self::I => Vec3::new(0.0, 0.0, -1.0),
        }
    }
}

/// An anatomical axis convention such as `RAS` or `LPS`.
///
/// The three letters name the direction of the x, y and z axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Convention {
    dims: [AnatomicalDirection; 3],
}

impl Convention {
    /// Right, anterior, superior.
    pub const RAS: Self = Self {
        dims: [
            AnatomicalDirection::R,
            AnatomicalDirection::A,
            AnatomicalDirection::S,
        ],
    };

    /// Left, posterior, superior.
    pub const LPS: Self = Self {
        dims: [
            AnatomicalDirection::L,
            AnatomicalDirection::P,
            AnatomicalDirection::S,
        ],
    };

    /// Build a convention, requiring each anatomical axis exactly once.
    pub fn new(dims: [AnatomicalDirection; 3]) -> PlanResult<Self> {
        let mut seen = [false; 3];
        for d in dims {
            if seen[d.axis()] {
                return Err(PlanningError::InvalidTransform(format!(
                    "convention {} repeats an anatomical axis",
                    dims.iter().map(|d| d.as_char()).collect::<String>()
                )));
            }
            seen[d.axis()] = true;
        }
        Ok(Self { dims })
    }

    /// Axis directions in storage order.
    pub fn dims(&self) -> [AnatomicalDirection; 3] {
        self.dims
    }

    /// Matrix mapping coordinates in this convention to RAS coordinates.
    ///
    /// Column `i` is the RAS direction of axis `i`.
    pub fn to_ras_matrix(&self) -> Mat3 {
        Mat3::from_columns(&[
            self.dims[0].ras_vector(),
            self.dims[1].ras_vector(),
            self.dims[2].ras_vector(),
        ])
    }

    /// Right-handed conventions have a determinant of +1.
    pub fn is_right_handed(&self) -> bool {
        self.to_ras_matrix().determinant() > 0.0
    }

    /// Signed permutation mapping coordinates in `self` to coordinates in `other`.
    pub fn matrix_to(&self, other: &Convention) -> Mat3 {
        other.to_ras_matrix().transpose() * self.to_ras_matrix()
    }

    /// Coordinate index and sign that read `direction` out of a point in this
    /// convention.
    pub fn component(&self, direction: AnatomicalDirection) -> (usize, Real) {
        let mut out = (0, 1.0);
        for (i, d) in self.dims.iter().enumerate() {
            if d.axis() == direction.axis() {
                let sign = if *d == direction { 1.0 } else { -1.0 };
                out = (i, sign);
            }
        }
        out
    }
}

impl Default for Convention {
    fn default() -> Self {
        Self::RAS
    }
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in self.dims {
            write!(f, "{}", d.as_char())?;
        }
        Ok(())
    }
}

impl FromStr for Convention {
    type Err = PlanningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let chars: Vec<char> = s.trim().chars().collect();
        if chars.len() != 3 {
            return Err(PlanningError::InvalidTransform(format!(
                "convention '{s}' must have exactly three letters"
            )));
        }
        let mut dims = [AnatomicalDirection::R; 3];
        for (slot, c) in dims.iter_mut().zip(chars) {
            *slot = AnatomicalDirection::from_char(c).ok_or_else(|| {
                PlanningError::InvalidTransform(format!("unknown anatomical direction '{c}'"))
            })?;
        }
        Self::new(dims)
    }
}

impl TryFrom<String> for Convention {
    type Error = PlanningError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Convention> for String {
    fn from(value: Convention) -> Self {
        value.to_string()
    }
}

/// Express a point given in `from` coordinates in `to` coordinates.
pub fn convert_point(p: &Pt3, from: Convention, to: Convention) -> Pt3 {
    Pt3::from(from.matrix_to(&to) * p.coords)
}

// ─────────────────────────────────────────────────────────────────────────────
// Length units
// ─────────────────────────────────────────────────────────────────────────────

/// Length units accepted at the input boundary. Internally everything is mm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LengthUnit {
    #[default]
    #[serde(rename = "mm")]
    Millimeter,
    #[serde(rename = "cm")]
    Centimeter,
    #[serde(rename = "m")]
    Meter,
}

impl LengthUnit {
    /// Factor converting a length in this unit to millimetres.
    pub fn to_mm(self) -> Real {
        match self {
            LengthUnit::Millimeter => 1.0,
            LengthUnit::Centimeter => 10.0,
            LengthUnit::Meter => 1000.0,
        }
    }

    /// Short unit symbol, e.g. `mm`.
    pub fn symbol(self) -> &'static str {
        match self {
            LengthUnit::Millimeter => "mm",
            LengthUnit::Centimeter => "cm",
            LengthUnit::Meter => "m",
        }
    }
}

impl FromStr for LengthUnit {
    type Err = PlanningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "mm" => Ok(Self::Millimeter),
            "cm" => Ok(Self::Centimeter),
            "m" => Ok(Self::Meter),
            other => Err(PlanningError::InvalidInput(format!(
                "unknown length unit '{other}'"
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rigid transforms
// ─────────────────────────────────────────────────────────────────────────────

/// Check that `r` is a proper rotation within [`ROTATION_TOLERANCE`].
pub fn validate_rotation(r: &Mat3) -> PlanResult<()> {
    if r.iter().any(|v| !v.is_finite()) {
        return Err(PlanningError::InvalidTransform(
            "rotation has non-finite entries".to_string(),
        ));
    }
    let det = r.determinant();
    if (det - 1.0).abs() > ROTATION_TOLERANCE {
        return Err(PlanningError::InvalidTransform(format!(
            "rotation determinant {det:.9} is not +1"
        )));
    }
    let ortho = orthonormality_error(r);
    if ortho > ROTATION_TOLERANCE {
        return Err(PlanningError::InvalidTransform(format!(
            "rotation is not orthonormal (max |RᵀR - I| = {ortho:.3e})"
        )));
    }
    Ok(())
}

/// A proper rigid transform mapping points from one frame to another.
///
/// Instances are immutable; every operation returns a new transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TransformRecord", into = "TransformRecord")]
pub struct RigidTransform {
    from: Frame,
    to: Frame,
    iso: Iso3,
}

/// Serialized form: frames plus a row-major homogeneous matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TransformRecord {
    from: Frame,
    to: Frame,
    matrix: [[Real; 4]; 4],
}

impl TryFrom<TransformRecord> for RigidTransform {
    type Error = PlanningError;

    fn try_from(rec: TransformRecord) -> Result<Self, Self::Error> {
        let m = Mat4::from_fn(|r, c| rec.matrix[r][c]);
        RigidTransform::from_matrix4(rec.from, rec.to, &m)
    }
}

impl From<RigidTransform> for TransformRecord {
    fn from(t: RigidTransform) -> Self {
        let m = t.to_matrix4();
        let mut matrix = [[0.0; 4]; 4];
        for (r, row) in matrix.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = m[(r, c)];
            }
        }
        Self {
            from: t.from,
            to: t.to,
            matrix,
        }
    }
}

impl RigidTransform {
    /// Identity transform of a single frame.
    pub fn identity(frame: Frame) -> Self {
        Self {
            from: frame,
            to: frame,
            iso: Iso3::identity(),
        }
    }

    /// Build from a rotation matrix and translation, validating the rotation.
    pub fn new(from: Frame, to: Frame, rotation: &Mat3, translation: Vec3) -> PlanResult<Self> {
        validate_rotation(rotation)?;
        if translation.iter().any(|v| !v.is_finite()) {
            return Err(PlanningError::InvalidTransform(
                "translation has non-finite entries".to_string(),
            ));
        }
        Ok(Self {
            from,
            to,
            iso: build_iso(*rotation, translation),
        })
    }

    /// Wrap an isometry. Isometries are proper by construction.
    pub fn from_iso(from: Frame, to: Frame, iso: Iso3) -> Self {
        Self { from, to, iso }
    }

    /// Build from a homogeneous 4x4 matrix.
    pub fn from_matrix4(from: Frame, to: Frame, m: &Mat4) -> PlanResult<Self> {
        let last = m.row(3);
        if (last[0].abs() + last[1].abs() + last[2].abs() + (last[3] - 1.0).abs())
            > ROTATION_TOLERANCE
        {
            return Err(PlanningError::InvalidTransform(
                "homogeneous matrix last row must be [0, 0, 0, 1]".to_string(),
            ));
        }
        let r: Mat3 = m.fixed_view::<3, 3>(0, 0).into_owned();
        let t = Vec3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]);
        Self::new(from, to, &r, t)
    }

    pub fn to_matrix4(&self) -> Mat4 {
        self.iso.to_homogeneous()
    }

    /// Source frame.
    pub fn from_frame(&self) -> Frame {
        self.from
    }

    /// Destination frame.
    pub fn to_frame(&self) -> Frame {
        self.to
    }

    pub fn iso(&self) -> &Iso3 {
        &self.iso
    }

    /// Rotation part as a matrix.
    pub fn rotation(&self) -> Mat3 {
        self.iso.rotation.to_rotation_matrix().into_inner()
    }

    /// Translation part, in the units of the destination frame.
    pub fn translation(&self) -> Vec3 {
        self.iso.translation.vector
    }

    /// `self: X→Y` followed by `next: Y→Z`, giving `X→Z`.
    pub fn then(&self, next: &RigidTransform) -> PlanResult<RigidTransform> {
        if self.to != next.from {
            return Err(PlanningError::InvalidTransform(format!(
                "cannot compose {}→{} with {}→{}",
                self.from, self.to, next.from, next.to
            )));
        }
        Ok(Self {
            from: self.from,
            to: next.to,
            iso: next.iso * self.iso,
        })
    }

    /// Inverse transform `Y→X`.
    pub fn inverse(&self) -> RigidTransform {
        Self {
            from: self.to,
            to: self.from,
            iso: self.iso.inverse(),
        }
    }

    /// Map a point of the source frame into the destination frame.
    pub fn apply_point(&self, p: &Pt3) -> Pt3 {
        self.iso.transform_point(p)
    }

    /// Rotate a direction; translation does not apply.
    pub fn apply_vector(&self, v: &Vec3) -> Vec3 {
        self.iso.transform_vector(v)
    }

    /// Rotation angle in radians.
    pub fn rotation_angle(&self) -> Real {
        rotation_angle(&self.rotation())
    }

    /// True if both transforms chain the same frames and differ by at most
    /// `tol` in rotation angle (rad) and translation (mm).
    pub fn approx_eq(&self, other: &RigidTransform, tol: Real) -> bool {
        if self.from != other.from || self.to != other.to {
            return false;
        }
        let delta = self.iso.inverse() * other.iso;
        delta.translation.vector.norm() <= tol && delta.rotation.angle() <= tol
    }

    /// Re-express this transform for frames using `to` instead of `from`
    /// axis conventions on both sides.
    pub fn convert_handedness(&self, from: Convention, to: Convention) -> RigidTransform {
        let m = from.matrix_to(&to);
        let r = m * self.rotation() * m.transpose();
        let t = m * self.translation();
        Self {
            from: self.from,
            to: self.to,
            iso: build_iso(r, t),
        }
    }

    /// Scale the translation, e.g. when converting length units.
    pub fn rescale_translation(&self, factor: Real) -> RigidTransform {
        let mut iso = self.iso;
        iso.translation.vector *= factor;
        Self {
            from: self.from,
            to: self.to,
            iso,
        }
    }
}

/// Compose `a: X→Y` with `b: Y→Z` into `X→Z`.
pub fn compose(a: &RigidTransform, b: &RigidTransform) -> PlanResult<RigidTransform> {
    a.then(b)
}

/// Invert `a: X→Y` into `Y→X`.
pub fn invert(a: &RigidTransform) -> RigidTransform {
    a.inverse()
}
