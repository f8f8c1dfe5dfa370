//! Core data model for focused-ultrasound treatment planning.
//!
//! This crate holds everything the planning stages share:
//!
//! - geometry aliases and SO(3) helpers (`Real`, `Vec3`, `Iso3`, ...),
//! - coordinate frames, anatomical conventions and validated
//!   [`RigidTransform`]s between named frames,
//! - triangle meshes with a nearest-neighbour [`PointGrid`],
//! - the transducer, target and [`Protocol`] models,
//! - the [`ApprovalStatus`] lifecycle and the [`PlanningError`] kinds.
//!
//! Patient space is RAS millimetres throughout. Inputs in other
//! conventions or units are converted at the boundary.
//!
//! # Example
//!
//! ```
//! use fus_core::{Frame, RigidTransform, compose};
//! use nalgebra::Matrix3;
//!
//! let a = RigidTransform::new(
//!     Frame::Transducer,
//!     Frame::Photoscan,
//!     &Matrix3::identity(),
//!     nalgebra::Vector3::new(0.0, 0.0, 10.0),
//! )
//! .unwrap();
//! let b = RigidTransform::identity(Frame::Photoscan);
//! let c = compose(&a, &b).unwrap();
//! assert_eq!(c.to_frame(), Frame::Photoscan);
//! ```

mod approval;
mod error;
mod frames;
mod math;
mod mesh;
mod protocol;
/// Deterministic synthetic meshes, arrays and noise for tests and demos.
pub mod synthetic;
mod target;
/// Test helpers shared across the workspace.
pub mod test_utils;
mod transducer;

pub use approval::*;
pub use error::*;
pub use frames::*;
pub use math::*;
pub use mesh::*;
pub use protocol::*;
pub use target::*;
pub use transducer::*;
