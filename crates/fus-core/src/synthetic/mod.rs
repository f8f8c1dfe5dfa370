//! Deterministic synthetic data for tests and demos.
//!
//! - [`meshes`]: closed ellipsoidal head surfaces and flat patches.
//! - [`arrays`]: planar transducer arrays with a contact surface.
//! - [`noise`]: seed-stable point jitter independent of `rand` internals.

pub mod arrays;
pub mod meshes;
pub mod noise;
