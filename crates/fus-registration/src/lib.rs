//! Transducer-to-anatomy registration.
//!
//! Two ways of placing the transducer in patient space:
//!
//! - [`virtual_fit`]: from the skin surface alone, by searching contact
//!   placements near the target,
//! - [`register_tracking`]: from a photoscan of the patient wearing the
//!   transducer, by surface registration (ICP) of the photoscan against the
//!   skin, seeded by an earlier pose ([`seed_from_pose`]) or facial
//!   landmarks.
//!
//! Both produce unapproved results; approval is handled by the session layer.

mod icp;
mod landmarks;
mod rigid;
mod tracking;
mod virtual_fit;

pub use icp::{
    ConfidenceModel, IcpOptions, IcpOutcome, IcpPhase, IcpProblem, IcpState, finish, icp_step,
    run_icp,
};
pub use landmarks::{FacialLandmark, FacialLandmarks, RoiOptions, facial_roi, register_landmarks};
pub use rigid::{RigidFit, fit_rigid};
pub use tracking::{
    TrackingInput, TrackingOptions, TrackingResult, register_tracking, seed_from_pose,
};
pub use virtual_fit::{
    FitScore, VirtualFitOptions, VirtualFitResult, distance_to_virtual_fit, manual_fit,
    virtual_fit,
};
