//! Session layer of the treatment planner.
//!
//! [`session`] holds the generic [`PlanningSession`](session::PlanningSession)
//! container; [`treatment`] implements the treatment-planning problem on top
//! of it, including the approval ledger that guards solution approval and
//! hardware hand-off.

pub mod session;
pub mod treatment;
