//! Planning session framework.
//!
//! A session is a mutable container: configuration, embedded input,
//! problem-specific state, a single current output and a list of exports.
//! Step functions operate on `&mut PlanningSession<P>` and record each
//! operation in a lightweight audit log.
//!
//! ```no_run
//! use fus_pipeline::session::PlanningSession;
//! use fus_pipeline::treatment::{
//!     TreatmentProblem, approve_virtual_fit, step_plan, step_virtual_fit,
//! };
//! # fn main() -> anyhow::Result<()> {
//! # let input = unimplemented!();
//! let mut session = PlanningSession::<TreatmentProblem>::new();
//! session.set_input(input)?;
//!
//! step_virtual_fit(&mut session, "target-1", None)?;
//! let best = session.state.virtual_fits[0].id.clone();
//! approve_virtual_fit(&mut session, &best)?;
//! step_plan(&mut session, "target-1", None)?;
//! # Ok(())
//! # }
//! ```

mod planning_session;
mod problem_type;
mod types;

pub use planning_session::PlanningSession;
pub use problem_type::{InvalidationPolicy, ProblemType};
pub use types::{ExportRecord, LogEntry, SessionMetadata, current_timestamp};
