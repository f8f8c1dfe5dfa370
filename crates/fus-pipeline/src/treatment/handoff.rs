//! Hardware hand-off payload.

use fus_beamform::{PoseRef, Solution};
use fus_core::{ApprovalStatus, PlanResult, PlanningError, Pt3, Pulse, Real, Sequence};
use serde::{Deserialize, Serialize};

/// Per focal point drive values, in transducer element order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffPoint {
    pub index: usize,
    pub label: String,
    /// Focal point in transducer space (mm).
    pub focus_mm: Pt3,
    pub delays_s: Vec<Real>,
    pub apodizations: Vec<Real>,
}

/// What the hardware controller receives for an approved solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareHandoff {
    pub solution_id: String,
    pub transducer_id: String,
    pub pose: PoseRef,
    pub pulse: Pulse,
    pub sequence: Sequence,
    pub points: Vec<HandoffPoint>,
}

impl HardwareHandoff {
    /// Build the payload; refused unless the solution is approved.
    pub fn from_solution(solution: &Solution) -> PlanResult<Self> {
        if solution.status != ApprovalStatus::Approved {
            return Err(PlanningError::HandoffRefused(format!(
                "solution {} is {}",
                solution.id, solution.status
            )));
        }
        let points = solution
            .points
            .iter()
            .map(|p| HandoffPoint {
                index: p.focal_point.index,
                label: p.focal_point.label.clone(),
                focus_mm: p.focal_point.transducer,
                delays_s: p.elements.iter().map(|e| e.delay_s).collect(),
                apodizations: p.elements.iter().map(|e| e.apodization).collect(),
            })
            .collect();
        Ok(Self {
            solution_id: solution.id.clone(),
            transducer_id: solution.transducer_id.clone(),
            pose: solution.pose.clone(),
            pulse: solution.pulse,
            sequence: solution.sequence,
            points,
        })
    }
}
