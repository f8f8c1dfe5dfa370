use fus_beamform::PoseKind;
use fus_core::synthetic::arrays::planar_array;
use fus_core::synthetic::meshes::head_surface;
use fus_core::test_utils::make_iso;
use fus_core::{
    ApprovalStatus, ConstraintRule, Frame, Iso3, LengthUnit, ParameterConstraint, PhotoscanMesh,
    PlanningError, Protocol, Pt3, RigidTransform, SafetyQuantity, SkinSurfaceMesh, Target,
    TriangleMesh,
};
use fus_pipeline::treatment::{
    PlanOptions, TrackOptions, TrackingScan, TreatmentInput, TreatmentSession, approve_solution,
    approve_tracking, approve_virtual_fit, revoke_pose, run_virtual_fit, step_handoff,
    step_manual_fit, step_plan, step_reanalyze, step_track,
};
use fus_registration::distance_to_virtual_fit;

const TARGET: &str = "t1";

fn input(protocol: Protocol) -> TreatmentInput {
    TreatmentInput {
        skin: SkinSurfaceMesh::new(head_surface()).unwrap(),
        transducer: planar_array(8, 8, 4.0, 10.0),
        protocol,
        targets: vec![Target::new(TARGET, Pt3::new(10.0, 30.0, 40.0))],
        skin_landmarks: None,
    }
}

/// Session with the best virtual fit approved by the operator.
fn fitted(protocol: Protocol) -> TreatmentSession {
    let mut session = TreatmentSession::with_description("synthetic head");
    session.set_input(input(protocol)).unwrap();
    let fits = run_virtual_fit(&mut session, TARGET).unwrap();
    approve_virtual_fit(&mut session, &fits[0]).unwrap();
    session
}

fn planned(protocol: Protocol) -> TreatmentSession {
    let mut session = fitted(protocol);
    step_plan(&mut session, TARGET, None).unwrap();
    session
}

fn focal_distance_warning() -> Protocol {
    let mut protocol = Protocol::new("p");
    protocol.parameter_constraints.push(ParameterConstraint {
        quantity: SafetyQuantity::FocalDistance,
        warning: Some(always_over(1.0)),
        error: None,
    });
    protocol
}

fn always_over(max: f64) -> ConstraintRule {
    ConstraintRule::Range {
        min: None,
        max: Some(max),
        inclusive: true,
    }
}

fn planning_error(err: &anyhow::Error) -> &PlanningError {
    err.downcast_ref::<PlanningError>()
        .unwrap_or_else(|| panic!("not a planning error: {err:#}"))
}

fn small_offset() -> Iso3 {
    make_iso((0.01, 0.02, -0.015), (1.5, -1.0, 2.0))
}

/// Photoscan of the skin taken in the `scan_to_patient` frame, with the
/// transducer located where `transducer_to_patient` puts it.
fn scan_of(
    skin: &TriangleMesh,
    transducer_to_patient: &RigidTransform,
    scan_to_patient: &Iso3,
) -> TrackingScan {
    let inv = scan_to_patient.inverse();
    TrackingScan {
        photoscan: PhotoscanMesh {
            id: "scan".into(),
            mesh: TriangleMesh {
                vertices: skin.vertices.iter().map(|p| inv.transform_point(p)).collect(),
                triangles: skin.triangles.clone(),
            },
            units: LengthUnit::Millimeter,
            texture: None,
        },
        transducer_in_photoscan: RigidTransform::from_iso(
            Frame::Transducer,
            Frame::Photoscan,
            inv * transducer_to_patient.iso(),
        ),
        landmarks: None,
    }
}

#[test]
fn virtual_fit_leaves_every_candidate_pending() {
    let mut session = TreatmentSession::new();
    session.set_input(input(Protocol::new("p"))).unwrap();
    let fits = run_virtual_fit(&mut session, TARGET).unwrap();
    assert!(!fits.is_empty());
    assert_eq!(session.state.virtual_fit(&fits[0]).unwrap().rank, 1);
    for id in &fits {
        assert_eq!(session.state.virtual_fit(id).unwrap().status, ApprovalStatus::Pending);
    }
    assert!(session.state.ledger.active_pose.is_none());

    // Planning waits for the operator to pick a placement.
    let err = step_plan(&mut session, TARGET, None).unwrap_err();
    assert!(matches!(planning_error(&err), PlanningError::StalePose(_)));
    assert!(session.output().is_none());
}

#[test]
fn planning_on_the_approved_fit_leaves_a_pending_solution() {
    let session = planned(Protocol::new("p"));
    let solution = session.output().unwrap();
    assert_eq!(solution.status, ApprovalStatus::Pending);
    assert_eq!(solution.target_id, TARGET);

    let active = session.state.ledger.active_pose.clone().unwrap();
    assert_eq!(active.kind, PoseKind::VirtualFit);
    assert_eq!(session.state.virtual_fit(&active.id).unwrap().rank, 1);
    assert_eq!(solution.pose, active);
    assert!(session.log.iter().all(|e| e.success));
}

#[test]
fn approved_solution_is_handed_off() {
    let mut session = planned(Protocol::new("p"));
    let refused = step_handoff(&mut session, None).unwrap_err();
    assert!(matches!(planning_error(&refused), PlanningError::HandoffRefused(_)));
    assert!(session.exports.is_empty());

    approve_solution(&mut session, false).unwrap();
    let handoff = step_handoff(&mut session, Some("session 1".into())).unwrap();
    assert_eq!(handoff.points.len(), 1);
    assert_eq!(handoff.points[0].delays_s.len(), 64);
    assert_eq!(handoff.points[0].apodizations.len(), 64);
    assert_eq!(session.exports.len(), 1);
    assert_eq!(session.exports[0].export, handoff);
    assert_eq!(
        session.state.ledger.approved_solution.as_deref(),
        Some(handoff.solution_id.as_str())
    );
}

#[test]
fn revoked_pose_makes_the_solution_stale() {
    let mut session = planned(Protocol::new("p"));
    revoke_pose(&mut session).unwrap();
    let err = approve_solution(&mut session, true).unwrap_err();
    assert!(matches!(planning_error(&err), PlanningError::StalePose(_)));
    assert_eq!(session.output().unwrap().status, ApprovalStatus::Pending);
    let last = session.log.last().unwrap();
    assert_eq!(last.operation, "approve_solution");
    assert!(!last.success);
}

#[test]
fn superseding_pose_revokes_the_approved_solution() {
    let mut session = planned(Protocol::new("p"));
    approve_solution(&mut session, false).unwrap();
    let old_pose = session.state.ledger.active_pose.clone().unwrap();
    let transform = session.state.virtual_fit(&old_pose.id).unwrap().transform.clone();

    let manual = step_manual_fit(&mut session, TARGET, transform).unwrap();
    approve_virtual_fit(&mut session, &manual).unwrap();
    assert_eq!(session.output().unwrap().status, ApprovalStatus::Revoked);
    assert_eq!(
        session.state.virtual_fit(&old_pose.id).unwrap().status,
        ApprovalStatus::Revoked
    );
    let err = step_handoff(&mut session, None).unwrap_err();
    assert!(matches!(planning_error(&err), PlanningError::HandoffRefused(_)));

    // Re-planning against the new pose gives an approvable solution.
    step_plan(&mut session, TARGET, None).unwrap();
    assert_eq!(session.state.solution_history.len(), 1);
    approve_solution(&mut session, false).unwrap();
    assert_eq!(session.output().unwrap().pose.id, manual);
}

#[test]
fn approving_tracking_supersedes_previous_approvals() {
    let mut session = planned(Protocol::new("p"));
    let fit_id = session.state.ledger.active_pose.clone().unwrap().id;
    let planned_pose = session.state.virtual_fit(&fit_id).unwrap().transform.clone();
    let skin = &session.require_input().unwrap().skin.mesh;
    let scan = scan_of(skin, &planned_pose, &small_offset());

    let first = step_track(&mut session, &scan, None).unwrap();
    let second = step_track(&mut session, &scan, None).unwrap();
    let tracked = session.state.tracking_result(&first).unwrap();
    assert!(!tracked.low_confidence, "confidence {}", tracked.confidence);
    assert!(session.log.last().unwrap().notes.as_deref().unwrap().contains(&fit_id));

    approve_tracking(&mut session, &first).unwrap();
    let pose = approve_tracking(&mut session, &second).unwrap();
    assert_eq!(pose.kind, PoseKind::Tracking);
    assert_eq!(pose.id, second);

    let approved = session
        .state
        .tracking
        .iter()
        .filter(|r| r.status == ApprovalStatus::Approved)
        .count();
    assert_eq!(approved, 1);
    assert_eq!(
        session.state.tracking_result(&first).unwrap().status,
        ApprovalStatus::Revoked
    );
    assert_eq!(
        session.state.virtual_fit(&fit_id).unwrap().status,
        ApprovalStatus::Revoked
    );

    // The pending solution was computed on the virtual fit.
    let err = approve_solution(&mut session, false).unwrap_err();
    assert!(matches!(planning_error(&err), PlanningError::StalePose(_)));
    step_plan(&mut session, TARGET, None).unwrap();
    approve_solution(&mut session, false).unwrap();
}

#[test]
fn tracking_seeded_from_the_virtual_fit_needs_no_landmarks() {
    let mut session = fitted(Protocol::new("p"));
    let fit_id = session.state.ledger.active_pose.clone().unwrap().id;
    let planned_pose = session.state.virtual_fit(&fit_id).unwrap().transform.clone();
    // Scanner frame far from the patient frame.
    let far = make_iso((0.5, -0.4, 1.0), (80.0, -40.0, 25.0));
    let skin = &session.require_input().unwrap().skin.mesh;
    let scan = scan_of(skin, &planned_pose, &far);
    assert!(scan.landmarks.is_none());

    let opts = TrackOptions {
        seed_from_active_pose: true,
        ..Default::default()
    };
    let id = step_track(&mut session, &scan, Some(opts)).unwrap();
    let tracked = session.state.tracking_result(&id).unwrap();
    assert!(!tracked.low_confidence, "confidence {}", tracked.confidence);
    let pose = tracked.transform().unwrap();
    assert!(distance_to_virtual_fit(&pose, &planned_pose) < 0.1);
    let rotation = (pose.iso().inverse() * planned_pose.iso()).rotation.angle();
    assert!(rotation < 0.1_f64.to_radians(), "{rotation} rad");
    let notes = session.log.last().unwrap().notes.clone().unwrap();
    assert!(notes.contains("seeded from the active pose"), "{notes}");
}

#[test]
fn seeding_from_the_active_pose_needs_one() {
    let mut session = fitted(Protocol::new("p"));
    let fit_id = session.state.ledger.active_pose.clone().unwrap().id;
    let planned_pose = session.state.virtual_fit(&fit_id).unwrap().transform.clone();
    let skin = &session.require_input().unwrap().skin.mesh;
    let scan = scan_of(skin, &planned_pose, &small_offset());
    revoke_pose(&mut session).unwrap();

    let opts = TrackOptions {
        seed_from_active_pose: true,
        ..Default::default()
    };
    let err = step_track(&mut session, &scan, Some(opts)).unwrap_err();
    assert!(matches!(planning_error(&err), PlanningError::StalePose(_)));
    assert!(session.state.tracking.is_empty());
    let last = session.log.last().unwrap();
    assert_eq!(last.operation, "track");
    assert!(!last.success);
}

#[test]
fn skin_limits_turn_on_skin_distances() {
    let mut protocol = Protocol::new("p");
    protocol.parameter_constraints.push(ParameterConstraint {
        quantity: SafetyQuantity::TargetSkinDistance,
        warning: Some(ConstraintRule::Range {
            min: Some(1.0),
            max: None,
            inclusive: true,
        }),
        error: None,
    });
    let mut session = fitted(protocol);
    let opts = PlanOptions {
        skin_distance: Some(false),
    };
    step_plan(&mut session, TARGET, Some(opts)).unwrap();
    let solution = session.output().unwrap();
    assert!(
        solution
            .points
            .iter()
            .all(|p| p.metrics.target_skin_distance_mm.is_some())
    );
    assert!(solution.worst(SafetyQuantity::TargetSkinDistance).is_some());
}

#[test]
fn warnings_need_acknowledgement() {
    let mut session = planned(focal_distance_warning());
    assert!(session.output().unwrap().analysis.requires_acknowledgement);

    let err = approve_solution(&mut session, false).unwrap_err();
    assert!(matches!(
        planning_error(&err),
        PlanningError::WarningsNotAcknowledged(1)
    ));
    approve_solution(&mut session, true).unwrap();
    let solution = session.output().unwrap();
    assert_eq!(solution.status, ApprovalStatus::Approved);
    assert_eq!(solution.unacknowledged_warnings(), 0);

    // Re-checking the same limits keeps the acknowledged approval.
    step_reanalyze(&mut session, None).unwrap();
    assert_eq!(session.output().unwrap().status, ApprovalStatus::Approved);
    step_handoff(&mut session, None).unwrap();
}

#[test]
fn reanalysis_with_a_new_warning_revokes_approval() {
    let mut session = planned(Protocol::new("p"));
    approve_solution(&mut session, false).unwrap();

    step_reanalyze(&mut session, Some(focal_distance_warning())).unwrap();
    let solution = session.output().unwrap();
    assert_eq!(solution.analysis.fatals, 0);
    assert_eq!(solution.unacknowledged_warnings(), 1);
    assert_eq!(solution.status, ApprovalStatus::Revoked);
    assert!(session.state.ledger.approved_solution.is_none());

    let err = step_handoff(&mut session, None).unwrap_err();
    assert!(matches!(planning_error(&err), PlanningError::HandoffRefused(_)));
    assert!(session.exports.is_empty());
}

#[test]
fn reanalysis_adopts_compatible_protocols_only() {
    let mut session = planned(Protocol::new("p"));
    step_reanalyze(&mut session, Some(Protocol::new("p2"))).unwrap();
    assert_eq!(session.output().unwrap().protocol_id, "p2");
    assert_eq!(session.require_input().unwrap().protocol.id, "p2");

    let mut quieter = Protocol::new("p3");
    quieter.pulse.amplitude = 0.5;
    let err = step_reanalyze(&mut session, Some(quieter)).unwrap_err();
    assert!(matches!(
        planning_error(&err),
        PlanningError::IncompatibleProtocol(_)
    ));
    assert_eq!(session.output().unwrap().protocol_id, "p2");
    assert_eq!(session.require_input().unwrap().protocol.id, "p2");
    let last = session.log.last().unwrap();
    assert_eq!(last.operation, "reanalyze");
    assert!(!last.success);
}

#[test]
fn failed_reanalysis_is_logged() {
    let mut session = TreatmentSession::new();
    session.set_input(input(Protocol::new("p"))).unwrap();
    assert!(step_reanalyze(&mut session, None).is_err());
    assert_eq!(session.log.last().unwrap().operation, "reanalyze");

    let mut session = planned(Protocol::new("p"));
    let mut broken = Protocol::new("p");
    broken.pulse.frequency_hz = 0.0;
    let err = step_reanalyze(&mut session, Some(broken)).unwrap_err();
    assert!(matches!(planning_error(&err), PlanningError::InvalidInput(_)));
    let last = session.log.last().unwrap();
    assert_eq!(last.operation, "reanalyze");
    assert!(!last.success);
    assert_eq!(session.require_input().unwrap().protocol.pulse.frequency_hz, 400e3);
}

#[test]
fn fatal_findings_block_approval() {
    let mut protocol = Protocol::new("p");
    protocol.parameter_constraints.push(ParameterConstraint {
        quantity: SafetyQuantity::MechanicalIndex,
        warning: None,
        error: Some(always_over(0.0)),
    });
    let mut session = planned(protocol);
    let err = approve_solution(&mut session, true).unwrap_err();
    assert!(matches!(planning_error(&err), PlanningError::FatalFindings(1)));
}

#[test]
fn reanalysis_with_a_fatal_limit_revokes_approval() {
    let mut session = planned(Protocol::new("p"));
    approve_solution(&mut session, false).unwrap();
    let before = session.output().unwrap().points.clone();

    let mut strict = Protocol::new("p");
    strict.parameter_constraints.push(ParameterConstraint {
        quantity: SafetyQuantity::FocalDistance,
        warning: None,
        error: Some(always_over(1.0)),
    });
    step_reanalyze(&mut session, Some(strict)).unwrap();
    let solution = session.output().unwrap();
    assert_eq!(solution.status, ApprovalStatus::Revoked);
    assert_eq!(solution.analysis.fatals, 1);
    assert_eq!(solution.points[0].elements, before[0].elements);
    assert!(session.state.ledger.approved_solution.is_none());

    let err = approve_solution(&mut session, true).unwrap_err();
    assert!(matches!(
        planning_error(&err),
        PlanningError::InvalidTransition { .. }
    ));
}

#[test]
fn session_survives_json() {
    let mut session = planned(Protocol::new("p"));
    approve_solution(&mut session, false).unwrap();
    let json = session.to_json().unwrap();
    let mut back = TreatmentSession::from_json(&json).unwrap();
    assert_eq!(back.output(), session.output());
    assert_eq!(back.state.ledger, session.state.ledger);
    let status = |s: &TreatmentSession| -> Vec<(String, ApprovalStatus)> {
        s.state.virtual_fits.iter().map(|r| (r.id.clone(), r.status)).collect()
    };
    assert_eq!(status(&back), status(&session));
    assert_eq!(back.log, session.log);
    // The reloaded session can still hand off.
    step_handoff(&mut back, None).unwrap();
}

#[test]
fn unknown_target_and_missing_input_are_errors() {
    let mut session = TreatmentSession::new();
    assert!(run_virtual_fit(&mut session, TARGET).is_err());
    session.set_input(input(Protocol::new("p"))).unwrap();
    let err = step_plan(&mut session, TARGET, None).unwrap_err();
    assert!(matches!(planning_error(&err), PlanningError::StalePose(_)));
    let err = run_virtual_fit(&mut session, "nope").unwrap_err();
    assert!(matches!(planning_error(&err), PlanningError::UnknownResult(_)));
}
