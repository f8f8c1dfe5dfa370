use fus_core::synthetic::arrays::planar_array;
use fus_core::synthetic::meshes::head_surface;
use fus_core::synthetic::noise::UniformPointNoise;
use fus_core::test_utils::{make_iso, pose_error};
use fus_core::{
    Frame, LengthUnit, PhotoscanMesh, Pt3, RigidTransform, SkinSurfaceMesh, Target, TriangleMesh,
};
use fus_registration::{
    IcpOptions, IcpPhase, IcpProblem, IcpState, TrackingInput, TrackingOptions,
    VirtualFitOptions, distance_to_virtual_fit, icp_step, register_tracking, run_icp, virtual_fit,
};

fn photoscan_from(skin: &TriangleMesh, scan_to_patient: &fus_core::Iso3) -> PhotoscanMesh {
    let inv = scan_to_patient.inverse();
    PhotoscanMesh {
        id: "scan".into(),
        mesh: TriangleMesh {
            vertices: skin.vertices.iter().map(|p| inv.transform_point(p)).collect(),
            triangles: skin.triangles.clone(),
        },
        units: LengthUnit::Millimeter,
        texture: None,
    }
}

#[test]
fn tracking_agrees_with_virtual_fit_placement() {
    let skin = SkinSurfaceMesh::new(head_surface()).unwrap();
    let transducer = planar_array(8, 8, 4.0, 10.0);
    let target = Target::new("t", Pt3::new(10.0, 30.0, 40.0));
    let fits = virtual_fit(
        "vf",
        &skin,
        &transducer,
        &target,
        &VirtualFitOptions::default(),
    )
    .unwrap();
    let planned = &fits[0].transform;

    // Photograph the patient wearing the transducer exactly where planned.
    let scan_to_patient = make_iso((0.01, 0.02, -0.015), (1.5, -1.0, 2.0));
    let scan = photoscan_from(&skin.mesh, &scan_to_patient);
    let transducer_in_scan = RigidTransform::from_iso(
        Frame::Transducer,
        Frame::Photoscan,
        scan_to_patient.inverse() * planned.iso(),
    );
    let input = TrackingInput {
        photoscan: &scan,
        skin: &skin,
        transducer_in_photoscan: &transducer_in_scan,
        seed: None,
        photoscan_landmarks: None,
        skin_landmarks: None,
    };
    let tracked = register_tracking("trk", &input, &TrackingOptions::default()).unwrap();
    let pose = tracked.transform().unwrap();
    assert!(distance_to_virtual_fit(&pose, planned) < 0.5);
    let (rot_deg, _) = pose_error(pose.iso(), planned.iso());
    assert!(rot_deg < 0.2);
}

#[test]
fn icp_tolerates_small_surface_noise() {
    let skin = head_surface();
    let truth = make_iso((0.0, 0.02, 0.01), (1.0, 1.0, -1.0));
    let mut scan = photoscan_from(&skin, &truth).mesh;
    scan.vertices = UniformPointNoise::new(11, 0.2).apply(0, &scan.vertices);
    let out = run_icp(&scan, &skin, fus_core::Iso3::identity(), &IcpOptions::default()).unwrap();
    let (rot_deg, trans) = pose_error(&out.transform, &truth);
    assert!(rot_deg < 0.5 && trans < 0.5, "{rot_deg} deg, {trans} mm");
}

#[test]
fn manual_stepping_matches_run_icp() {
    let skin = head_surface();
    let truth = make_iso((0.01, 0.0, 0.02), (0.5, -0.5, 1.0));
    let scan = photoscan_from(&skin, &truth).mesh;
    let opts = IcpOptions::default();
    let problem = IcpProblem::new(&scan, &skin, opts).unwrap();
    let mut state = IcpState::new(fus_core::Iso3::identity());
    while state.phase == IcpPhase::Searching {
        state = icp_step(&problem, &state);
    }
    let driven = run_icp(&scan, &skin, fus_core::Iso3::identity(), &opts).unwrap();
    assert_eq!(state.transform, driven.transform);
    assert_eq!(state.iteration, driven.iterations);
}
