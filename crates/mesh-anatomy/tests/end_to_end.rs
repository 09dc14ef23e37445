//! End-to-end tests for mesh-anatomy.
//!
//! These exercise the components together: capture -> analysis -> measurement
//! -> volume -> augmentation -> save.

use approx::assert_relative_eq;
use mesh_anatomy::annotation::AnnotationEvent;
use mesh_anatomy::measure::{diameter, projection, symmetry_ratio};
use mesh_anatomy::raycast::ArtifactKind;
use mesh_anatomy::volume::{extract_region_mesh, hemisphere};
use mesh_anatomy::{
    AnalysisParams, AnatomyConfig, AnatomyError, AnatomySession, AnnotationCapture, AnnotationSet,
    AugmentationParams, BodyFrame, CaptureConfig, CaptureMode, Contour, Landmark, LengthUnit,
    MeasurementSource, Mesh, PointerEvent, Side, UnitScale, Vertex, VolumeMethod, analyze,
};
use nalgebra::{Point2, Point3};

/// Front-facing heightfield (Y up, Z forward) with two gaussian bumps at
/// x = ±0.4, y = 0.3.
fn create_chest(bump_height: f64) -> Mesh {
    let n = 41;
    let mut mesh = Mesh::new();
    for j in 0..n {
        for i in 0..n {
            let x = -1.0 + i as f64 * 0.05;
            let y = -1.0 + j as f64 * 0.05;
            let bump = |cx: f64| (-((x - cx).powi(2) + (y - 0.3).powi(2)) / 0.05).exp();
            let z = bump_height * (bump(0.4) + bump(-0.4));
            mesh.vertices.push(Vertex::from_coords(x, y, z));
        }
    }
    for j in 0..n - 1 {
        for i in 0..n - 1 {
            let a = (j * n + i) as u32;
            let b = a + 1;
            let c = a + n as u32;
            let d = c + 1;
            mesh.faces.push([a, b, d]);
            mesh.faces.push([a, d, c]);
        }
    }
    mesh.compute_normals();
    mesh
}

fn chest_config() -> AnatomyConfig {
    AnatomyConfig {
        analysis: AnalysisParams::default().with_forward_min(0.1),
        ..AnatomyConfig::default()
    }
}

/// Unindexed copy of `mesh`: every face gets its own three vertices.
fn triangle_soup(mesh: &Mesh) -> Mesh {
    let mut positions = Vec::with_capacity(mesh.face_count() * 9);
    let mut normals = Vec::with_capacity(mesh.face_count() * 9);
    for face in &mesh.faces {
        for &v in face {
            let vertex = &mesh.vertices[v as usize];
            let n = vertex.normal.expect("fixture has normals");
            positions.extend([vertex.position.x, vertex.position.y, vertex.position.z].map(|c| c as f32));
            normals.extend([n.x, n.y, n.z].map(|c| c as f32));
        }
    }
    Mesh::from_buffers(&positions, &normals, None).expect("soup buffers")
}

fn down() -> PointerEvent {
    PointerEvent::Down {
        ndc: Point2::origin(),
        modifier: false,
    }
}

fn up() -> PointerEvent {
    PointerEvent::Up { ndc: Point2::origin() }
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn hemisphere_volume_matches_analytic() {
    let radius = 2.0;
    let cap = hemisphere(Point3::origin(), radius, 64, 32);
    let all: Vec<u32> = (0..cap.vertex_count() as u32).collect();
    let region = extract_region_mesh(&cap, &all).expect("region");

    let expected = 2.0 / 3.0 * std::f64::consts::PI * radius.powi(3);
    let volume = region.volume();
    assert!(
        ((volume - expected) / expected).abs() < 0.05,
        "volume {volume} vs {expected}"
    );
}

#[test]
fn square_contour_projection_and_diameter() {
    let square = vec![
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(1.0, 0.0, 0.0),
        Point3::new(1.0, 1.0, 0.0),
        Point3::new(0.0, 1.0, 0.0),
    ];
    let contour = Contour::new(Side::Left, square).unwrap();
    let landmark = Point3::new(0.5, 0.5, 0.1);

    assert_relative_eq!(projection(&landmark, &contour), 0.1, epsilon = 1e-12);
    assert_relative_eq!(diameter(contour.points()), 2.0_f64.sqrt(), epsilon = 1e-12);
}

#[test]
fn symmetry_ratio_values() {
    assert_eq!(symmetry_ratio(10.0, 10.0), 100.0);
    assert_eq!(symmetry_ratio(5.0, 10.0), 50.0);
    assert_eq!(symmetry_ratio(0.0, 10.0), 0.0);
}

#[test]
fn analyzer_rejects_empty_and_normalless_meshes() {
    let frame = BodyFrame::default();
    let params = AnalysisParams::default();

    let err = analyze(&Mesh::new(), &frame, &params).unwrap_err();
    assert!(matches!(err, AnatomyError::EmptyMesh { .. }));
    assert!(err.is_precondition());

    let mut mesh = create_chest(0.3);
    mesh.vertices[7].normal = None;
    let err = analyze(&mesh, &frame, &params).unwrap_err();
    assert!(matches!(err, AnatomyError::MissingAttribute { .. }));
}

#[test]
fn switching_mode_discards_partial_contour() {
    let mut capture = AnnotationCapture::new(CaptureConfig::default());
    capture.begin_contour(Side::Left);
    for hit in [Point3::new(0.0, 0.0, 0.0), Point3::new(0.1, 0.0, 0.0)] {
        capture.handle_pointer(down(), Some(hit));
        capture.handle_pointer(up(), Some(hit));
    }
    assert_eq!(capture.in_progress_points().len(), 2);

    let events = capture.begin_landmark(Side::Right);
    assert!(events.contains(&AnnotationEvent::Discarded {
        mode: CaptureMode::DrawingContour(Side::Left),
        points: 2,
    }));
    assert_eq!(capture.mode(), CaptureMode::PlacingLandmark(Side::Right));
    assert!(capture.annotations().contour(Side::Left).is_none());
    assert_eq!(capture.overlay().of_kind(ArtifactKind::ContourHandle).count(), 0);

    capture.begin_contour(Side::Left);
    assert!(capture.in_progress_points().is_empty());
}

// =============================================================================
// Pipeline
// =============================================================================

#[test]
fn automatic_pipeline() {
    let mut session = AnatomySession::new(create_chest(0.3), chest_config()).unwrap();

    let analysis = session.run_analysis().unwrap();
    assert!(analysis.is_complete());

    let scale = session.calibrate(MeasurementSource::Automatic, 20.0).unwrap();
    assert_eq!(scale.unit(), LengthUnit::Centimeters);

    let set = session.measurements(MeasurementSource::Automatic).unwrap();
    assert_relative_eq!(set.landmark_distance.unwrap(), 20.0, epsilon = 1e-9);
    assert!(set.symmetry_ratio > 80.0, "symmetry {}", set.symmetry_ratio);
    assert!(set.inter_fold_width.unwrap() < set.chest_wall_width.unwrap());
    assert!(set.to_string().contains("cm"));

    let estimate = session
        .volumes(MeasurementSource::Automatic, VolumeMethod::Ellipsoid)
        .unwrap();
    assert!(estimate.total > 0.0);
    let integrated = session
        .volumes(MeasurementSource::Automatic, VolumeMethod::MeshIntegration)
        .unwrap();
    assert!(integrated.total > 0.0);

    let params = AugmentationParams::default().with_size_multiplier(1.2);
    let outcome = session.simulate(MeasurementSource::Automatic, &params).unwrap();
    assert_eq!(outcome.targets.len(), 2);
    assert!(outcome.after.total > outcome.before.total);
    assert!(outcome.volume_change() > 0.0);
    assert!(outcome.annotations.is_none());

    // A second run starts again from the source mesh.
    let first_max = outcome.max_displacement;
    let again = session.simulate(MeasurementSource::Automatic, &params).unwrap();
    assert_relative_eq!(again.max_displacement, first_max, epsilon = 1e-12);
}

#[test]
fn analysis_driven_in_chunks_matches_one_shot() {
    let mut stepped = AnatomySession::new(create_chest(0.3), chest_config()).unwrap();
    let mut job = stepped.analysis_job().unwrap();
    let mut steps = 0;
    while !job.step().is_complete() {
        steps += 1;
    }
    assert!(steps > 0);
    let field = job.finish().unwrap();
    let chunked = stepped.finish_analysis(&field).unwrap().clone();

    let mut direct = AnatomySession::new(create_chest(0.3), chest_config()).unwrap();
    let one_shot = direct.run_analysis().unwrap();

    assert_eq!(chunked.threshold, one_shot.threshold);
    assert_eq!(
        chunked.landmark(Side::Left).map(|l| l.position),
        one_shot.landmark(Side::Left).map(|l| l.position)
    );
}

#[test]
fn deformed_mesh_survives_save_and_load() {
    let mut session = AnatomySession::new(create_chest(0.3), chest_config()).unwrap();
    session.run_analysis().unwrap();
    let params = AugmentationParams::default().with_projection_multiplier(1.3);
    session.simulate(MeasurementSource::Automatic, &params).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("augmented.obj");
    session.mesh().save(&path).unwrap();

    let loaded = Mesh::load(&path).unwrap();
    assert_eq!(loaded.vertex_count(), session.mesh().vertex_count());
    assert_eq!(loaded.face_count(), session.mesh().face_count());
    for (a, b) in loaded.vertices.iter().zip(&session.mesh().vertices) {
        assert!((a.position - b.position).norm() < 1e-4);
    }
}

// =============================================================================
// Duplicated vertices
// =============================================================================

#[test]
fn triangle_soup_hemisphere_analyzes() {
    // 64 pole copies, more than one k-d tree bucket holds.
    let soup = triangle_soup(&hemisphere(Point3::origin(), 1.0, 64, 16));
    let pole_copies = soup
        .vertices
        .iter()
        .filter(|v| (v.position - Point3::new(0.0, 0.0, 1.0)).norm() < 1e-6)
        .count();
    assert_eq!(pole_copies, 64);

    let result = analyze(&soup, &BodyFrame::default(), &AnalysisParams::default()).unwrap();
    assert_eq!(result.features.len(), soup.vertex_count());
    assert!(result.features.iter().all(|f| f.curvature.is_finite()));
}

#[test]
fn triangle_soup_chest_runs_through_session() {
    let soup = triangle_soup(&create_chest(0.3));
    let mut session = AnatomySession::new(soup, chest_config()).unwrap();
    let analysis = session.run_analysis().unwrap();
    assert_eq!(analysis.features.len(), session.base_mesh().vertex_count());
}

// =============================================================================
// Simulation monotonicity
// =============================================================================

#[test]
fn larger_size_multiplier_never_shrinks_a_side() {
    let mut session = AnatomySession::new(create_chest(0.3), chest_config()).unwrap();
    session.run_analysis().unwrap();

    let mut previous: Option<(f64, f64)> = None;
    for size in [1.0, 1.1, 1.25, 1.5, 1.8] {
        let params = AugmentationParams::default().with_size_multiplier(size);
        let outcome = session.simulate(MeasurementSource::Automatic, &params).unwrap();
        let left = *outcome.after.sides.get(Side::Left).expect("left volume");
        let right = *outcome.after.sides.get(Side::Right).expect("right volume");
        if let Some((prev_left, prev_right)) = previous {
            assert!(left >= prev_left * (1.0 - 1e-9), "left {left} < {prev_left} at size {size}");
            assert!(right >= prev_right * (1.0 - 1e-9), "right {right} < {prev_right} at size {size}");
        }
        previous = Some((left, right));
    }
}

// =============================================================================
// Saved annotations
// =============================================================================

fn saved_annotations() -> AnnotationSet {
    let ring = |side: Side, cx: f64| {
        let points = (0..24)
            .map(|j| {
                let t = j as f64 / 24.0 * std::f64::consts::TAU;
                Point3::new(cx + 0.2 * t.cos(), 0.3 + 0.2 * t.sin(), 0.0)
            })
            .collect();
        Contour::new(side, points).unwrap()
    };
    let mut set = AnnotationSet::new();
    set.set_contour(ring(Side::Left, 0.4));
    set.set_contour(ring(Side::Right, -0.4));
    set.set_landmark(Landmark::manual(Side::Left, Point3::new(0.4, 0.3, 0.3)));
    set.set_landmark(Landmark::manual(Side::Right, Point3::new(-0.4, 0.3, 0.3)));
    set
}

#[test]
fn saved_annotations_reload_and_measure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("annotations.json");
    std::fs::write(&path, saved_annotations().to_json().unwrap()).unwrap();

    let loaded = AnnotationSet::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(loaded, saved_annotations());

    let mut session = AnatomySession::new(create_chest(0.3), chest_config()).unwrap();
    session.load_annotations(loaded);
    session.set_scale(UnitScale::centimeters(10.0).unwrap());
    let set = session.measurements(MeasurementSource::Manual).unwrap();
    assert_relative_eq!(set.landmark_distance.unwrap(), 8.0, epsilon = 1e-9);
    assert_relative_eq!(set.symmetry_ratio, 100.0, epsilon = 1e-9);
}

#[test]
fn saved_annotations_with_swapped_sides_are_rejected() {
    let json = saved_annotations().to_json().unwrap();
    let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
    // Move the right contour into the left slot.
    let right = value["contours"]["right"].take();
    value["contours"]["left"] = right;
    let tampered = serde_json::to_string(&value).unwrap();

    let err = AnnotationSet::from_json(&tampered).unwrap_err();
    assert!(err.to_string().contains("stored under left side is marked right"), "{err}");
}
