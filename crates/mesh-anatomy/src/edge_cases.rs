//! Edge case tests for degenerate and unusual inputs.
//!
//! Every public entry point should return an error or an empty result here,
//! never panic.

#[cfg(test)]
mod tests {
    use nalgebra::{Point2, Point3};

    use crate::analysis::{AnalysisParams, analyze};
    use crate::annotation::{
        AnnotationCapture, AnnotationEvent, AnnotationSet, CaptureConfig, CaptureSignal, Contour,
        PointerEvent,
    };
    use crate::augment::{AugmentConfig, AugmentationParams, DeformationTarget, augment};
    use crate::measure::{UnitScale, measure_annotations, symmetry_ratio};
    use crate::raycast::{OrthographicCamera, Scene};
    use crate::sizing::SizeChart;
    use crate::volume::{VolumeCalculation, VolumeMethod, ellipsoid_volume, extract_region_mesh, hemisphere};
    use crate::{AnatomyError, BodyFrame, Mesh, Side, Vertex};

    fn camera() -> OrthographicCamera {
        OrthographicCamera::new(Point3::new(0.0, 0.0, 5.0), Point3::origin(), 1.0)
    }

    // ==================== Empty Mesh Tests ====================

    #[test]
    fn test_empty_mesh_analyze() {
        let result = analyze(&Mesh::new(), &BodyFrame::default(), &AnalysisParams::default());
        assert!(matches!(result, Err(AnatomyError::EmptyMesh { .. })));
    }

    #[test]
    fn test_empty_mesh_augment() {
        let target = DeformationTarget::new(Side::Left, Point3::origin(), &BodyFrame::default(), 1.0);
        let result = augment(
            &Mesh::new(),
            &[target],
            &AugmentationParams::default(),
            &AugmentConfig::default(),
        );
        assert!(matches!(result, Err(AnatomyError::EmptyMesh { .. })));
    }

    #[test]
    fn test_empty_mesh_bounds() {
        assert!(Mesh::new().bounds().is_none());
        assert!(Mesh::new().check_geometry().is_ok());
    }

    #[test]
    fn test_empty_buffers() {
        let result = Mesh::from_buffers(&[], &[], None);
        assert!(matches!(result, Err(AnatomyError::EmptyMesh { .. })));
    }

    // ==================== Invalid Geometry Tests ====================

    #[test]
    fn test_nan_coordinate_rejected() {
        let positions = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, f32::NAN, 1.0, 0.0];
        let normals = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
        let result = Mesh::from_buffers(&positions, &normals, None);
        assert!(matches!(result, Err(AnatomyError::InvalidCoordinate { .. })));
    }

    #[test]
    fn test_index_past_vertex_count() {
        let positions = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let normals = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
        let result = Mesh::from_buffers(&positions, &normals, Some(&[0, 1, 3]));
        assert!(matches!(result, Err(AnatomyError::InvalidVertexIndex { .. })));
    }

    #[test]
    fn test_mismatched_normal_buffer() {
        let positions = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let result = Mesh::from_buffers(&positions, &[0.0, 0.0, 1.0], None);
        assert!(matches!(result, Err(AnatomyError::AttributeMismatch { .. })));
    }

    #[test]
    fn test_missing_normals_analyze() {
        let mut mesh = Mesh::new();
        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(0.0, 1.0, 0.0));
        mesh.faces.push([0, 1, 2]);
        let result = analyze(&mesh, &BodyFrame::default(), &AnalysisParams::default());
        assert!(matches!(result, Err(AnatomyError::MissingAttribute { .. })));
    }

    // ==================== Scene Tests ====================

    #[test]
    fn test_empty_scene_pick() {
        let scene = Scene::new();
        assert!(scene.pick(&camera(), Point2::origin()).is_none());
        assert!(matches!(
            scene.primary_surface(),
            Err(AnatomyError::NoSurfaceInScene { objects: 0 })
        ));
    }

    #[test]
    fn test_capture_without_surface() {
        let mut capture = AnnotationCapture::new(CaptureConfig::default());
        capture.begin_landmark(Side::Left);
        let result = capture.handle_pointer_in_scene(
            PointerEvent::Down {
                ndc: Point2::origin(),
                modifier: false,
            },
            &Scene::new(),
            &camera(),
        );
        assert!(matches!(result, Err(AnatomyError::NoSurfaceInScene { .. })));
    }

    #[test]
    fn test_pick_outside_viewport() {
        let (scene, _) = Scene::with_surface("cap", hemisphere(Point3::origin(), 1.0, 16, 8));
        assert!(scene.pick(&camera(), Point2::new(1.5, 0.0)).is_none());
    }

    // ==================== Annotation Tests ====================

    #[test]
    fn test_contour_too_few_points() {
        let result = Contour::new(Side::Right, vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)]);
        assert!(matches!(
            result,
            Err(AnatomyError::TooFewContourPoints {
                side: Side::Right,
                count: 2
            })
        ));
    }

    #[test]
    fn test_contour_non_finite_point() {
        let points = vec![
            Point3::origin(),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(f64::INFINITY, 1.0, 0.0),
        ];
        assert!(Contour::new(Side::Left, points).is_err());
    }

    #[test]
    fn test_idle_capture_ignores_pointer() {
        let mut capture = AnnotationCapture::new(CaptureConfig::default());
        let events = capture.handle_pointer(
            PointerEvent::Down {
                ndc: Point2::origin(),
                modifier: false,
            },
            Some(Point3::origin()),
        );
        assert!(events.is_empty());
        assert!(capture.signal(CaptureSignal::Finish).is_empty());
        assert!(capture.annotations().is_empty());
    }

    #[test]
    fn test_finish_with_no_points() {
        let mut capture = AnnotationCapture::new(CaptureConfig::default());
        capture.begin_contour(Side::Left);
        let events = capture.signal(CaptureSignal::Finish);
        assert!(events.iter().any(|e| matches!(
            e,
            AnnotationEvent::FinishIgnored {
                side: Side::Left,
                count: 0
            }
        )));
        assert!(capture.annotations().contour(Side::Left).is_none());
    }

    // ==================== Measurement Tests ====================

    #[test]
    fn test_measure_empty_annotations() {
        let set = measure_annotations(
            &AnnotationSet::new(),
            &BodyFrame::default(),
            &UnitScale::native(),
            &SizeChart::default(),
        );
        assert!(set.sides.is_empty());
        assert!(set.landmark_distance.is_none());
        assert!(set.inter_fold_width.is_none());
        assert_eq!(set.symmetry_ratio, 0.0);
        assert!(set.size_category.is_none());
    }

    #[test]
    fn test_invalid_scales() {
        for value in [0.0, -2.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                UnitScale::centimeters(value),
                Err(AnatomyError::InvalidScale { .. })
            ));
        }
        assert!(UnitScale::calibrate(0.0, 20.0).is_err());
        assert!(UnitScale::calibrate(2.0, 0.0).is_err());
    }

    #[test]
    fn test_degenerate_ratios() {
        assert_eq!(symmetry_ratio(0.0, 0.0), 0.0);
        assert_eq!(SizeChart::default().classify(f64::NAN), None);
        assert_eq!(SizeChart::default().classify(0.0), None);
    }

    // ==================== Volume Tests ====================

    #[test]
    fn test_volume_of_nothing() {
        let cap = hemisphere(Point3::origin(), 1.0, 16, 8);
        assert!(extract_region_mesh(&cap, &[]).is_none());
        assert_eq!(ellipsoid_volume(-1.0, 2.0), 0.0);
        assert_eq!(ellipsoid_volume(2.0, f64::NAN), 0.0);

        let volumes = VolumeCalculation::from_annotations(
            &cap,
            &AnnotationSet::new(),
            &BodyFrame::default(),
            &UnitScale::native(),
            &SizeChart::default(),
            VolumeMethod::MeshIntegration,
        );
        assert_eq!(volumes.total, 0.0);
        assert!(volumes.sides.is_empty());
    }

    // ==================== Augmentation Tests ====================

    #[test]
    fn test_neutral_params_change_nothing() {
        let cap = hemisphere(Point3::origin(), 1.0, 16, 8);
        let params = AugmentationParams::default();
        assert!(params.is_neutral());
        let target = DeformationTarget::new(Side::Left, Point3::new(0.0, 0.0, 1.0), &BodyFrame::default(), 1.5);
        let result = augment(&cap, &[target], &params, &AugmentConfig::default()).unwrap();
        assert_eq!(result.vertices_modified, 0);
        assert_eq!(result.max_displacement, 0.0);
        assert_eq!(result.mesh, cap);
    }

    #[test]
    fn test_no_targets() {
        let cap = hemisphere(Point3::origin(), 1.0, 16, 8);
        let params = AugmentationParams::default().with_size_multiplier(1.5);
        let result = augment(&cap, &[], &params, &AugmentConfig::default()).unwrap();
        assert_eq!(result.vertices_modified, 0);
        assert!(result.targets.is_empty());
    }

    #[test]
    fn test_zero_radius_target() {
        let cap = hemisphere(Point3::origin(), 1.0, 16, 8);
        let target = DeformationTarget::new(Side::Left, Point3::origin(), &BodyFrame::default(), 0.0);
        let result = augment(
            &cap,
            &[target],
            &AugmentationParams::default(),
            &AugmentConfig::default(),
        );
        assert!(matches!(result, Err(AnatomyError::InvalidParameter { .. })));
    }

    #[test]
    fn test_invalid_multiplier() {
        let cap = hemisphere(Point3::origin(), 1.0, 16, 8);
        let params = AugmentationParams::default().with_size_multiplier(f64::NAN);
        let result = augment(&cap, &[], &params, &AugmentConfig::default());
        assert!(matches!(result, Err(AnatomyError::InvalidParameter { .. })));
    }
}
