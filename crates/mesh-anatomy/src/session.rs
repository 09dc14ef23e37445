//! One measurement session over one body mesh.
//!
//! [`AnatomySession`] owns the source mesh, the pickable scene, the capture
//! component, the unit scale and the latest analysis. The manual path
//! (contours and landmarks drawn by the user) and the automatic path
//! (detected regions) are kept apart: each measurement call names its
//! [`MeasurementSource`], and neither path reads the other's data.
//!
//! Simulations always start from the unmodified source mesh. The displayed
//! mesh is swapped in one step once the deformation is complete.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::analysis::{AnalysisResult, analyze_with_progress, classify};
use crate::annotation::{AnnotationCapture, AnnotationEvent, AnnotationSet, CaptureSignal, PointerEvent};
use crate::augment::{
    AugmentationParams, DeformationTarget, augment, displace_annotations, targets_from_analysis,
    targets_from_annotations,
};
use crate::config::AnatomyConfig;
use crate::curvature::{CurvatureField, CurvatureJob};
use crate::error::{AnatomyError, AnatomyResult};
use crate::measure::{MeasurementSet, UnitScale, distance, measure_annotations, measure_regions};
use crate::progress::ProgressCallback;
use crate::raycast::{Camera, ObjectId, Scene};
use crate::types::{Mesh, Side, SideMap};
use crate::volume::{RegionMesh, VolumeCalculation, VolumeMethod, extract_region_mesh};

/// Which annotation path a measurement reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementSource {
    /// User-drawn contours and landmarks.
    #[default]
    Manual,
    /// Regions and landmarks from the last analysis.
    Automatic,
}

impl fmt::Display for MeasurementSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementSource::Manual => f.write_str("manual"),
            MeasurementSource::Automatic => f.write_str("automatic"),
        }
    }
}

/// Result of one simulation pass.
#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    pub source: MeasurementSource,
    pub params: AugmentationParams,
    /// Integrated volumes of the affected regions before deformation.
    pub before: VolumeCalculation,
    /// The same regions after deformation.
    pub after: VolumeCalculation,
    pub vertices_modified: usize,
    pub max_displacement: f64,
    /// Targets with their centers moved onto the deformed surface.
    pub targets: Vec<DeformationTarget>,
    /// Manual annotations carried onto the deformed surface.
    pub annotations: Option<AnnotationSet>,
}

impl SimulationOutcome {
    /// Relative change of the total volume, in percent.
    pub fn volume_change(&self) -> f64 {
        if self.before.total > 0.0 {
            (self.after.total - self.before.total) / self.before.total * 100.0
        } else {
            0.0
        }
    }
}

pub struct AnatomySession {
    config: AnatomyConfig,
    base_mesh: Mesh,
    scene: Scene,
    surface: ObjectId,
    capture: AnnotationCapture,
    scale: UnitScale,
    analysis: Option<AnalysisResult>,
    simulation: Option<SimulationOutcome>,
}

impl AnatomySession {
    /// Start a session over `mesh`.
    ///
    /// # Errors
    ///
    /// - [`AnatomyError::EmptyMesh`] for a mesh without vertices or faces
    /// - geometry errors from [`Mesh::check_geometry`]
    /// - [`AnatomyError::InvalidParameter`] for an invalid configuration
    pub fn new(mesh: Mesh, config: AnatomyConfig) -> AnatomyResult<Self> {
        if mesh.is_empty() {
            return Err(AnatomyError::empty_mesh("session mesh has no vertices or faces"));
        }
        mesh.check_geometry()?;
        config.validate()?;

        let (scene, surface) = Scene::with_surface("body", mesh.clone());
        info!(
            target: "mesh_anatomy::session",
            vertices = mesh.vertex_count(),
            faces = mesh.face_count(),
            "Session started"
        );
        Ok(Self {
            capture: AnnotationCapture::new(config.capture.clone()),
            config,
            base_mesh: mesh,
            scene,
            surface,
            scale: UnitScale::native(),
            analysis: None,
            simulation: None,
        })
    }

    pub fn config(&self) -> &AnatomyConfig {
        &self.config
    }

    /// The unmodified source mesh.
    pub fn base_mesh(&self) -> &Mesh {
        &self.base_mesh
    }

    /// The mesh currently shown: the last simulation result, or the source.
    pub fn mesh(&self) -> &Mesh {
        self.scene
            .get(self.surface)
            .map_or(&self.base_mesh, |object| &object.mesh)
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn capture(&self) -> &AnnotationCapture {
        &self.capture
    }

    pub fn annotations(&self) -> &AnnotationSet {
        self.capture.annotations()
    }

    pub fn analysis(&self) -> Option<&AnalysisResult> {
        self.analysis.as_ref()
    }

    pub fn simulation(&self) -> Option<&SimulationOutcome> {
        self.simulation.as_ref()
    }

    pub fn scale(&self) -> UnitScale {
        self.scale
    }

    // ------------------------------------------------------------------------
    // Annotation capture
    // ------------------------------------------------------------------------

    /// Start drawing a contour. Annotations are always made on the source
    /// anatomy, so an active simulation is reset first.
    pub fn begin_contour(&mut self, side: Side) -> AnatomyResult<Vec<AnnotationEvent>> {
        self.reset_simulation()?;
        Ok(self.capture.begin_contour(side))
    }

    /// Start placing a landmark; resets an active simulation like
    /// [`AnatomySession::begin_contour`].
    pub fn begin_landmark(&mut self, side: Side) -> AnatomyResult<Vec<AnnotationEvent>> {
        self.reset_simulation()?;
        Ok(self.capture.begin_landmark(side))
    }

    pub fn handle_pointer(&mut self, event: PointerEvent, camera: &dyn Camera) -> AnatomyResult<Vec<AnnotationEvent>> {
        self.capture.handle_pointer_in_scene(event, &self.scene, camera)
    }

    pub fn signal(&mut self, signal: CaptureSignal) -> Vec<AnnotationEvent> {
        self.capture.signal(signal)
    }

    pub fn load_annotations(&mut self, annotations: AnnotationSet) -> Vec<AnnotationEvent> {
        self.capture.load_annotations(annotations)
    }

    // ------------------------------------------------------------------------
    // Analysis
    // ------------------------------------------------------------------------

    pub fn run_analysis(&mut self) -> AnatomyResult<&AnalysisResult> {
        self.run_analysis_with_progress(None)
    }

    pub fn run_analysis_with_progress(
        &mut self,
        callback: Option<&ProgressCallback>,
    ) -> AnatomyResult<&AnalysisResult> {
        let result = analyze_with_progress(&self.base_mesh, &self.config.frame, &self.config.analysis, callback)?;
        Ok(self.analysis.insert(result))
    }

    /// A resumable curvature job over the source mesh, for hosts that want to
    /// interleave it with their own event loop. Hand the finished field to
    /// [`AnatomySession::finish_analysis`].
    pub fn analysis_job(&self) -> AnatomyResult<CurvatureJob<'_>> {
        self.config.analysis.validate()?;
        CurvatureJob::new(&self.base_mesh, &self.config.frame, self.config.analysis.curvature.clone())
    }

    pub fn finish_analysis(&mut self, field: &CurvatureField) -> AnatomyResult<&AnalysisResult> {
        let result = classify(&self.base_mesh, &self.config.frame, &self.config.analysis, field)?;
        Ok(self.analysis.insert(result))
    }

    fn require_analysis(&self, operation: &'static str) -> AnatomyResult<&AnalysisResult> {
        self.analysis
            .as_ref()
            .ok_or(AnatomyError::AnalysisRequired { operation })
    }

    // ------------------------------------------------------------------------
    // Measurement
    // ------------------------------------------------------------------------

    pub fn set_scale(&mut self, scale: UnitScale) {
        self.scale = scale;
    }

    /// Derive the unit scale from the real distance between the source's
    /// two landmarks.
    ///
    /// # Errors
    ///
    /// [`AnatomyError::MissingAnnotation`] when a landmark is absent,
    /// [`AnatomyError::AnalysisRequired`] for the automatic source before any
    /// analysis, and [`AnatomyError::InvalidScale`] for a non-positive result.
    pub fn calibrate(&mut self, source: MeasurementSource, real_cm: f64) -> AnatomyResult<UnitScale> {
        let landmarks = match source {
            MeasurementSource::Manual => &self.capture.annotations().landmarks,
            MeasurementSource::Automatic => &self.require_analysis("calibrate")?.landmarks,
        };
        let (left, right) = landmark_pair(landmarks.map(|_, l| l.position))?;
        let scale = UnitScale::calibrate(distance(&left, &right), real_cm)?;
        info!(
            target: "mesh_anatomy::session",
            source = %source,
            factor = format!("{:.4}", scale.factor()),
            "Scale calibrated"
        );
        self.scale = scale;
        Ok(scale)
    }

    pub fn measurements(&self, source: MeasurementSource) -> AnatomyResult<MeasurementSet> {
        Ok(match source {
            MeasurementSource::Manual => measure_annotations(
                self.capture.annotations(),
                &self.config.frame,
                &self.scale,
                &self.config.sizing,
            ),
            MeasurementSource::Automatic => {
                measure_regions(self.require_analysis("measure")?, &self.scale, &self.config.sizing)
            }
        })
    }

    /// Volumes over the source mesh.
    pub fn volumes(&self, source: MeasurementSource, method: VolumeMethod) -> AnatomyResult<VolumeCalculation> {
        Ok(match source {
            MeasurementSource::Manual => VolumeCalculation::from_annotations(
                &self.base_mesh,
                self.capture.annotations(),
                &self.config.frame,
                &self.scale,
                &self.config.sizing,
                method,
            ),
            MeasurementSource::Automatic => VolumeCalculation::from_regions(
                &self.base_mesh,
                self.require_analysis("volumes")?,
                &self.scale,
                &self.config.sizing,
                method,
            ),
        })
    }

    // ------------------------------------------------------------------------
    // Simulation
    // ------------------------------------------------------------------------

    /// Deform the source mesh and publish the result.
    ///
    /// Volumes are recomputed in full on every call by integrating the same
    /// source vertex set before and after deformation.
    ///
    /// # Errors
    ///
    /// [`AnatomyError::MissingAnnotation`] when the source yields no target,
    /// plus any error from [`augment`].
    pub fn simulate(
        &mut self,
        source: MeasurementSource,
        params: &AugmentationParams,
    ) -> AnatomyResult<&SimulationOutcome> {
        let span = crate::mesh_span!("simulate", self.base_mesh, source = %source);
        let _enter = span.enter();
        let frame = &self.config.frame;
        let augment_config = &self.config.augment;
        let targets = match source {
            MeasurementSource::Manual => {
                targets_from_annotations(&self.base_mesh, self.capture.annotations(), frame, augment_config)?
            }
            MeasurementSource::Automatic => {
                targets_from_analysis(&self.base_mesh, self.require_analysis("simulate")?, augment_config)?
            }
        };
        if targets.is_empty() {
            return Err(AnatomyError::MissingAnnotation {
                what: match source {
                    MeasurementSource::Manual => "contour",
                    MeasurementSource::Automatic => "region",
                },
                side: Side::Left,
            });
        }

        let mut before_regions = SideMap::new();
        for t in &targets {
            if let Some(region) = RegionMesh::around(&self.base_mesh, &t.center, t.radius) {
                before_regions.set(t.side, region);
            }
        }

        let result = augment(&self.base_mesh, &targets, params, augment_config)?;

        let after_regions = before_regions.map(|_, before| {
            extract_region_mesh(&result.mesh, &before.source_vertices).map(|mut after| {
                after.base_origin = before.base_origin;
                after
            })
        });
        let after_regions = SideMap {
            left: after_regions.left.flatten(),
            right: after_regions.right.flatten(),
        };

        let before = VolumeCalculation::from_region_meshes(&before_regions, &self.scale, &self.config.sizing);
        let after = VolumeCalculation::from_region_meshes(&after_regions, &self.scale, &self.config.sizing);

        let annotations = match source {
            MeasurementSource::Manual => Some(displace_annotations(
                self.capture.annotations(),
                &targets,
                params,
                augment_config,
            )?),
            MeasurementSource::Automatic => None,
        };

        self.scene.replace_surface_mesh(self.surface, result.mesh)?;

        let outcome = SimulationOutcome {
            source,
            params: *params,
            before,
            after,
            vertices_modified: result.vertices_modified,
            max_displacement: result.max_displacement,
            targets: result.targets,
            annotations,
        };
        info!(
            target: "mesh_anatomy::session",
            source = %source,
            vertices_modified = outcome.vertices_modified,
            volume_before = format!("{:.3}", outcome.before.total),
            volume_after = format!("{:.3}", outcome.after.total),
            "Simulation published"
        );
        Ok(self.simulation.insert(outcome))
    }

    /// Show the source mesh again.
    pub fn reset_simulation(&mut self) -> AnatomyResult<()> {
        if self.simulation.take().is_some() {
            self.scene.replace_surface_mesh(self.surface, self.base_mesh.clone())?;
        }
        Ok(())
    }
}

fn landmark_pair(positions: SideMap<Point3<f64>>) -> AnatomyResult<(Point3<f64>, Point3<f64>)> {
    match (positions.left, positions.right) {
        (Some(l), Some(r)) => Ok((l, r)),
        (None, _) => Err(AnatomyError::MissingAnnotation {
            what: "landmark",
            side: Side::Left,
        }),
        (_, None) => {
            warn!(target: "mesh_anatomy::session", "Calibration needs both landmarks");
            Err(AnatomyError::MissingAnnotation {
                what: "landmark",
                side: Side::Right,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{Contour, Landmark};
    use crate::measure::LengthUnit;
    use crate::raycast::OrthographicCamera;
    use crate::volume::hemisphere;
    use approx::assert_relative_eq;
    use nalgebra::Point2;

    /// Two hemispheres side by side, facing +Z.
    fn two_caps() -> Mesh {
        let mut mesh = hemisphere(Point3::new(1.5, 0.0, 0.0), 1.0, 32, 16);
        let right = hemisphere(Point3::new(-1.5, 0.0, 0.0), 1.0, 32, 16);
        let offset = mesh.vertex_count() as u32;
        mesh.vertices.extend(right.vertices);
        mesh.faces
            .extend(right.faces.iter().map(|f| [f[0] + offset, f[1] + offset, f[2] + offset]));
        mesh
    }

    fn ring(side: Side, cx: f64) -> Contour {
        let points = (0..32)
            .map(|j| {
                let t = j as f64 / 32.0 * std::f64::consts::TAU;
                Point3::new(cx + t.cos(), t.sin(), 0.0)
            })
            .collect();
        Contour::new(side, points).unwrap()
    }

    fn annotated_session() -> AnatomySession {
        let mut session = AnatomySession::new(two_caps(), AnatomyConfig::default()).unwrap();
        let mut set = AnnotationSet::new();
        set.set_contour(ring(Side::Left, 1.5));
        set.set_contour(ring(Side::Right, -1.5));
        set.set_landmark(Landmark::manual(Side::Left, Point3::new(1.5, 0.0, 1.0)));
        set.set_landmark(Landmark::manual(Side::Right, Point3::new(-1.5, 0.0, 1.0)));
        session.load_annotations(set);
        session
    }

    #[test]
    fn test_empty_mesh_rejected() {
        assert!(matches!(
            AnatomySession::new(Mesh::new(), AnatomyConfig::default()),
            Err(AnatomyError::EmptyMesh { .. })
        ));
    }

    #[test]
    fn test_automatic_requires_analysis() {
        let session = annotated_session();
        assert!(matches!(
            session.measurements(MeasurementSource::Automatic),
            Err(AnatomyError::AnalysisRequired { operation: "measure" })
        ));
        assert!(session.measurements(MeasurementSource::Manual).is_ok());
    }

    #[test]
    fn test_calibrate_from_landmarks() {
        let mut session = annotated_session();
        // Landmarks are 3 units apart.
        let scale = session.calibrate(MeasurementSource::Manual, 18.0).unwrap();
        assert_relative_eq!(scale.factor(), 6.0, epsilon = 1e-12);

        let set = session.measurements(MeasurementSource::Manual).unwrap();
        assert_eq!(set.unit, LengthUnit::Centimeters);
        assert_relative_eq!(set.landmark_distance.unwrap(), 18.0, epsilon = 1e-9);
        assert_relative_eq!(set.side(Side::Left).unwrap().projection.unwrap(), 6.0, epsilon = 1e-9);
    }

    #[test]
    fn test_calibrate_missing_landmark() {
        let mut session = AnatomySession::new(two_caps(), AnatomyConfig::default()).unwrap();
        assert!(matches!(
            session.calibrate(MeasurementSource::Manual, 18.0),
            Err(AnatomyError::MissingAnnotation { what: "landmark", .. })
        ));
    }

    #[test]
    fn test_simulate_publishes_and_resets() {
        let mut session = annotated_session();
        let params = AugmentationParams::default().with_size_multiplier(1.25);
        let outcome = session.simulate(MeasurementSource::Manual, &params).unwrap();
        assert!(outcome.vertices_modified > 0);
        assert!(outcome.after.total > outcome.before.total);
        assert!(outcome.volume_change() > 0.0);
        let moved = outcome.annotations.as_ref().unwrap();
        assert!(moved.landmark(Side::Left).unwrap().position.z > 1.0);

        assert_ne!(session.mesh(), session.base_mesh());
        // Stored annotations stay on the source anatomy.
        assert_eq!(session.annotations().landmark(Side::Left).unwrap().position.z, 1.0);

        session.reset_simulation().unwrap();
        assert_eq!(session.mesh(), session.base_mesh());
        assert!(session.simulation().is_none());
    }

    #[test]
    fn test_simulate_without_targets() {
        let mut session = AnatomySession::new(two_caps(), AnatomyConfig::default()).unwrap();
        assert!(matches!(
            session.simulate(MeasurementSource::Manual, &AugmentationParams::default()),
            Err(AnatomyError::MissingAnnotation { what: "contour", .. })
        ));
    }

    #[test]
    fn test_drawing_resets_simulation() {
        let mut session = annotated_session();
        let params = AugmentationParams::default().with_projection_multiplier(1.3);
        session.simulate(MeasurementSource::Manual, &params).unwrap();
        session.begin_landmark(Side::Left).unwrap();
        assert!(session.simulation().is_none());
        assert_eq!(session.mesh(), session.base_mesh());
    }

    #[test]
    fn test_pointer_places_landmark() {
        let mut session = AnatomySession::new(two_caps(), AnatomyConfig::default()).unwrap();
        let camera = OrthographicCamera::new(Point3::new(1.5, 0.0, 5.0), Point3::new(1.5, 0.0, 0.0), 2.0);
        session.begin_landmark(Side::Left).unwrap();
        let ndc = Point2::new(0.1, 0.1);
        session
            .handle_pointer(PointerEvent::Down { ndc, modifier: false }, &camera)
            .unwrap();
        session.handle_pointer(PointerEvent::Up { ndc }, &camera).unwrap();

        let landmark = session.annotations().landmark(Side::Left).unwrap();
        assert_relative_eq!(landmark.position.x, 1.7, epsilon = 1e-9);
        assert_relative_eq!(landmark.position.y, 0.2, epsilon = 1e-9);
        assert!(landmark.position.z > 0.9 && landmark.position.z <= 1.0);
    }
}
