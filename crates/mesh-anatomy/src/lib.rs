//! Anatomical measurement and augmentation on triangle meshes of the torso.
//!
//! This crate picks points on a displayed body mesh, captures user annotations,
//! detects breast regions from surface curvature, measures them, and deforms
//! the mesh to preview augmentation.
//!
//! # Features
//!
//! - **Surface query**: Ray-pick a scene from screen coordinates, skipping tool overlays
//! - **Annotation capture**: Contours and landmarks drawn with pointer events
//! - **Feature analysis**: Curvature-based region and landmark detection, resumable in chunks
//! - **Measurement**: Distances, widths, circumferences, projection, symmetry, size category
//! - **Volume**: Ellipsoid estimate or signed-tetrahedron integration
//! - **Augmentation**: Falloff-weighted displacement with shape and profile presets
//! - **File I/O**: Load and save STL and OBJ
//!
//! # Units
//!
//! Meshes carry no units. Every measurement is reported in mesh units until a
//! [`UnitScale`] is set, either directly or by calibrating against a known
//! real distance between the two landmarks. Size categories are assigned only
//! to centimeter measurements.
//!
//! # Coordinate System
//!
//! Anatomical directions come from a [`BodyFrame`]. The default is Y up with
//! the subject facing +Z and their left at +X, which matches most generated
//! meshes. Scanner output is often Z up; use [`BodyFrame::z_up`] for that.
//!
//! # Quick Start
//!
//! ```no_run
//! use mesh_anatomy::{AnatomyConfig, AnatomySession, AugmentationParams, MeasurementSource, Mesh};
//!
//! let mesh = Mesh::load("torso.obj").unwrap();
//! let mut session = AnatomySession::new(mesh, AnatomyConfig::default()).unwrap();
//!
//! let analysis = session.run_analysis().unwrap();
//! println!("threshold {:.4}", analysis.threshold.value);
//!
//! // Nipple-to-nipple distance is 20 cm on this subject.
//! session.calibrate(MeasurementSource::Automatic, 20.0).unwrap();
//! println!("{}", session.measurements(MeasurementSource::Automatic).unwrap());
//!
//! let params = AugmentationParams::default().with_size_multiplier(1.2);
//! let outcome = session.simulate(MeasurementSource::Automatic, &params).unwrap();
//! println!("volume change {:+.1}%", outcome.volume_change());
//! session.mesh().save("augmented.obj").unwrap();
//! ```
//!
//! # Common Workflows
//!
//! ## Manual Measurement
//!
//! ```no_run
//! use mesh_anatomy::{AnnotationSet, BodyFrame, SizeChart, UnitScale, measure_annotations};
//!
//! let json = std::fs::read_to_string("annotations.json").unwrap();
//! let annotations = AnnotationSet::from_json(&json).unwrap();
//!
//! let scale = UnitScale::centimeters(10.0).unwrap();
//! let set = measure_annotations(&annotations, &BodyFrame::default(), &scale, &SizeChart::default());
//! println!("symmetry {:.2}", set.symmetry_ratio);
//! ```
//!
//! ## Driving the Analysis from an Event Loop
//!
//! ```no_run
//! use mesh_anatomy::{AnatomyConfig, AnatomySession, Mesh};
//!
//! let mesh = Mesh::load("torso.stl").unwrap();
//! let mut session = AnatomySession::new(mesh, AnatomyConfig::default()).unwrap();
//!
//! let mut job = session.analysis_job().unwrap();
//! while !job.step().is_complete() {
//!     // redraw, poll input, ...
//! }
//! let field = job.finish().unwrap();
//! session.finish_analysis(&field).unwrap();
//! ```
//!
//! # Error Handling
//!
//! Most operations return `AnatomyResult<T>`, which is `Result<T, AnatomyError>`.
//!
//! ```
//! use mesh_anatomy::{AnatomyError, Mesh};
//!
//! match Mesh::load("nonexistent.stl") {
//!     Ok(_) => println!("Loaded successfully"),
//!     Err(AnatomyError::IoRead { path, source }) => {
//!         println!("Failed to read {:?}: {}", path, source);
//!     }
//!     Err(AnatomyError::UnsupportedFormat { extension }) => {
//!         println!("Unsupported format: {:?}", extension);
//!     }
//!     Err(e) => println!("Other error: {}", e),
//! }
//! ```
//!
//! # Supported Formats
//!
//! | Format | Extension | Load | Save | Index Preservation | Notes |
//! |--------|-----------|------|------|-------------------|-------|
//! | STL    | `.stl`    | ✓    | ✓    | ✗                 | Binary & ASCII, vertices welded on load |
//! | OBJ    | `.obj`    | ✓    | ✓    | ✓                 | ASCII, keeps normals when present |

mod error;
pub mod tracing_ext;
pub mod types;

#[cfg(test)]
mod edge_cases;

pub mod analysis;
pub mod annotation;
pub mod augment;
pub mod config;
pub mod curvature;
pub mod io;
pub mod measure;
pub mod normals;
pub mod progress;
pub mod raycast;
pub mod session;
pub mod sizing;
pub mod spatial;
pub mod volume;

// Re-export core types at crate root
pub use error::{AnatomyError, AnatomyResult, ErrorCode, MeshLocation, RecoverySuggestion};
pub use types::{Aabb, Axis, BodyFrame, Mesh, Side, SideMap, Triangle, Vertex};

pub use io::{MeshFormat, load_mesh, save_mesh};

pub use raycast::{
    ArtifactKind, Camera, ObjectId, ObjectRole, OrthographicCamera, PerspectiveCamera, Ray, Scene,
    SceneObject, SurfaceHit,
};

pub use annotation::{
    AnnotationCapture, AnnotationEvent, AnnotationSet, CaptureConfig, CaptureMode, CaptureSignal,
    Contour, Landmark, LandmarkPlacement, LandmarkSource, PointerEvent,
};

pub use analysis::{
    AnalysisParams, AnalysisResult, CurvatureThreshold, LandmarkStrategy, Region, ThresholdSource,
    VertexFeature, analyze, analyze_with_progress,
};
pub use curvature::{CurvatureField, CurvatureJob, CurvatureParams};

pub use measure::{
    LengthUnit, MeasurementSet, SideMeasurements, UnitScale, measure_annotations, measure_regions,
};
pub use sizing::{SizeBasis, SizeCategory, SizeChart};
pub use volume::{RegionMesh, VolumeCalculation, VolumeMethod};

pub use augment::{
    AugmentConfig, AugmentResult, AugmentationParams, DeformationTarget, ImplantProfile,
    ImplantShape, augment,
};

pub use config::{AnatomyConfig, ConfigError};
pub use session::{AnatomySession, MeasurementSource, SimulationOutcome};

// Re-export progress tracking types for long-running operations
pub use progress::{JobStatus, Progress, ProgressCallback, ProgressTracker};

// Re-export tracing extensions for structured logging and performance monitoring
pub use tracing_ext::{
    OperationTimer, log_analysis_result, log_io_operation, log_measurements, log_mesh_stats,
    log_perf_section, log_progress, log_volume,
};

// Convenience methods on Mesh
impl Mesh {
    /// Load a mesh from a file, auto-detecting format from extension.
    pub fn load(path: impl AsRef<std::path::Path>) -> AnatomyResult<Self> {
        io::load_mesh(path.as_ref())
    }

    /// Save the mesh to a file, auto-detecting format from extension.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> AnatomyResult<()> {
        io::save_mesh(self, path.as_ref())
    }

    /// Compute vertex normals from face normals (area-weighted average).
    pub fn compute_normals(&mut self) {
        normals::compute_vertex_normals(self)
    }

    /// Detect regions and landmarks with default parameters.
    ///
    /// For more control, use [`analyze`] or an [`AnatomySession`].
    pub fn analyze(&self, frame: &BodyFrame) -> AnatomyResult<AnalysisResult> {
        analysis::analyze(self, frame, &AnalysisParams::default())
    }
}
