//! Error types for anatomical measurement and simulation with rich diagnostics.
//!
//! This module provides:
//! - Machine-readable error codes for programmatic handling
//! - Context (which vertex, which side, which parameter)
//! - Recovery suggestions for common issues
//! - Terminal display via miette
//!
//! # Error Codes
//!
//! Each error has a unique code in the format `ANAT-XXXX`:
//! - `ANAT-1xxx`: I/O errors (file reading, writing, parsing)
//! - `ANAT-2xxx`: Geometry precondition errors (empty mesh, missing attributes)
//! - `ANAT-3xxx`: Annotation errors (contours, landmarks, scene)
//! - `ANAT-4xxx`: Analysis and simulation errors (parameters, cancellation)
//!
//! Degenerate-but-recoverable outcomes (a side without a region, a missing
//! automatic landmark) are not errors; they surface as `None` in results.
//!
//! # Example
//!
//! ```rust,ignore
//! use mesh_anatomy::{AnatomyError, ErrorCode};
//!
//! let err = AnatomyError::missing_attribute("normal", 1200);
//! println!("Error code: {}", err.code()); // ANAT-2004
//! println!("Recovery: {}", err.recovery_suggestion());
//! ```

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

use crate::types::Side;

/// Result type alias for anatomy operations.
pub type AnatomyResult<T> = Result<T, AnatomyError>;

/// Machine-readable error codes.
///
/// Codes follow the pattern `ANAT-XXXX` where:
/// - 1xxx = I/O errors
/// - 2xxx = Geometry precondition errors
/// - 3xxx = Annotation errors
/// - 4xxx = Analysis and simulation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // I/O errors (1xxx)
    /// ANAT-1001: Failed to read file
    IoRead = 1001,
    /// ANAT-1002: Failed to write file
    IoWrite = 1002,
    /// ANAT-1003: Failed to parse file format
    ParseError = 1003,
    /// ANAT-1004: Unsupported file format
    UnsupportedFormat = 1004,

    // Geometry precondition errors (2xxx)
    /// ANAT-2001: Face references invalid vertex index
    InvalidVertexIndex = 2001,
    /// ANAT-2002: Vertex has NaN or Infinity coordinate
    InvalidCoordinate = 2002,
    /// ANAT-2003: Mesh has no vertices or faces
    EmptyMesh = 2003,
    /// ANAT-2004: Required per-vertex attribute is absent
    MissingAttribute = 2004,
    /// ANAT-2005: Attribute buffers disagree in length
    AttributeMismatch = 2005,

    // Annotation errors (3xxx)
    /// ANAT-3001: Contour has fewer than 3 points
    TooFewContourPoints = 3001,
    /// ANAT-3002: Scene holds no pickable surface
    NoSurfaceInScene = 3002,
    /// ANAT-3003: Annotation required by the operation is absent
    MissingAnnotation = 3003,
    /// ANAT-3004: Annotation is stored under the other side's key
    AnnotationSideMismatch = 3004,

    // Analysis and simulation errors (4xxx)
    /// ANAT-4001: Parameter out of its valid range
    InvalidParameter = 4001,
    /// ANAT-4002: Scale factor is not a positive finite number
    InvalidScale = 4002,
    /// ANAT-4003: Long-running pass was cancelled by its progress callback
    Cancelled = 4003,
    /// ANAT-4004: Automatic measurement requested before any analysis ran
    AnalysisRequired = 4004,
}

impl ErrorCode {
    /// Returns the error code as a string in the format `ANAT-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::IoRead => "ANAT-1001",
            ErrorCode::IoWrite => "ANAT-1002",
            ErrorCode::ParseError => "ANAT-1003",
            ErrorCode::UnsupportedFormat => "ANAT-1004",
            ErrorCode::InvalidVertexIndex => "ANAT-2001",
            ErrorCode::InvalidCoordinate => "ANAT-2002",
            ErrorCode::EmptyMesh => "ANAT-2003",
            ErrorCode::MissingAttribute => "ANAT-2004",
            ErrorCode::AttributeMismatch => "ANAT-2005",
            ErrorCode::TooFewContourPoints => "ANAT-3001",
            ErrorCode::NoSurfaceInScene => "ANAT-3002",
            ErrorCode::MissingAnnotation => "ANAT-3003",
            ErrorCode::AnnotationSideMismatch => "ANAT-3004",
            ErrorCode::InvalidParameter => "ANAT-4001",
            ErrorCode::InvalidScale => "ANAT-4002",
            ErrorCode::Cancelled => "ANAT-4003",
            ErrorCode::AnalysisRequired => "ANAT-4004",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recovery suggestions for anatomy errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Re-export the file from the original software with different settings.
    ReexportFile { format: Option<String> },
    /// Use a different file format.
    UseDifferentFormat { suggested: Vec<String> },
    /// Check the source mesh for issues.
    CheckSourceMesh { checks: Vec<String> },
    /// Compute the missing attribute before retrying.
    ComputeAttribute { attribute: String },
    /// Adjust parameters for the operation.
    AdjustParameters { parameters: Vec<(String, String)> },
    /// Supply the annotation manually.
    AnnotateManually { description: String },
    /// No automatic recovery available.
    None,
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoverySuggestion::ReexportFile { format } => {
                if let Some(fmt) = format {
                    write!(
                        f,
                        "Try re-exporting the mesh as {} from the original software",
                        fmt
                    )
                } else {
                    write!(f, "Try re-exporting the mesh from the original software")
                }
            }
            RecoverySuggestion::UseDifferentFormat { suggested } => {
                write!(f, "Try using a different format: {}", suggested.join(", "))
            }
            RecoverySuggestion::CheckSourceMesh { checks } => {
                write!(f, "Check the source mesh for: {}", checks.join(", "))
            }
            RecoverySuggestion::ComputeAttribute { attribute } => {
                write!(
                    f,
                    "Compute per-vertex {} data (e.g. compute_vertex_normals) before retrying",
                    attribute
                )
            }
            RecoverySuggestion::AdjustParameters { parameters } => {
                let params: Vec<String> = parameters
                    .iter()
                    .map(|(k, v)| format!("{} = {}", k, v))
                    .collect();
                write!(f, "Try adjusting: {}", params.join(", "))
            }
            RecoverySuggestion::AnnotateManually { description } => {
                write!(f, "{}", description)
            }
            RecoverySuggestion::None => {
                write!(f, "No automatic recovery available")
            }
        }
    }
}

/// Location information for anatomy errors.
#[derive(Debug, Clone)]
pub enum MeshLocation {
    /// Error at a specific vertex.
    Vertex {
        index: usize,
        position: Option<[f64; 3]>,
    },
    /// Error at a specific face.
    Face {
        index: usize,
        vertices: Option<[u32; 3]>,
    },
    /// Error on one anatomical side.
    Side(Side),
    /// Error in a file.
    File { path: PathBuf },
    /// No specific location.
    Unknown,
}

impl std::fmt::Display for MeshLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeshLocation::Vertex { index, position } => {
                if let Some([x, y, z]) = position {
                    write!(f, "vertex {} at ({:.3}, {:.3}, {:.3})", index, x, y, z)
                } else {
                    write!(f, "vertex {}", index)
                }
            }
            MeshLocation::Face { index, vertices } => {
                if let Some([a, b, c]) = vertices {
                    write!(f, "face {} with vertices [{}, {}, {}]", index, a, b, c)
                } else {
                    write!(f, "face {}", index)
                }
            }
            MeshLocation::Side(side) => write!(f, "{} side", side),
            MeshLocation::File { path } => write!(f, "{}", path.display()),
            MeshLocation::Unknown => write!(f, "unknown location"),
        }
    }
}

/// Errors that can occur during annotation, analysis, measurement, or simulation.
///
/// Each variant carries a human-readable message, a machine-readable code via
/// [`AnatomyError::code`], optional location information, and a recovery suggestion.
#[derive(Debug, Error, Diagnostic)]
pub enum AnatomyError {
    /// Error reading from a file.
    #[error("failed to read mesh from {path}")]
    #[diagnostic(
        code(anatomy::io::read),
        help("Check that the file exists and is readable. Try: ls -la {}", path.display())
    )]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error writing to a file.
    #[error("failed to write mesh to {path}")]
    #[diagnostic(
        code(anatomy::io::write),
        help("Check that the directory exists and is writable")
    )]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing mesh file format.
    #[error("failed to parse mesh from {path}: {details}")]
    #[diagnostic(
        code(anatomy::io::parse),
        help("The file may be corrupted. Try re-exporting from the generating software.")
    )]
    ParseError { path: PathBuf, details: String },

    /// Unsupported file format.
    #[error("unsupported mesh format: {extension:?}")]
    #[diagnostic(code(anatomy::io::format), help("Supported formats: STL, OBJ"))]
    UnsupportedFormat { extension: Option<String> },

    /// Empty mesh (no vertices or faces).
    #[error("mesh is empty: {details}")]
    #[diagnostic(
        code(anatomy::geometry::empty),
        help("The mesh must have at least one vertex and one face.")
    )]
    EmptyMesh { details: String },

    /// A required per-vertex attribute is absent.
    #[error("missing required geometry attribute '{attribute}' ({missing} vertices lack it)")]
    #[diagnostic(
        code(anatomy::geometry::attribute),
        help("Curvature analysis needs per-vertex normals. Compute them before analysing.")
    )]
    MissingAttribute {
        attribute: &'static str,
        missing: usize,
    },

    /// Parallel attribute buffers have different lengths.
    #[error("attribute '{attribute}' has {actual} values, expected {expected}")]
    #[diagnostic(code(anatomy::geometry::mismatch))]
    AttributeMismatch {
        attribute: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Invalid vertex index in face data.
    #[error(
        "invalid vertex index: face {face_index} references vertex {vertex_index}, but mesh only has {vertex_count} vertices"
    )]
    #[diagnostic(
        code(anatomy::geometry::vertex_index),
        help("Check the index buffer handed over by the mesh loader.")
    )]
    InvalidVertexIndex {
        face_index: usize,
        vertex_index: u32,
        vertex_count: usize,
    },

    /// Invalid coordinate value (NaN or Infinity).
    #[error("invalid coordinate at vertex {vertex_index}: {coordinate} is {value}")]
    #[diagnostic(
        code(anatomy::geometry::coordinate),
        help("Check for numerical issues in the source data.")
    )]
    InvalidCoordinate {
        vertex_index: usize,
        coordinate: &'static str,
        value: f64,
    },

    /// A contour was committed with too few points.
    #[error("contour on {side} side has {count} points, at least 3 are required")]
    #[diagnostic(
        code(anatomy::annotation::contour),
        help("Keep clicking on the surface until the outline has three or more points.")
    )]
    TooFewContourPoints { side: Side, count: usize },

    /// The scene holds no surface object to pick against.
    #[error("no pickable surface in scene ({objects} objects, all tool artifacts)")]
    #[diagnostic(code(anatomy::annotation::scene))]
    NoSurfaceInScene { objects: usize },

    /// An annotation the operation needs has not been supplied.
    #[error("missing {what} on {side} side")]
    #[diagnostic(code(anatomy::annotation::missing))]
    MissingAnnotation { what: &'static str, side: Side },

    /// A stored annotation names a different side than the slot holding it.
    #[error("{what} stored under {key} side is marked {found}")]
    #[diagnostic(
        code(anatomy::annotation::side),
        help("Each side's entry in the annotation file must carry that side.")
    )]
    AnnotationSideMismatch { what: &'static str, key: Side, found: Side },

    /// A tunable parameter is outside its valid range.
    #[error("invalid parameter {name} = {value}: {reason}")]
    #[diagnostic(code(anatomy::params::invalid))]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },

    /// Scale factor is not positive and finite.
    #[error("invalid unit scale {value}: must be a positive finite number")]
    #[diagnostic(
        code(anatomy::params::scale),
        help("Enter a positive reference distance in centimeters.")
    )]
    InvalidScale { value: f64 },

    /// A chunked pass was stopped by its progress callback.
    #[error("{operation} cancelled after {completed} of {total} items")]
    #[diagnostic(code(anatomy::cancelled))]
    Cancelled {
        operation: &'static str,
        completed: usize,
        total: usize,
    },

    /// The automatic path was used before the feature analyzer ran.
    #[error("{operation} needs an automatic analysis result; none has been computed")]
    #[diagnostic(
        code(anatomy::analysis::required),
        help("Run automatic detection first, or use the manual annotations.")
    )]
    AnalysisRequired { operation: &'static str },
}

impl AnatomyError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            AnatomyError::IoRead { .. } => ErrorCode::IoRead,
            AnatomyError::IoWrite { .. } => ErrorCode::IoWrite,
            AnatomyError::ParseError { .. } => ErrorCode::ParseError,
            AnatomyError::UnsupportedFormat { .. } => ErrorCode::UnsupportedFormat,
            AnatomyError::EmptyMesh { .. } => ErrorCode::EmptyMesh,
            AnatomyError::MissingAttribute { .. } => ErrorCode::MissingAttribute,
            AnatomyError::AttributeMismatch { .. } => ErrorCode::AttributeMismatch,
            AnatomyError::InvalidVertexIndex { .. } => ErrorCode::InvalidVertexIndex,
            AnatomyError::InvalidCoordinate { .. } => ErrorCode::InvalidCoordinate,
            AnatomyError::TooFewContourPoints { .. } => ErrorCode::TooFewContourPoints,
            AnatomyError::NoSurfaceInScene { .. } => ErrorCode::NoSurfaceInScene,
            AnatomyError::MissingAnnotation { .. } => ErrorCode::MissingAnnotation,
            AnatomyError::AnnotationSideMismatch { .. } => ErrorCode::AnnotationSideMismatch,
            AnatomyError::InvalidParameter { .. } => ErrorCode::InvalidParameter,
            AnatomyError::InvalidScale { .. } => ErrorCode::InvalidScale,
            AnatomyError::Cancelled { .. } => ErrorCode::Cancelled,
            AnatomyError::AnalysisRequired { .. } => ErrorCode::AnalysisRequired,
        }
    }

    /// Returns a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            AnatomyError::IoRead { .. } => RecoverySuggestion::CheckSourceMesh {
                checks: vec!["file exists".into(), "file permissions".into()],
            },
            AnatomyError::IoWrite { .. } => RecoverySuggestion::CheckSourceMesh {
                checks: vec!["directory exists".into(), "write permissions".into()],
            },
            AnatomyError::ParseError { .. } => RecoverySuggestion::ReexportFile {
                format: Some("OBJ with normals".into()),
            },
            AnatomyError::UnsupportedFormat { .. } => RecoverySuggestion::UseDifferentFormat {
                suggested: vec!["OBJ".into(), "STL".into()],
            },
            AnatomyError::EmptyMesh { .. } => RecoverySuggestion::CheckSourceMesh {
                checks: vec!["mesh has geometry".into(), "generation finished".into()],
            },
            AnatomyError::MissingAttribute { attribute, .. } => {
                RecoverySuggestion::ComputeAttribute {
                    attribute: (*attribute).to_string(),
                }
            }
            AnatomyError::AttributeMismatch { .. }
            | AnatomyError::InvalidVertexIndex { .. }
            | AnatomyError::InvalidCoordinate { .. } => RecoverySuggestion::CheckSourceMesh {
                checks: vec!["attribute buffers".into(), "index buffer".into()],
            },
            AnatomyError::TooFewContourPoints { .. } => RecoverySuggestion::AnnotateManually {
                description: "Add more contour points before finishing".into(),
            },
            AnatomyError::NoSurfaceInScene { .. } => RecoverySuggestion::CheckSourceMesh {
                checks: vec!["mesh was added to the scene as a surface".into()],
            },
            AnatomyError::MissingAnnotation { what, side } => {
                RecoverySuggestion::AnnotateManually {
                    description: format!("Place the {} {} manually", side, what),
                }
            }
            AnatomyError::AnnotationSideMismatch { what, key, .. } => {
                RecoverySuggestion::AnnotateManually {
                    description: format!("Redraw the {} {}", key, what),
                }
            }
            AnatomyError::InvalidParameter { name, reason, .. } => {
                RecoverySuggestion::AdjustParameters {
                    parameters: vec![((*name).to_string(), (*reason).to_string())],
                }
            }
            AnatomyError::InvalidScale { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![("reference_distance".into(), "a positive value".into())],
            },
            AnatomyError::Cancelled { .. } => RecoverySuggestion::None,
            AnatomyError::AnalysisRequired { .. } => RecoverySuggestion::AnnotateManually {
                description: "Run detection, or switch to manual annotations".into(),
            },
        }
    }

    /// Returns location information if available.
    pub fn location(&self) -> Option<MeshLocation> {
        match self {
            AnatomyError::InvalidVertexIndex { face_index, .. } => Some(MeshLocation::Face {
                index: *face_index,
                vertices: None,
            }),
            AnatomyError::InvalidCoordinate { vertex_index, .. } => Some(MeshLocation::Vertex {
                index: *vertex_index,
                position: None,
            }),
            AnatomyError::TooFewContourPoints { side, .. }
            | AnatomyError::MissingAnnotation { side, .. } => Some(MeshLocation::Side(*side)),
            AnatomyError::AnnotationSideMismatch { key, .. } => Some(MeshLocation::Side(*key)),
            AnatomyError::IoRead { path, .. }
            | AnatomyError::IoWrite { path, .. }
            | AnatomyError::ParseError { path, .. } => {
                Some(MeshLocation::File { path: path.clone() })
            }
            _ => None,
        }
    }

    // Constructor helpers for common error patterns

    /// Create an IoRead error.
    pub fn io_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AnatomyError::IoRead {
            path: path.into(),
            source,
        }
    }

    /// Create an IoWrite error.
    pub fn io_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AnatomyError::IoWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a ParseError.
    pub fn parse_error(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        AnatomyError::ParseError {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Create an UnsupportedFormat error.
    pub fn unsupported_format(extension: Option<String>) -> Self {
        AnatomyError::UnsupportedFormat { extension }
    }

    /// Create an EmptyMesh error.
    pub fn empty_mesh(details: impl Into<String>) -> Self {
        AnatomyError::EmptyMesh {
            details: details.into(),
        }
    }

    /// Create a MissingAttribute error.
    pub fn missing_attribute(attribute: &'static str, missing: usize) -> Self {
        AnatomyError::MissingAttribute { attribute, missing }
    }

    /// Create an AttributeMismatch error.
    pub fn attribute_mismatch(attribute: &'static str, expected: usize, actual: usize) -> Self {
        AnatomyError::AttributeMismatch {
            attribute,
            expected,
            actual,
        }
    }

    /// Create an InvalidVertexIndex error.
    pub fn invalid_vertex_index(face_index: usize, vertex_index: u32, vertex_count: usize) -> Self {
        AnatomyError::InvalidVertexIndex {
            face_index,
            vertex_index,
            vertex_count,
        }
    }

    /// Create an InvalidCoordinate error.
    pub fn invalid_coordinate(vertex_index: usize, coordinate: &'static str, value: f64) -> Self {
        AnatomyError::InvalidCoordinate {
            vertex_index,
            coordinate,
            value,
        }
    }

    /// Create an InvalidParameter error.
    pub fn invalid_parameter(name: &'static str, value: f64, reason: &'static str) -> Self {
        AnatomyError::InvalidParameter {
            name,
            value,
            reason,
        }
    }

    /// Create a Cancelled error.
    pub fn cancelled(operation: &'static str, completed: usize, total: usize) -> Self {
        AnatomyError::Cancelled {
            operation,
            completed,
            total,
        }
    }

    /// Whether the error describes a violated input precondition (as opposed to
    /// I/O trouble or a user-initiated cancellation).
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            AnatomyError::EmptyMesh { .. }
                | AnatomyError::MissingAttribute { .. }
                | AnatomyError::AttributeMismatch { .. }
                | AnatomyError::InvalidVertexIndex { .. }
                | AnatomyError::InvalidCoordinate { .. }
                | AnatomyError::TooFewContourPoints { .. }
                | AnatomyError::NoSurfaceInScene { .. }
                | AnatomyError::MissingAnnotation { .. }
                | AnatomyError::AnalysisRequired { .. }
        )
    }
}

/// Reject parameters that are not finite and strictly positive.
pub(crate) fn require_positive(name: &'static str, value: f64) -> AnatomyResult<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(AnatomyError::invalid_parameter(
            name,
            value,
            "must be positive and finite",
        ))
    }
}

/// Reject parameters that are NaN or infinite.
pub(crate) fn require_finite(name: &'static str, value: f64) -> AnatomyResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(AnatomyError::invalid_parameter(name, value, "must be finite"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = AnatomyError::missing_attribute("normal", 12);
        assert_eq!(err.code(), ErrorCode::MissingAttribute);
        assert_eq!(err.code().as_str(), "ANAT-2004");
        assert!(err.is_precondition());
    }

    #[test]
    fn test_recovery_suggestions() {
        let err = AnatomyError::missing_attribute("normal", 12);
        match err.recovery_suggestion() {
            RecoverySuggestion::ComputeAttribute { attribute } => {
                assert_eq!(attribute, "normal");
            }
            other => panic!("Expected ComputeAttribute suggestion, got {:?}", other),
        }
    }

    #[test]
    fn test_location_info() {
        let err = AnatomyError::TooFewContourPoints {
            side: Side::Left,
            count: 2,
        };
        match err.location() {
            Some(MeshLocation::Side(side)) => assert_eq!(side, Side::Left),
            other => panic!("Expected Side location, got {:?}", other),
        }
    }

    #[test]
    fn test_error_display() {
        let err = AnatomyError::invalid_vertex_index(5, 100, 50);
        let display = format!("{}", err);
        assert!(display.contains("face 5"));
        assert!(display.contains("vertex 100"));
        assert!(display.contains("50 vertices"));
    }

    #[test]
    fn test_cancelled_is_not_precondition() {
        let err = AnatomyError::cancelled("curvature", 512, 4096);
        assert_eq!(err.code().as_str(), "ANAT-4003");
        assert!(!err.is_precondition());
        assert!(format!("{}", err).contains("512 of 4096"));
    }

    #[test]
    fn test_require_positive() {
        assert!(require_positive("size", 1.2).is_ok());
        assert!(require_positive("size", 0.0).is_err());
        assert!(require_positive("size", f64::NAN).is_err());
        assert!(require_finite("offset", -0.5).is_ok());
        assert!(require_finite("offset", f64::INFINITY).is_err());
    }
}
