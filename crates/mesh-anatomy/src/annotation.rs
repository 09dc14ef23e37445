//! Annotation capture: pointer input to contours and landmarks.
//!
//! [`AnnotationCapture`] is a small state machine:
//!
//! ```text
//!            begin_contour(side)              finish (>= 3 points)
//!   Idle ─────────────────────────▶ DrawingContour(side) ─────────────▶ Idle
//!    │                                   │  pointer-down hit: append point
//!    │ begin_landmark(side)              │  cancel / mode switch: discard
//!    ▼                                   ▼
//!   PlacingLandmark(side) ── surface hit ──▶ Idle (Landmark emitted)
//! ```
//!
//! Events are processed strictly in arrival order. Every transition reports
//! what happened as a list of [`AnnotationEvent`]s, including when the host
//! must suspend or resume its orbit controls. Visual feedback lives in the
//! capture's own [`AnnotationOverlay`], never in the picked scene.

use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AnatomyError, AnatomyResult};
use crate::raycast::{ArtifactKind, Camera, Scene};
use crate::types::{Side, SideMap};

/// Minimum number of points for a contour to be complete.
pub const MIN_CONTOUR_POINTS: usize = 3;

// ============================================================================
// Data products
// ============================================================================

/// A closed outline on the surface for one side.
///
/// Points are kept in drawing order; the last point connects back to the first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawContour", into = "RawContour")]
pub struct Contour {
    side: Side,
    points: Vec<Point3<f64>>,
    centroid: Point3<f64>,
    radius: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawContour {
    side: Side,
    points: Vec<Point3<f64>>,
}

impl TryFrom<RawContour> for Contour {
    type Error = AnatomyError;

    fn try_from(raw: RawContour) -> Result<Self, Self::Error> {
        Contour::new(raw.side, raw.points)
    }
}

impl From<Contour> for RawContour {
    fn from(contour: Contour) -> Self {
        RawContour {
            side: contour.side,
            points: contour.points,
        }
    }
}

impl Contour {
    /// Build a contour, deriving centroid and radius.
    ///
    /// # Errors
    ///
    /// [`AnatomyError::TooFewContourPoints`] with fewer than three points, and
    /// [`AnatomyError::InvalidCoordinate`] for non-finite points.
    pub fn new(side: Side, points: Vec<Point3<f64>>) -> AnatomyResult<Self> {
        if points.len() < MIN_CONTOUR_POINTS {
            return Err(AnatomyError::TooFewContourPoints {
                side,
                count: points.len(),
            });
        }
        for (i, p) in points.iter().enumerate() {
            if let Some(bad) = p.iter().find(|c| !c.is_finite()) {
                return Err(AnatomyError::invalid_coordinate(i, "contour", *bad));
            }
        }

        let sum = points
            .iter()
            .fold(nalgebra::Vector3::zeros(), |acc, p| acc + p.coords);
        let centroid = Point3::from(sum / points.len() as f64);
        let radius = points
            .iter()
            .map(|p| (p - centroid).norm())
            .fold(0.0, f64::max);

        Ok(Self {
            side,
            points,
            centroid,
            radius,
        })
    }

    #[inline]
    pub fn side(&self) -> Side {
        self.side
    }

    #[inline]
    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    #[inline]
    pub fn centroid(&self) -> Point3<f64> {
        self.centroid
    }

    /// Largest distance from the centroid to any point.
    #[inline]
    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Consecutive point pairs including the closing edge (last → first).
    pub fn edges(&self) -> impl Iterator<Item = (&Point3<f64>, &Point3<f64>)> {
        self.points
            .iter()
            .zip(self.points.iter().cycle().skip(1))
    }

    /// Same contour with every point moved by `f`.
    pub fn map_points(&self, f: impl FnMut(&Point3<f64>) -> Point3<f64>) -> AnatomyResult<Self> {
        Contour::new(self.side, self.points.iter().map(f).collect())
    }
}

/// Where a landmark came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LandmarkSource {
    #[default]
    Manual,
    Automatic,
}

/// A single anatomically significant surface point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub side: Side,
    pub position: Point3<f64>,
    #[serde(default)]
    pub source: LandmarkSource,
}

impl Landmark {
    pub fn manual(side: Side, position: Point3<f64>) -> Self {
        Self {
            side,
            position,
            source: LandmarkSource::Manual,
        }
    }

    pub fn automatic(side: Side, position: Point3<f64>) -> Self {
        Self {
            side,
            position,
            source: LandmarkSource::Automatic,
        }
    }
}

/// Committed annotations: at most one contour and one landmark per side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAnnotationSet")]
pub struct AnnotationSet {
    pub contours: SideMap<Contour>,
    pub landmarks: SideMap<Landmark>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct RawAnnotationSet {
    contours: SideMap<Contour>,
    landmarks: SideMap<Landmark>,
}

impl TryFrom<RawAnnotationSet> for AnnotationSet {
    type Error = AnatomyError;

    fn try_from(raw: RawAnnotationSet) -> Result<Self, Self::Error> {
        for side in Side::BOTH {
            if let Some(contour) = raw.contours.get(side)
                && contour.side() != side
            {
                return Err(AnatomyError::AnnotationSideMismatch {
                    what: "contour",
                    key: side,
                    found: contour.side(),
                });
            }
            if let Some(landmark) = raw.landmarks.get(side)
                && landmark.side != side
            {
                return Err(AnatomyError::AnnotationSideMismatch {
                    what: "landmark",
                    key: side,
                    found: landmark.side,
                });
            }
        }
        Ok(Self {
            contours: raw.contours,
            landmarks: raw.landmarks,
        })
    }
}

impl AnnotationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a contour under its own side, replacing any previous one.
    pub fn set_contour(&mut self, contour: Contour) -> Option<Contour> {
        self.contours.set(contour.side(), contour)
    }

    /// Store a landmark under its own side, replacing any previous one.
    pub fn set_landmark(&mut self, landmark: Landmark) -> Option<Landmark> {
        self.landmarks.set(landmark.side, landmark)
    }

    pub fn contour(&self, side: Side) -> Option<&Contour> {
        self.contours.get(side)
    }

    pub fn landmark(&self, side: Side) -> Option<&Landmark> {
        self.landmarks.get(side)
    }

    /// Forget everything recorded for one side.
    pub fn clear_side(&mut self, side: Side) {
        self.contours.take(side);
        self.landmarks.take(side);
    }

    pub fn is_empty(&self) -> bool {
        self.contours.is_empty() && self.landmarks.is_empty()
    }

    /// Parse from JSON (the CLI's annotation file format).
    pub fn from_json(json: &str) -> AnatomyResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| AnatomyError::parse_error("<annotations>", e.to_string()))
    }

    pub fn to_json(&self) -> AnatomyResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| AnatomyError::parse_error("<annotations>", e.to_string()))
    }
}

// ============================================================================
// Overlay
// ============================================================================

/// Handle to an overlay marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerId(pub u32);

/// A visual feedback object owned by the capture component.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayMarker {
    pub id: MarkerId,
    pub kind: ArtifactKind,
    pub side: Side,
    pub points: Vec<Point3<f64>>,
    /// Belongs to a committed annotation (as opposed to an in-progress one).
    pub committed: bool,
}

/// Layer of tool artifacts, kept apart from the picked [`Scene`].
#[derive(Debug, Clone, Default)]
pub struct AnnotationOverlay {
    markers: Vec<OverlayMarker>,
    next_id: u32,
}

impl AnnotationOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: ArtifactKind, side: Side, points: Vec<Point3<f64>>) -> MarkerId {
        let id = MarkerId(self.next_id);
        self.next_id += 1;
        self.markers.push(OverlayMarker {
            id,
            kind,
            side,
            points,
            committed: false,
        });
        id
    }

    pub fn remove(&mut self, id: MarkerId) -> Option<OverlayMarker> {
        let pos = self.markers.iter().position(|m| m.id == id)?;
        Some(self.markers.remove(pos))
    }

    pub fn get(&self, id: MarkerId) -> Option<&OverlayMarker> {
        self.markers.iter().find(|m| m.id == id)
    }

    pub fn markers(&self) -> &[OverlayMarker] {
        &self.markers
    }

    pub fn of_kind(&self, kind: ArtifactKind) -> impl Iterator<Item = &OverlayMarker> {
        self.markers.iter().filter(move |m| m.kind == kind)
    }

    pub fn for_side(&self, side: Side) -> impl Iterator<Item = &OverlayMarker> {
        self.markers.iter().filter(move |m| m.side == side)
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Drop every in-progress marker. Returns how many were removed.
    pub fn clear_uncommitted(&mut self) -> usize {
        let before = self.markers.len();
        self.markers.retain(|m| m.committed);
        before - self.markers.len()
    }

    /// Drop committed markers of `kind` on `side`.
    fn clear_committed(&mut self, kind: ArtifactKind, side: Side) {
        self.markers
            .retain(|m| !(m.committed && m.kind == kind && m.side == side));
    }

    fn set_points(&mut self, id: MarkerId, points: Vec<Point3<f64>>) {
        if let Some(marker) = self.markers.iter_mut().find(|m| m.id == id) {
            marker.points = points;
        }
    }

    fn commit(&mut self, id: MarkerId) {
        if let Some(marker) = self.markers.iter_mut().find(|m| m.id == id) {
            marker.committed = true;
        }
    }
}

// ============================================================================
// State machine
// ============================================================================

/// Active tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    #[default]
    Idle,
    DrawingContour(Side),
    PlacingLandmark(Side),
}

/// How a landmark click is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkPlacement {
    /// The first surface hit commits the landmark.
    #[default]
    Immediate,
    /// Pointer-down places, moves reposition, pointer-up commits.
    DragToPosition,
}

/// Tunables for annotation capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// New contour points closer than this to the previous point are dropped.
    pub min_point_spacing: f64,
    /// Append points on pointer-move while the button is held.
    pub drag_draw: bool,
    pub landmark_placement: LandmarkPlacement,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            min_point_spacing: 0.005,
            drag_draw: true,
            landmark_placement: LandmarkPlacement::Immediate,
        }
    }
}

impl CaptureConfig {
    pub fn with_min_point_spacing(mut self, spacing: f64) -> Self {
        self.min_point_spacing = spacing;
        self
    }

    pub fn with_landmark_placement(mut self, placement: LandmarkPlacement) -> Self {
        self.landmark_placement = placement;
        self
    }
}

/// Pointer input in viewport-normalized coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    /// Button pressed; `modifier` is set for modifier-clicks (finish contour).
    Down { ndc: Point2<f64>, modifier: bool },
    Move { ndc: Point2<f64> },
    Up { ndc: Point2<f64> },
}

impl PointerEvent {
    pub fn ndc(&self) -> Point2<f64> {
        match *self {
            PointerEvent::Down { ndc, .. } | PointerEvent::Move { ndc } | PointerEvent::Up { ndc } => {
                ndc
            }
        }
    }
}

/// Keyboard-style completion signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSignal {
    /// Enter, or an explicit finish action.
    Finish,
    /// Escape.
    Cancel,
}

/// What a call into [`AnnotationCapture`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationEvent {
    /// Host should disable orbit controls.
    CameraSuspended,
    /// Host should re-enable orbit controls.
    CameraResumed,
    /// A contour point was accepted.
    PointAdded {
        side: Side,
        point: Point3<f64>,
        count: usize,
    },
    /// A hit was too close to the previous point.
    PointSkipped { side: Side },
    /// A finish request arrived with too few points; drawing continues.
    FinishIgnored { side: Side, count: usize },
    ContourCompleted(Contour),
    /// A drag-placed landmark moved before commit.
    LandmarkMoved { side: Side, position: Point3<f64> },
    LandmarkPlaced(Landmark),
    /// In-progress state was thrown away.
    Discarded { mode: CaptureMode, points: usize },
}

/// Turns pointer input plus surface hits into contours and landmarks.
#[derive(Debug, Clone, Default)]
pub struct AnnotationCapture {
    config: CaptureConfig,
    mode: CaptureMode,
    points: Vec<Point3<f64>>,
    preview: Option<MarkerId>,
    pending_landmark: Option<(Point3<f64>, MarkerId)>,
    pointer_down: bool,
    camera_suspended: bool,
    overlay: AnnotationOverlay,
    annotations: AnnotationSet,
}

impl AnnotationCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[inline]
    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    #[inline]
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Whether the host's orbit controls should currently be disabled.
    #[inline]
    pub fn is_camera_suspended(&self) -> bool {
        self.camera_suspended
    }

    /// Points of the contour being drawn.
    pub fn in_progress_points(&self) -> &[Point3<f64>] {
        &self.points
    }

    pub fn overlay(&self) -> &AnnotationOverlay {
        &self.overlay
    }

    pub fn overlay_mut(&mut self) -> &mut AnnotationOverlay {
        &mut self.overlay
    }

    pub fn annotations(&self) -> &AnnotationSet {
        &self.annotations
    }

    /// Take ownership of an externally supplied annotation set (e.g. loaded from
    /// disk); committed markers are rebuilt for it.
    pub fn load_annotations(&mut self, annotations: AnnotationSet) -> Vec<AnnotationEvent> {
        let mut events = Vec::new();
        self.switch_mode(CaptureMode::Idle, &mut events);
        self.overlay = AnnotationOverlay::new();
        for (_, contour) in annotations.contours.iter() {
            self.show_committed_contour(contour);
        }
        for (_, landmark) in annotations.landmarks.iter() {
            self.show_committed_landmark(landmark);
        }
        self.annotations = annotations;
        events
    }

    /// Enter contour drawing for `side`, discarding any other in-progress work.
    pub fn begin_contour(&mut self, side: Side) -> Vec<AnnotationEvent> {
        let mut events = Vec::new();
        self.switch_mode(CaptureMode::DrawingContour(side), &mut events);
        events
    }

    /// Enter landmark placement for `side`, discarding any other in-progress work.
    pub fn begin_landmark(&mut self, side: Side) -> Vec<AnnotationEvent> {
        let mut events = Vec::new();
        self.switch_mode(CaptureMode::PlacingLandmark(side), &mut events);
        events
    }

    /// Feed a pointer event whose surface hit was already resolved.
    ///
    /// `hit` is the Surface Query result for the event's position.
    pub fn handle_pointer(
        &mut self,
        event: PointerEvent,
        hit: Option<Point3<f64>>,
    ) -> Vec<AnnotationEvent> {
        let mut events = Vec::new();
        match (self.mode, event) {
            (CaptureMode::Idle, _) => {}

            (CaptureMode::DrawingContour(side), PointerEvent::Down { modifier: true, .. }) => {
                self.pointer_down = false;
                self.try_finish_contour(side, &mut events);
            }
            (CaptureMode::DrawingContour(side), PointerEvent::Down { .. }) => {
                self.pointer_down = true;
                if let Some(point) = hit {
                    self.append_point(side, point, &mut events);
                }
            }
            (CaptureMode::DrawingContour(side), PointerEvent::Move { .. }) => {
                if self.pointer_down
                    && self.config.drag_draw
                    && let Some(point) = hit
                {
                    self.append_point(side, point, &mut events);
                }
            }
            (CaptureMode::DrawingContour(_), PointerEvent::Up { .. }) => {
                self.pointer_down = false;
            }

            (CaptureMode::PlacingLandmark(side), PointerEvent::Down { .. }) => {
                let Some(point) = hit else { return events };
                match self.config.landmark_placement {
                    LandmarkPlacement::Immediate => {
                        self.commit_landmark(Landmark::manual(side, point), &mut events);
                    }
                    LandmarkPlacement::DragToPosition => {
                        self.pointer_down = true;
                        let marker =
                            self.overlay
                                .add(ArtifactKind::LandmarkMarker, side, vec![point]);
                        if let Some((_, old)) = self.pending_landmark.replace((point, marker)) {
                            self.overlay.remove(old);
                        }
                        events.push(AnnotationEvent::LandmarkMoved {
                            side,
                            position: point,
                        });
                    }
                }
            }
            (CaptureMode::PlacingLandmark(side), PointerEvent::Move { .. }) => {
                if self.pointer_down
                    && let (Some(point), Some((pending, marker))) =
                        (hit, self.pending_landmark.as_mut())
                {
                    *pending = point;
                    let marker = *marker;
                    self.overlay.set_points(marker, vec![point]);
                    events.push(AnnotationEvent::LandmarkMoved {
                        side,
                        position: point,
                    });
                }
            }
            (CaptureMode::PlacingLandmark(side), PointerEvent::Up { .. }) => {
                self.pointer_down = false;
                if let Some((point, marker)) = self.pending_landmark.take() {
                    self.overlay.remove(marker);
                    self.commit_landmark(Landmark::manual(side, point), &mut events);
                }
            }
        }
        events
    }

    /// Resolve the event's hit through `scene` and `camera`, then handle it.
    ///
    /// Fails only when the scene holds no surface at all; a miss is a normal
    /// `None` hit.
    pub fn handle_pointer_in_scene(
        &mut self,
        event: PointerEvent,
        scene: &Scene,
        camera: &dyn Camera,
    ) -> AnatomyResult<Vec<AnnotationEvent>> {
        if self.mode == CaptureMode::Idle {
            return Ok(Vec::new());
        }
        scene.primary_surface()?;
        let hit = scene.pick(camera, event.ndc()).map(|h| h.point);
        Ok(self.handle_pointer(event, hit))
    }

    /// Apply a finish or cancel signal.
    pub fn signal(&mut self, signal: CaptureSignal) -> Vec<AnnotationEvent> {
        let mut events = Vec::new();
        match (signal, self.mode) {
            (CaptureSignal::Finish, CaptureMode::DrawingContour(side)) => {
                self.try_finish_contour(side, &mut events);
            }
            (CaptureSignal::Finish, _) => {}
            (CaptureSignal::Cancel, _) => {
                self.switch_mode(CaptureMode::Idle, &mut events);
            }
        }
        events
    }

    fn append_point(&mut self, side: Side, point: Point3<f64>, events: &mut Vec<AnnotationEvent>) {
        if let Some(last) = self.points.last()
            && (point - last).norm() <= self.config.min_point_spacing
        {
            events.push(AnnotationEvent::PointSkipped { side });
            return;
        }

        self.points.push(point);
        self.overlay
            .add(ArtifactKind::ContourHandle, side, vec![point]);
        match self.preview {
            Some(id) => self.overlay.set_points(id, self.points.clone()),
            None => {
                self.preview = Some(
                    self.overlay
                        .add(ArtifactKind::PreviewLine, side, self.points.clone()),
                );
            }
        }

        debug!(
            target: "mesh_anatomy::annotation",
            side = %side,
            count = self.points.len(),
            "Contour point added"
        );
        events.push(AnnotationEvent::PointAdded {
            side,
            point,
            count: self.points.len(),
        });
    }

    fn try_finish_contour(&mut self, side: Side, events: &mut Vec<AnnotationEvent>) {
        if self.points.len() < MIN_CONTOUR_POINTS {
            warn!(
                target: "mesh_anatomy::annotation",
                side = %side,
                count = self.points.len(),
                "Finish ignored: contour needs at least {} points",
                MIN_CONTOUR_POINTS
            );
            events.push(AnnotationEvent::FinishIgnored {
                side,
                count: self.points.len(),
            });
            return;
        }

        let points = std::mem::take(&mut self.points);
        match Contour::new(side, points) {
            Ok(contour) => {
                self.clear_in_progress();
                self.show_committed_contour(&contour);
                self.annotations.set_contour(contour.clone());
                info!(
                    target: "mesh_anatomy::annotation",
                    side = %side,
                    points = contour.points().len(),
                    radius = format!("{:.4}", contour.radius()),
                    "Contour completed"
                );
                events.push(AnnotationEvent::ContourCompleted(contour));
                self.switch_mode(CaptureMode::Idle, events);
            }
            Err(err) => {
                // Surface hits are always finite, so this only guards bad input.
                warn!(target: "mesh_anatomy::annotation", error = %err, "Contour rejected");
                self.switch_mode(CaptureMode::Idle, events);
            }
        }
    }

    fn commit_landmark(&mut self, landmark: Landmark, events: &mut Vec<AnnotationEvent>) {
        self.show_committed_landmark(&landmark);
        self.annotations.set_landmark(landmark);
        info!(
            target: "mesh_anatomy::annotation",
            side = %landmark.side,
            "Landmark placed"
        );
        events.push(AnnotationEvent::LandmarkPlaced(landmark));
        self.switch_mode(CaptureMode::Idle, events);
    }

    fn show_committed_contour(&mut self, contour: &Contour) {
        self.overlay
            .clear_committed(ArtifactKind::MarkerGroup, contour.side());
        let id = self.overlay.add(
            ArtifactKind::MarkerGroup,
            contour.side(),
            contour.points().to_vec(),
        );
        self.overlay.commit(id);
    }

    fn show_committed_landmark(&mut self, landmark: &Landmark) {
        self.overlay
            .clear_committed(ArtifactKind::LandmarkMarker, landmark.side);
        let id = self.overlay.add(
            ArtifactKind::LandmarkMarker,
            landmark.side,
            vec![landmark.position],
        );
        self.overlay.commit(id);
    }

    /// Drop in-progress points and markers; returns how many points were held.
    fn clear_in_progress(&mut self) -> usize {
        let points = self.points.len() + usize::from(self.pending_landmark.is_some());
        self.points.clear();
        self.preview = None;
        self.pending_landmark = None;
        self.pointer_down = false;
        self.overlay.clear_uncommitted();
        points
    }

    /// Change mode atomically: in-progress state is discarded and the camera lock
    /// follows the new mode (suspended in any drawing mode, released in Idle).
    fn switch_mode(&mut self, mode: CaptureMode, events: &mut Vec<AnnotationEvent>) {
        let previous = self.mode;
        let discarded = self.clear_in_progress();
        if discarded > 0 {
            debug!(
                target: "mesh_anatomy::annotation",
                mode = ?previous,
                points = discarded,
                "In-progress annotation discarded"
            );
            events.push(AnnotationEvent::Discarded {
                mode: previous,
                points: discarded,
            });
        }

        self.mode = mode;
        let suspend = mode != CaptureMode::Idle;
        if suspend && !self.camera_suspended {
            self.camera_suspended = true;
            events.push(AnnotationEvent::CameraSuspended);
        } else if !suspend && self.camera_suspended {
            self.camera_suspended = false;
            events.push(AnnotationEvent::CameraResumed);
        }
    }
}
