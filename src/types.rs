// src/types.rs

use serde::{Deserialize, Serialize};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub detection: DetectionConfig,
    pub video: VideoConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub path: String,
    pub input_size: usize,
    /// Class names by model class id (index 0 = class 0).
    pub class_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub confidence_threshold: f32,
    /// Max pixel distance between a truck's ground-contact edge and the
    /// parking line that still counts as "touching".
    pub touch_threshold_px: f32,
    #[serde(default)]
    pub person_scope: PersonScope,
    pub truck_labels: Vec<String>,
    pub person_labels: Vec<String>,
    #[serde(default)]
    pub marker_labels: Vec<String>,
    #[serde(default)]
    pub ignored_labels: Vec<String>,
}

/// Where a person must be for "person present" to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonScope {
    /// Person's bottom-center point must fall inside the dock zone.
    Zone,
    /// Any person detection anywhere in the frame counts.
    Frame,
}

impl Default for PersonScope {
    fn default() -> Self {
        Self::Zone
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    pub source: String,
    #[serde(default)]
    pub output_dir: String,
    #[serde(default)]
    pub save_annotated: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ============================================================================
// GEOMETRY & DETECTIONS
// ============================================================================

/// A point in frame-pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounding box in pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1.min(x2),
            y: y1.min(y2),
            w: (x2 - x1).abs(),
            h: (y2 - y1).abs(),
        }
    }

    /// Midpoint of the bottom edge. Proxy for the object's ground position.
    pub fn bottom_center(&self) -> Point {
        Point::new(self.x + self.w / 2.0, self.y + self.h)
    }

    pub fn bottom_left(&self) -> Point {
        Point::new(self.x, self.y + self.h)
    }

    pub fn bottom_right(&self) -> Point {
        Point::new(self.x + self.w, self.y + self.h)
    }
}

/// One raw object reported by the detector for a single frame.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub label: String,
    pub bbox: BBox,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionClass {
    Truck,
    Person,
    /// Painted parking-line marker. Kept for display only, never used by
    /// the decision engine (the line itself comes from configuration).
    LineMarker,
    Ignored,
}

/// A classified detection that survived confidence filtering.
#[derive(Debug, Clone)]
pub struct Detection {
    pub class: DetectionClass,
    pub label: String,
    pub bbox: BBox,
    pub confidence: f32,
}

/// All detections for one frame, partitioned by category.
#[derive(Debug, Clone, Default)]
pub struct FrameDetections {
    pub trucks: Vec<Detection>,
    pub persons: Vec<Detection>,
    pub markers: Vec<Detection>,
    /// Detections dropped as ignored/unmapped, counted for diagnostics.
    pub ignored_count: usize,
}

impl FrameDetections {
    pub fn truck_present(&self) -> bool {
        !self.trucks.is_empty()
    }

    pub fn person_present(&self) -> bool {
        !self.persons.is_empty()
    }
}

// ============================================================================
// STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DockState {
    Violation,
    Warning,
    Ok,
}

impl DockState {
    fn severity(self) -> u8 {
        match self {
            Self::Violation => 2,
            Self::Warning => 1,
            Self::Ok => 0,
        }
    }

    /// Severity-max aggregation: a single violating truck overrides
    /// other trucks being compliant.
    pub fn most_severe(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Violation => "VIOLATION",
            Self::Warning => "WARNING",
            Self::Ok => "OK",
        }
    }
}

/// The per-frame decision plus the geometric facts behind it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DockStatus {
    pub state: DockState,
    pub truck_in_zone: bool,
    pub touching_line: bool,
    pub person_present: bool,
}

// ============================================================================
// FRAMES
// ============================================================================

/// One RGB frame pulled from the source.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp_ms: f64,
}

/// The unit of work flowing through the pipeline. Ownership transfers
/// stage to stage; no stage retains it after handing it on.
#[derive(Debug, Clone)]
pub struct PipelineFrame {
    pub frame_id: u64,
    pub frame: Frame,
    pub detections: FrameDetections,
    pub status: DockStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bottom_center() {
        let bbox = BBox::new(4.0, 2.0, 2.0, 2.0);
        assert_eq!(bbox.bottom_center(), Point::new(5.0, 4.0));
        assert_eq!(bbox.bottom_left(), Point::new(4.0, 4.0));
        assert_eq!(bbox.bottom_right(), Point::new(6.0, 4.0));
    }

    #[test]
    fn test_bbox_from_corners_normalizes_order() {
        let bbox = BBox::from_corners(10.0, 8.0, 4.0, 2.0);
        assert_eq!(bbox, BBox::new(4.0, 2.0, 6.0, 6.0));
    }

    #[test]
    fn test_severity_order() {
        use DockState::*;
        assert_eq!(Ok.most_severe(Warning), Warning);
        assert_eq!(Warning.most_severe(Violation), Violation);
        assert_eq!(Violation.most_severe(Ok), Violation);
        assert_eq!(Ok.most_severe(Ok), Ok);
    }
}
