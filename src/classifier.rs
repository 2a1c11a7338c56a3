// src/classifier.rs
//
// Partitions the detector's raw output into typed buckets after
// confidence filtering. The label → category mapping is explicit and
// validated once at startup; no substring matching at runtime.

use std::collections::HashMap;

use tracing::debug;

use crate::error::DockError;
use crate::types::{Detection, DetectionClass, DetectionConfig, FrameDetections, RawDetection};

/// Validated mapping from detector label to detection category.
///
/// Construction fails with `AmbiguousClassMapping` if any label appears
/// under more than one category, so ambiguity is a configuration-time
/// failure, never a per-frame one. Unmapped labels route to `Ignored`.
#[derive(Debug, Clone)]
pub struct ClassMap {
    map: HashMap<String, DetectionClass>,
}

impl ClassMap {
    pub fn new(config: &DetectionConfig) -> Result<Self, DockError> {
        let lists = [
            (DetectionClass::Truck, &config.truck_labels),
            (DetectionClass::Person, &config.person_labels),
            (DetectionClass::LineMarker, &config.marker_labels),
            (DetectionClass::Ignored, &config.ignored_labels),
        ];

        let mut map = HashMap::new();
        for (class, labels) in lists {
            for label in labels {
                if let Some(existing) = map.insert(label.clone(), class) {
                    if existing != class {
                        return Err(DockError::AmbiguousClassMapping {
                            label: label.clone(),
                        });
                    }
                }
            }
        }
        Ok(Self { map })
    }

    pub fn category(&self, label: &str) -> DetectionClass {
        self.map
            .get(label)
            .copied()
            .unwrap_or(DetectionClass::Ignored)
    }
}

/// Filters out detections below the confidence threshold and routes each
/// survivor into exactly one bucket. Ignored/unmapped detections (e.g.
/// forklifts) are dropped from further logic and only counted.
pub fn classify(
    raw: Vec<RawDetection>,
    class_map: &ClassMap,
    confidence_threshold: f32,
) -> FrameDetections {
    let total = raw.len();
    let mut out = FrameDetections::default();

    for det in raw {
        if det.confidence < confidence_threshold {
            continue;
        }
        let class = class_map.category(&det.label);
        let detection = Detection {
            class,
            label: det.label,
            bbox: det.bbox,
            confidence: det.confidence,
        };
        match class {
            DetectionClass::Truck => out.trucks.push(detection),
            DetectionClass::Person => out.persons.push(detection),
            DetectionClass::LineMarker => out.markers.push(detection),
            DetectionClass::Ignored => out.ignored_count += 1,
        }
    }

    debug!(
        "Classified {} raw detections: {} trucks, {} persons, {} markers, {} ignored",
        total,
        out.trucks.len(),
        out.persons.len(),
        out.markers.len(),
        out.ignored_count
    );
    out
}
