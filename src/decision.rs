// src/decision.rs
//
// Pure decision engine: (zone, parking line, classified detections) → status.
// No hidden state, no timers; every frame is judged on its own facts.
//
// Rule table, evaluated per truck using the box's bottom-center point as
// the ground-contact proxy:
//   - truck not in zone                       → OK (that truck contributes nothing)
//   - truck in zone, touching the line        → OK
//   - truck in zone, not touching, no person  → WARNING
//   - truck in zone, not touching, person     → VIOLATION
// Aggregation across trucks is explicit severity-max: one violating truck
// overrides any number of compliant ones.

use crate::error::DockError;
use crate::geometry::{bbox_touches_polyline, point_in_polygon};
use crate::types::{DockState, DockStatus, FrameDetections, PersonScope};
use crate::zone::DockGeometry;

#[derive(Debug, Clone, Copy)]
pub struct DecisionSettings {
    pub touch_threshold_px: f32,
    pub person_scope: PersonScope,
}

/// Computes the dock status for one frame.
///
/// Total over well-formed input; the only failure mode is `InvalidGeometry`
/// for a malformed zone or line, which the pipeline treats as fatal.
pub fn decide(
    geometry: &DockGeometry,
    detections: &FrameDetections,
    settings: &DecisionSettings,
) -> Result<DockStatus, DockError> {
    geometry.validate()?;

    let person_present = match settings.person_scope {
        PersonScope::Frame => detections.person_present(),
        PersonScope::Zone => {
            let mut present = false;
            for person in &detections.persons {
                if point_in_polygon(person.bbox.bottom_center(), &geometry.zone)? {
                    present = true;
                    break;
                }
            }
            present
        }
    };

    let mut state = DockState::Ok;
    let mut truck_in_zone = false;
    let mut touching_line = false;

    for truck in &detections.trucks {
        if !point_in_polygon(truck.bbox.bottom_center(), &geometry.zone)? {
            continue;
        }
        truck_in_zone = true;

        if bbox_touches_polyline(&truck.bbox, &geometry.parking_line, settings.touch_threshold_px)?
        {
            // Correctly positioned; OK regardless of person presence.
            touching_line = true;
        } else {
            let verdict = if person_present {
                DockState::Violation
            } else {
                DockState::Warning
            };
            state = state.most_severe(verdict);
        }
    }

    Ok(DockStatus {
        state,
        truck_in_zone,
        touching_line,
        person_present,
    })
}
