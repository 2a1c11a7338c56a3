// src/geometry.rs
//
// Geometric predicates relating detected objects to the dock's zone and
// parking-line geometry. All coordinates are in frame-pixel space.
//
// Boundary policy: a point lying exactly on a polygon edge or vertex is
// INSIDE. The zone is drawn by an operator around the dock area, so a
// truck standing on the drawn boundary is treated as occupying the zone.

use crate::error::DockError;
use crate::types::{BBox, Point};

/// Tolerance for the on-edge check in `point_in_polygon`.
const EDGE_EPSILON: f32 = 1e-6;

/// Ray-casting containment test. Points on the boundary count as inside.
///
/// Fails with `InvalidGeometry` for a polygon with fewer than 3 vertices
/// rather than producing a silent wrong answer.
pub fn point_in_polygon(p: Point, polygon: &[Point]) -> Result<bool, DockError> {
    if polygon.len() < 3 {
        return Err(DockError::invalid_geometry(format!(
            "zone polygon needs at least 3 vertices, got {}",
            polygon.len()
        )));
    }

    // Explicit on-edge check first; the ray cast below is ambiguous for
    // boundary points.
    for i in 0..polygon.len() {
        let a = polygon[i];
        let b = polygon[(i + 1) % polygon.len()];
        if distance_point_to_segment(p, a, b) <= EDGE_EPSILON {
            return Ok(true);
        }
    }

    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (pi, pj) = (polygon[i], polygon[j]);
        if (pi.y > p.y) != (pj.y > p.y) {
            let x_cross = (pj.x - pi.x) * (p.y - pi.y) / (pj.y - pi.y) + pi.x;
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    Ok(inside)
}

/// Perpendicular distance if the foot of the perpendicular lies within the
/// segment, else distance to the nearer endpoint. Symmetric in (a, b).
pub fn distance_point_to_segment(p: Point, a: Point, b: Point) -> f32 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len_sq = dx * dx + dy * dy;
    if len_sq <= f32::EPSILON {
        // Degenerate segment: both endpoints coincide.
        return ((p.x - a.x).powi(2) + (p.y - a.y).powi(2)).sqrt();
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    let (fx, fy) = (a.x + t * dx, a.y + t * dy);
    ((p.x - fx).powi(2) + (p.y - fy).powi(2)).sqrt()
}

/// Minimum distance from `p` to any segment of the polyline.
///
/// Fails with `InvalidGeometry` if the polyline has fewer than 2 points.
pub fn min_distance_point_to_polyline(p: Point, polyline: &[Point]) -> Result<f32, DockError> {
    if polyline.len() < 2 {
        return Err(DockError::invalid_geometry(format!(
            "parking line needs at least 2 points, got {}",
            polyline.len()
        )));
    }
    let mut min = f32::INFINITY;
    for pair in polyline.windows(2) {
        min = min.min(distance_point_to_segment(p, pair[0], pair[1]));
    }
    Ok(min)
}

/// Proper-intersection test for segments (a, b) and (c, d), via orientation
/// signs. Collinear touching is not reported; the distance predicates cover
/// that case.
pub fn segments_intersect(a: Point, b: Point, c: Point, d: Point) -> bool {
    fn ccw(a: Point, b: Point, c: Point) -> bool {
        (c.y - a.y) * (b.x - a.x) > (b.y - a.y) * (c.x - a.x)
    }
    ccw(a, c, d) != ccw(b, c, d) && ccw(a, b, c) != ccw(a, b, d)
}

/// Is the box's ground-contact edge within `threshold_px` of the polyline?
///
/// The probe points are the bottom edge midpoint and the two bottom corners:
/// a truck's bumper, not its centroid, determines "touching". A polyline
/// segment that cuts through the bottom edge between probe points also
/// counts — the line passes under the vehicle.
pub fn bbox_touches_polyline(
    bbox: &BBox,
    polyline: &[Point],
    threshold_px: f32,
) -> Result<bool, DockError> {
    let probes = [bbox.bottom_left(), bbox.bottom_center(), bbox.bottom_right()];
    for probe in probes {
        if min_distance_point_to_polyline(probe, polyline)? <= threshold_px {
            return Ok(true);
        }
    }
    for pair in polyline.windows(2) {
        if segments_intersect(bbox.bottom_left(), bbox.bottom_right(), pair[0], pair[1]) {
            return Ok(true);
        }
    }
    Ok(false)
}
