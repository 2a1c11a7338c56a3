// src/overlay.rs
//
// Renders the zone, parking line, detection boxes and a status banner
// onto a frame. Display-only: the pipeline never consults the annotated
// image, so drawing bugs cannot affect the decision.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

use crate::types::{BBox, DockState, DockStatus, Frame, FrameDetections, Point};
use crate::zone::DockGeometry;

const ZONE_COLOR: Rgb<u8> = Rgb([0, 160, 255]);
const LINE_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const TRUCK_COLOR: Rgb<u8> = Rgb([60, 200, 60]);
const PERSON_COLOR: Rgb<u8> = Rgb([255, 140, 0]);
const BANNER_SIZE: u32 = 28;

fn state_color(state: DockState) -> Rgb<u8> {
    match state {
        DockState::Violation => Rgb([220, 40, 40]),
        DockState::Warning => Rgb([230, 200, 30]),
        DockState::Ok => Rgb([40, 200, 60]),
    }
}

/// Draws diagnostics over a copy of the frame.
pub fn annotate(
    frame: &Frame,
    geometry: &DockGeometry,
    detections: &FrameDetections,
    status: &DockStatus,
) -> Result<RgbImage> {
    let mut img = RgbImage::from_raw(
        frame.width as u32,
        frame.height as u32,
        frame.data.clone(),
    )
    .ok_or_else(|| {
        anyhow!(
            "frame buffer size mismatch: {} bytes for {}x{}",
            frame.data.len(),
            frame.width,
            frame.height
        )
    })?;

    draw_closed_polyline(&mut img, &geometry.zone, ZONE_COLOR);
    draw_open_polyline(&mut img, &geometry.parking_line, LINE_COLOR);

    for truck in &detections.trucks {
        draw_bbox(&mut img, &truck.bbox, TRUCK_COLOR);
    }
    for person in &detections.persons {
        draw_bbox(&mut img, &person.bbox, PERSON_COLOR);
    }

    // Status banner in the top-left corner.
    let banner = Rect::at(0, 0).of_size(BANNER_SIZE * 4, BANNER_SIZE);
    draw_filled_rect_mut(&mut img, banner, state_color(status.state));

    Ok(img)
}

fn draw_open_polyline(img: &mut RgbImage, points: &[Point], color: Rgb<u8>) {
    for pair in points.windows(2) {
        draw_line_segment_mut(
            img,
            (pair[0].x, pair[0].y),
            (pair[1].x, pair[1].y),
            color,
        );
    }
}

fn draw_closed_polyline(img: &mut RgbImage, points: &[Point], color: Rgb<u8>) {
    draw_open_polyline(img, points, color);
    if points.len() > 2 {
        let (first, last) = (points[0], points[points.len() - 1]);
        draw_line_segment_mut(img, (last.x, last.y), (first.x, first.y), color);
    }
}

fn draw_bbox(img: &mut RgbImage, bbox: &BBox, color: Rgb<u8>) {
    let w = bbox.w.max(1.0) as u32;
    let h = bbox.h.max(1.0) as u32;
    let rect = Rect::at(bbox.x as i32, bbox.y as i32).of_size(w, h);
    draw_hollow_rect_mut(img, rect, color);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Detection, DetectionClass};

    fn blank_frame(width: usize, height: usize) -> Frame {
        Frame {
            data: vec![0u8; width * height * 3],
            width,
            height,
            timestamp_ms: 0.0,
        }
    }

    fn geometry() -> DockGeometry {
        DockGeometry::new(
            vec![
                Point::new(10.0, 10.0),
                Point::new(100.0, 10.0),
                Point::new(100.0, 100.0),
                Point::new(10.0, 100.0),
            ],
            vec![Point::new(10.0, 90.0), Point::new(100.0, 90.0)],
        )
    }

    #[test]
    fn test_annotate_draws_banner_color() {
        let frame = blank_frame(160, 120);
        let status = DockStatus {
            state: DockState::Violation,
            truck_in_zone: true,
            touching_line: false,
            person_present: true,
        };
        let img = annotate(&frame, &geometry(), &FrameDetections::default(), &status).unwrap();
        assert_eq!(img.get_pixel(2, 2), &state_color(DockState::Violation));
    }

    #[test]
    fn test_annotate_draws_detection_boxes() {
        let frame = blank_frame(160, 120);
        let mut detections = FrameDetections::default();
        detections.trucks.push(Detection {
            class: DetectionClass::Truck,
            label: "truck".into(),
            bbox: BBox::new(40.0, 40.0, 30.0, 20.0),
            confidence: 0.9,
        });
        let status = DockStatus {
            state: DockState::Ok,
            truck_in_zone: true,
            touching_line: true,
            person_present: false,
        };
        let img = annotate(&frame, &geometry(), &detections, &status).unwrap();
        assert_eq!(img.get_pixel(40, 40), &TRUCK_COLOR);
    }

    #[test]
    fn test_annotate_rejects_mismatched_buffer() {
        let mut frame = blank_frame(160, 120);
        frame.data.truncate(10);
        let status = DockStatus {
            state: DockState::Ok,
            truck_in_zone: false,
            touching_line: false,
            person_present: false,
        };
        assert!(annotate(&frame, &geometry(), &FrameDetections::default(), &status).is_err());
    }
}
