// src/detector.rs
//
// The object detector is a black box behind the `Detector` trait: it takes
// a frame and returns labelled boxes with confidence scores. It may be
// slow (sub-second), so it only ever runs on the pipeline worker thread.
//
// The real backend is a YOLO ONNX model run through `ort` (feature
// `detector-ort`): letterbox preprocess, tensor run, per-anchor argmax,
// NMS. `StubDetector` serves tests and feature-less builds.

use anyhow::Result;

use crate::types::{Frame, RawDetection};

pub trait Detector: Send {
    /// Detect objects in one frame. A failure here is per-frame: the
    /// pipeline logs it and moves on to the next frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>>;
}

/// Deterministic detector that reports the same detections every frame.
pub struct StubDetector {
    detections: Vec<RawDetection>,
}

impl StubDetector {
    pub fn new(detections: Vec<RawDetection>) -> Self {
        Self { detections }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl Detector for StubDetector {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>> {
        Ok(self.detections.clone())
    }
}

#[cfg(feature = "detector-ort")]
pub use yolo::YoloDetector;

#[cfg(feature = "detector-ort")]
mod yolo {
    use anyhow::Result;
    use ort::session::{builder::GraphOptimizationLevel, Session};
    use tracing::{debug, info};

    use super::Detector;
    use crate::types::{BBox, Frame, RawDetection};

    const NMS_IOU_THRESHOLD: f32 = 0.45;
    /// Raw predictions kept before NMS; anything below this is noise.
    const MIN_SCORE: f32 = 0.05;

    pub struct YoloDetector {
        session: Session,
        input_size: usize,
        class_names: Vec<String>,
    }

    impl YoloDetector {
        pub fn new(model_path: &str, input_size: usize, class_names: Vec<String>) -> Result<Self> {
            info!("Loading YOLO model: {}", model_path);

            let session = Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_intra_threads(4)?
                .commit_from_file(model_path)?;

            info!(
                "✓ YOLO detector initialized ({} classes)",
                class_names.len()
            );
            Ok(Self {
                session,
                input_size,
                class_names,
            })
        }

        /// Letterbox the RGB frame into a square model input, preserving
        /// aspect ratio. Returns (CHW tensor, scale, pad_x, pad_y).
        fn preprocess(&self, frame: &Frame) -> (Vec<f32>, f32, f32, f32) {
            let target = self.input_size;
            let (src_w, src_h) = (frame.width, frame.height);

            let scale = (target as f32 / src_w as f32).min(target as f32 / src_h as f32);
            let scaled_w = (src_w as f32 * scale) as usize;
            let scaled_h = (src_h as f32 * scale) as usize;
            let pad_x = (target - scaled_w) as f32 / 2.0;
            let pad_y = (target - scaled_h) as f32 / 2.0;

            let resized = resize_bilinear(&frame.data, src_w, src_h, scaled_w, scaled_h);

            // Gray canvas, image centered.
            let mut canvas = vec![114u8; target * target * 3];
            for y in 0..scaled_h {
                for x in 0..scaled_w {
                    let src_idx = (y * scaled_w + x) * 3;
                    let dst_idx = ((y + pad_y as usize) * target + x + pad_x as usize) * 3;
                    canvas[dst_idx..dst_idx + 3].copy_from_slice(&resized[src_idx..src_idx + 3]);
                }
            }

            // HWC u8 -> CHW f32 in [0, 1].
            let mut input = vec![0.0f32; 3 * target * target];
            for c in 0..3 {
                for h in 0..target {
                    for w in 0..target {
                        input[c * target * target + h * target + w] =
                            canvas[(h * target + w) * 3 + c] as f32 / 255.0;
                    }
                }
            }
            (input, scale, pad_x, pad_y)
        }

        fn infer(&mut self, input: &[f32]) -> Result<Vec<f32>> {
            let shape = [1usize, 3, self.input_size, self.input_size];
            let value = ort::value::Value::from_array((
                shape.as_slice(),
                input.to_vec().into_boxed_slice(),
            ))?;
            let outputs = self.session.run(ort::inputs!["images" => value])?;
            let (_, data) = outputs[0].try_extract_tensor::<f32>()?;
            Ok(data.to_vec())
        }

        /// Output layout: [1, 4 + num_classes, num_anchors], boxes in
        /// center format. Undo the letterbox to get frame coordinates.
        fn postprocess(
            &self,
            output: &[f32],
            scale: f32,
            pad_x: f32,
            pad_y: f32,
        ) -> Vec<RawDetection> {
            let num_classes = self.class_names.len();
            let stride = 4 + num_classes;
            if output.len() % stride != 0 {
                return Vec::new();
            }
            let anchors = output.len() / stride;

            let mut detections = Vec::new();
            for i in 0..anchors {
                let cx = output[i];
                let cy = output[anchors + i];
                let w = output[anchors * 2 + i];
                let h = output[anchors * 3 + i];

                let mut best_score = 0.0f32;
                let mut best_class = 0usize;
                for c in 0..num_classes {
                    let score = output[anchors * (4 + c) + i];
                    if score > best_score {
                        best_score = score;
                        best_class = c;
                    }
                }
                if best_score < MIN_SCORE {
                    continue;
                }

                let x1 = (cx - w / 2.0 - pad_x) / scale;
                let y1 = (cy - h / 2.0 - pad_y) / scale;
                let x2 = (cx + w / 2.0 - pad_x) / scale;
                let y2 = (cy + h / 2.0 - pad_y) / scale;

                detections.push(RawDetection {
                    label: self.class_names[best_class].clone(),
                    bbox: BBox::from_corners(x1, y1, x2, y2),
                    confidence: best_score,
                });
            }

            nms(detections, NMS_IOU_THRESHOLD)
        }
    }

    impl Detector for YoloDetector {
        fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
            let (input, scale, pad_x, pad_y) = self.preprocess(frame);
            let output = self.infer(&input)?;
            let detections = self.postprocess(&output, scale, pad_x, pad_y);
            debug!("Detected {} objects", detections.len());
            Ok(detections)
        }
    }

    fn resize_bilinear(
        src: &[u8],
        src_w: usize,
        src_h: usize,
        dst_w: usize,
        dst_h: usize,
    ) -> Vec<u8> {
        let mut dst = vec![0u8; dst_h * dst_w * 3];
        let x_ratio = src_w as f32 / dst_w as f32;
        let y_ratio = src_h as f32 / dst_h as f32;

        for dy in 0..dst_h {
            for dx in 0..dst_w {
                let sx = dx as f32 * x_ratio;
                let sy = dy as f32 * y_ratio;
                let sx0 = sx.floor() as usize;
                let sy0 = sy.floor() as usize;
                let sx1 = (sx0 + 1).min(src_w - 1);
                let sy1 = (sy0 + 1).min(src_h - 1);
                let fx = sx - sx0 as f32;
                let fy = sy - sy0 as f32;

                for c in 0..3 {
                    let p00 = src[(sy0 * src_w + sx0) * 3 + c] as f32;
                    let p10 = src[(sy0 * src_w + sx1) * 3 + c] as f32;
                    let p01 = src[(sy1 * src_w + sx0) * 3 + c] as f32;
                    let p11 = src[(sy1 * src_w + sx1) * 3 + c] as f32;
                    let val = p00 * (1.0 - fx) * (1.0 - fy)
                        + p10 * fx * (1.0 - fy)
                        + p01 * (1.0 - fx) * fy
                        + p11 * fx * fy;
                    dst[(dy * dst_w + dx) * 3 + c] = val.round() as u8;
                }
            }
        }
        dst
    }

    fn nms(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
        detections.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut keep: Vec<RawDetection> = Vec::new();
        'outer: for det in detections {
            for kept in &keep {
                if iou(&det.bbox, &kept.bbox) >= iou_threshold {
                    continue 'outer;
                }
            }
            keep.push(det);
        }
        keep
    }

    fn iou(a: &BBox, b: &BBox) -> f32 {
        let x1 = a.x.max(b.x);
        let y1 = a.y.max(b.y);
        let x2 = (a.x + a.w).min(b.x + b.w);
        let y2 = (a.y + a.h).min(b.y + b.h);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = a.w * a.h + b.w * b.h - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BBox;

    #[test]
    fn test_stub_detector_is_deterministic() {
        let det = RawDetection {
            label: "truck".into(),
            bbox: BBox::new(1.0, 2.0, 3.0, 4.0),
            confidence: 0.9,
        };
        let mut stub = StubDetector::new(vec![det]);
        let frame = Frame {
            data: vec![0; 12],
            width: 2,
            height: 2,
            timestamp_ms: 0.0,
        };
        let first = stub.detect(&frame).unwrap();
        let second = stub.detect(&frame).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].label, "truck");
    }
}
