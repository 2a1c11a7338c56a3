// src/source.rs
//
// Frame acquisition. `FrameSource::next_frame` may block on I/O — video
// capture is inherently blocking — so it only ever runs on the pipeline
// worker thread. `Ok(None)` signals clean exhaustion (end of file or
// camera disconnect), which the pipeline turns into a clean stop.

use anyhow::Result;
use std::collections::VecDeque;

use crate::types::Frame;

pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// In-memory source serving a fixed sequence of frames, then exhaustion.
/// Used by tests and by feature-less demo builds.
pub struct StaticSource {
    frames: VecDeque<Frame>,
}

impl StaticSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    /// `count` blank RGB frames of the given size, 33ms apart.
    pub fn blank(count: usize, width: usize, height: usize) -> Self {
        let frames = (0..count)
            .map(|i| Frame {
                data: vec![0u8; width * height * 3],
                width,
                height,
                timestamp_ms: i as f64 * 33.0,
            })
            .collect();
        Self::new(frames)
    }
}

impl FrameSource for StaticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.frames.pop_front())
    }
}

#[cfg(feature = "source-opencv")]
pub use video::VideoSource;

#[cfg(feature = "source-opencv")]
mod video {
    use anyhow::Result;
    use opencv::{
        core::Mat,
        imgproc,
        prelude::*,
        videoio::{self, VideoCapture, VideoCaptureTraitConst},
    };
    use tracing::info;

    use super::FrameSource;
    use crate::types::Frame;

    /// Video file or camera source backed by OpenCV's `VideoCapture`.
    pub struct VideoSource {
        cap: VideoCapture,
    }

    impl VideoSource {
        /// `source` is a file path, or a bare digit string for a camera index.
        pub fn open(source: &str) -> Result<Self> {
            info!("Opening video source: {}", source);

            let cap = if let Ok(index) = source.parse::<i32>() {
                VideoCapture::new(index, videoio::CAP_ANY)?
            } else {
                VideoCapture::from_file(source, videoio::CAP_ANY)?
            };
            if !cap.is_opened()? {
                anyhow::bail!("failed to open video source {source:?}");
            }

            let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
            let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)?;
            let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)?;
            info!("Video properties: {}x{} @ {:.1} FPS", width, height, fps);

            Ok(Self { cap })
        }
    }

    impl FrameSource for VideoSource {
        fn next_frame(&mut self) -> Result<Option<Frame>> {
            use opencv::videoio::VideoCaptureTrait;

            let mut bgr = Mat::default();
            if !self.cap.read(&mut bgr)? || bgr.empty() {
                return Ok(None);
            }

            let timestamp_ms =
                VideoCaptureTraitConst::get(&self.cap, videoio::CAP_PROP_POS_MSEC)?;

            let mut rgb = Mat::default();
            imgproc::cvt_color(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

            // Some backends misreport the advertised size; trust the mat.
            Ok(Some(Frame {
                data: rgb.data_bytes()?.to_vec(),
                width: rgb.cols() as usize,
                height: rgb.rows() as usize,
                timestamp_ms,
            }))
        }
    }
}
