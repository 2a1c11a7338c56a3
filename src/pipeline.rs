// src/pipeline.rs
//
// The detection-to-state loop: one worker thread pulls frames from the
// source, runs the detector, classifies, decides, and publishes the
// result to a single-slot latest-frame handoff that the consumer polls.
//
// The slot overwrites on full — the pipeline always favors freshness over
// completeness, since the source frame rate typically exceeds the
// consumer's. Overwritten frames are counted as drops, not errors.
//
// Shared mutable state is limited to the state flag, the slot, the last
// status and the exit record, each behind its own mutex with swap-only
// critical sections. Frame contents are never shared: a PipelineFrame is
// owned by exactly one stage at a time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{error, info, warn};

use crate::classifier::{classify, ClassMap};
use crate::decision::{decide, DecisionSettings};
use crate::detector::Detector;
use crate::error::DockError;
use crate::source::FrameSource;
use crate::types::{DockStatus, PipelineFrame};
use crate::zone::DockGeometry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Running,
    Stopping,
}

/// Why the worker loop exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// stop() was requested.
    StopRequested,
    /// End of video file or camera disconnect.
    SourceExhausted,
    /// Unrecoverable error, e.g. geometry failure mid-loop.
    Fatal(String),
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub confidence_threshold: f32,
    pub decision: DecisionSettings,
}

/// Counters for the frame loop. Drops are expected under load.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    frames_processed: AtomicU64,
    frames_failed: AtomicU64,
    frames_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_processed: u64,
    pub frames_failed: u64,
    pub frames_dropped: u64,
}

impl PipelineMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_failed: self.frames_failed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

struct Shared {
    state: Mutex<PipelineState>,
    latest: Mutex<Option<PipelineFrame>>,
    status: Mutex<Option<DockStatus>>,
    exit: Mutex<Option<ExitReason>>,
    metrics: PipelineMetrics,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct DockPipeline {
    geometry: Arc<DockGeometry>,
    class_map: Arc<ClassMap>,
    settings: PipelineSettings,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl DockPipeline {
    pub fn new(geometry: DockGeometry, class_map: ClassMap, settings: PipelineSettings) -> Self {
        Self {
            geometry: Arc::new(geometry),
            class_map: Arc::new(class_map),
            settings,
            shared: Arc::new(Shared {
                state: Mutex::new(PipelineState::Stopped),
                latest: Mutex::new(None),
                status: Mutex::new(None),
                exit: Mutex::new(None),
                metrics: PipelineMetrics::default(),
            }),
            worker: None,
        }
    }

    /// Transitions STOPPED → RUNNING and spawns the worker.
    ///
    /// Geometry is validated here so a malformed configuration surfaces
    /// synchronously to the caller instead of guessing a status later.
    /// Fails with `AlreadyRunning` while RUNNING or STOPPING.
    pub fn start(
        &mut self,
        source: Box<dyn FrameSource>,
        detector: Box<dyn Detector>,
    ) -> Result<(), DockError> {
        self.geometry.validate()?;

        {
            let mut state = lock(&self.shared.state);
            if *state != PipelineState::Stopped {
                return Err(DockError::AlreadyRunning);
            }
            *state = PipelineState::Running;
        }

        // Reap a worker that stopped on its own (source exhaustion).
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        *lock(&self.shared.exit) = None;

        let shared = Arc::clone(&self.shared);
        let geometry = Arc::clone(&self.geometry);
        let class_map = Arc::clone(&self.class_map);
        let settings = self.settings;

        let handle =
            thread::spawn(move || run_loop(shared, geometry, class_map, settings, source, detector));
        self.worker = Some(handle);

        info!("Pipeline started");
        Ok(())
    }

    /// Signals the worker to exit after in-flight work and joins it.
    /// At most one extra frame is processed after the request; once this
    /// returns, nothing further is published. Idempotent: a no-op while
    /// STOPPED.
    pub fn stop(&mut self) {
        let was_running = {
            let mut state = lock(&self.shared.state);
            match *state {
                PipelineState::Stopped => false,
                PipelineState::Running | PipelineState::Stopping => {
                    *state = PipelineState::Stopping;
                    true
                }
            }
        };
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        *lock(&self.shared.state) = PipelineState::Stopped;
        if was_running {
            info!("Pipeline stopped");
        }
    }

    /// Replaces the zone/line configuration for the next session.
    /// Only permitted while STOPPED; geometry is never swapped while
    /// frames are in flight.
    pub fn set_geometry(&mut self, geometry: DockGeometry) -> Result<(), DockError> {
        if self.state() != PipelineState::Stopped {
            return Err(DockError::AlreadyRunning);
        }
        geometry.validate()?;
        self.geometry = Arc::new(geometry);
        Ok(())
    }

    pub fn state(&self) -> PipelineState {
        *lock(&self.shared.state)
    }

    /// Last known good status. Retained across skipped or failed frames
    /// so a single bad frame never causes status flicker.
    pub fn status(&self) -> Option<DockStatus> {
        *lock(&self.shared.status)
    }

    /// Takes the most recent published frame, leaving the slot empty.
    pub fn take_latest(&self) -> Option<PipelineFrame> {
        lock(&self.shared.latest).take()
    }

    /// Why the last run ended, once the worker has exited.
    pub fn exit_reason(&self) -> Option<ExitReason> {
        lock(&self.shared.exit).clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

impl Drop for DockPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(
    shared: Arc<Shared>,
    geometry: Arc<DockGeometry>,
    class_map: Arc<ClassMap>,
    settings: PipelineSettings,
    mut source: Box<dyn FrameSource>,
    mut detector: Box<dyn Detector>,
) {
    let mut frame_id: u64 = 0;

    let reason = loop {
        // Stop flag is observed at the top of the loop body only; no
        // cancellation mid-detection.
        if *lock(&shared.state) == PipelineState::Stopping {
            break ExitReason::StopRequested;
        }

        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("Frame source exhausted after {} frames", frame_id);
                break ExitReason::SourceExhausted;
            }
            Err(e) => {
                warn!("Frame source failed: {e:#}");
                break ExitReason::SourceExhausted;
            }
        };
        frame_id += 1;

        let raw = match detector.detect(&frame) {
            Ok(raw) => raw,
            Err(e) => {
                // Per-frame failure: logged and skipped, previous status
                // stands.
                warn!("Detector failed on frame {}: {e:#}", frame_id);
                shared.metrics.frames_failed.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        let detections = classify(raw, &class_map, settings.confidence_threshold);
        let status = match decide(&geometry, &detections, &settings.decision) {
            Ok(status) => status,
            Err(e) => {
                // Geometry failure cannot be recovered by retrying frames.
                error!("Decision failed on frame {}: {e}", frame_id);
                break ExitReason::Fatal(e.to_string());
            }
        };

        *lock(&shared.status) = Some(status);

        let published = PipelineFrame {
            frame_id,
            frame,
            detections,
            status,
        };
        let overwritten = lock(&shared.latest).replace(published).is_some();
        if overwritten {
            shared.metrics.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
        shared
            .metrics
            .frames_processed
            .fetch_add(1, Ordering::Relaxed);
    };

    *lock(&shared.exit) = Some(reason);
    *lock(&shared.state) = PipelineState::Stopped;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::StubDetector;
    use crate::source::{FrameSource, StaticSource};
    use crate::types::{
        BBox, DetectionConfig, DockState, Frame, PersonScope, Point, RawDetection,
    };
    use std::time::{Duration, Instant};

    fn geometry() -> DockGeometry {
        DockGeometry::new(
            vec![
                Point::new(0.0, 0.0),
                Point::new(10.0, 0.0),
                Point::new(10.0, 10.0),
                Point::new(0.0, 10.0),
            ],
            vec![Point::new(0.0, 9.0), Point::new(10.0, 9.0)],
        )
    }

    fn class_map() -> ClassMap {
        ClassMap::new(&DetectionConfig {
            confidence_threshold: 0.5,
            touch_threshold_px: 1.0,
            person_scope: PersonScope::Zone,
            truck_labels: vec!["truck".into()],
            person_labels: vec!["person".into()],
            marker_labels: vec![],
            ignored_labels: vec!["forklift".into()],
        })
        .unwrap()
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            confidence_threshold: 0.5,
            decision: DecisionSettings {
                touch_threshold_px: 1.0,
                person_scope: PersonScope::Zone,
            },
        }
    }

    fn pipeline() -> DockPipeline {
        DockPipeline::new(geometry(), class_map(), settings())
    }

    fn warning_truck() -> RawDetection {
        // In zone at bottom-center (5,4), 5px from the line: WARNING.
        RawDetection {
            label: "truck".into(),
            bbox: BBox::new(4.0, 2.0, 2.0, 2.0),
            confidence: 0.9,
        }
    }

    /// Source that serves blank frames forever, with a small delay so
    /// stop() is exercised against a live loop.
    struct EndlessSource;

    impl FrameSource for EndlessSource {
        fn next_frame(&mut self) -> anyhow::Result<Option<Frame>> {
            std::thread::sleep(Duration::from_millis(2));
            Ok(Some(Frame {
                data: vec![0u8; 12],
                width: 2,
                height: 2,
                timestamp_ms: 0.0,
            }))
        }
    }

    /// Detector that replays a script of responses, then empty frames.
    struct ScriptedDetector {
        script: std::collections::VecDeque<anyhow::Result<Vec<RawDetection>>>,
    }

    impl crate::detector::Detector for ScriptedDetector {
        fn detect(&mut self, _frame: &Frame) -> anyhow::Result<Vec<RawDetection>> {
            self.script.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn wait_until_stopped(p: &DockPipeline) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while p.state() != PipelineState::Stopped {
            assert!(Instant::now() < deadline, "pipeline did not stop in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_start_while_running_fails() {
        let mut p = pipeline();
        p.start(Box::new(EndlessSource), Box::new(StubDetector::empty()))
            .unwrap();
        let err = p
            .start(Box::new(EndlessSource), Box::new(StubDetector::empty()))
            .unwrap_err();
        assert!(matches!(err, DockError::AlreadyRunning));
        p.stop();
    }

    #[test]
    fn test_start_rejects_malformed_geometry() {
        let bad = DockGeometry::new(vec![Point::new(0.0, 0.0)], vec![]);
        let mut p = DockPipeline::new(bad, class_map(), settings());
        let err = p
            .start(Box::new(EndlessSource), Box::new(StubDetector::empty()))
            .unwrap_err();
        assert!(matches!(err, DockError::InvalidGeometry { .. }));
        assert_eq!(p.state(), PipelineState::Stopped);
    }

    #[test]
    fn test_stop_is_idempotent_and_silences_publishing() {
        let mut p = pipeline();
        p.start(
            Box::new(EndlessSource),
            Box::new(StubDetector::new(vec![warning_truck()])),
        )
        .unwrap();

        // Let it publish at least once.
        let deadline = Instant::now() + Duration::from_secs(5);
        while p.status().is_none() {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(5));
        }

        p.stop();
        assert_eq!(p.state(), PipelineState::Stopped);
        assert_eq!(p.exit_reason(), Some(ExitReason::StopRequested));

        // Drain whatever was published before the stop; nothing new may
        // appear afterwards.
        let _ = p.take_latest();
        std::thread::sleep(Duration::from_millis(30));
        assert!(p.take_latest().is_none());

        // Second stop is a no-op.
        p.stop();
        assert_eq!(p.state(), PipelineState::Stopped);
    }

    #[test]
    fn test_source_exhaustion_stops_cleanly() {
        let mut p = pipeline();
        p.start(
            Box::new(StaticSource::blank(3, 2, 2)),
            Box::new(StubDetector::new(vec![warning_truck()])),
        )
        .unwrap();
        wait_until_stopped(&p);

        assert_eq!(p.exit_reason(), Some(ExitReason::SourceExhausted));
        let metrics = p.metrics();
        assert_eq!(metrics.frames_processed, 3);
        // The consumer never polled, so two of three frames were
        // overwritten in the slot.
        assert_eq!(metrics.frames_dropped, 2);

        let latest = p.take_latest().expect("last frame still in slot");
        assert_eq!(latest.frame_id, 3);
        assert_eq!(latest.status.state, DockState::Warning);
    }

    #[test]
    fn test_detector_failure_skips_frame_and_retains_status() {
        let script = vec![
            Ok(vec![warning_truck()]),
            Err(anyhow::anyhow!("inference blew up")),
        ];
        let mut p = pipeline();
        p.start(
            Box::new(StaticSource::blank(2, 2, 2)),
            Box::new(ScriptedDetector {
                script: script.into(),
            }),
        )
        .unwrap();
        wait_until_stopped(&p);

        // Failed frame contributed no update; last good status stands.
        let status = p.status().expect("status from the good frame");
        assert_eq!(status.state, DockState::Warning);
        let metrics = p.metrics();
        assert_eq!(metrics.frames_processed, 1);
        assert_eq!(metrics.frames_failed, 1);
    }

    #[test]
    fn test_restart_after_exhaustion() {
        let mut p = pipeline();
        p.start(
            Box::new(StaticSource::blank(1, 2, 2)),
            Box::new(StubDetector::empty()),
        )
        .unwrap();
        wait_until_stopped(&p);

        p.start(
            Box::new(StaticSource::blank(2, 2, 2)),
            Box::new(StubDetector::empty()),
        )
        .unwrap();
        wait_until_stopped(&p);
        assert_eq!(p.metrics().frames_processed, 3);
    }

    #[test]
    fn test_geometry_swap_only_between_sessions() {
        let mut p = pipeline();
        p.start(Box::new(EndlessSource), Box::new(StubDetector::empty()))
            .unwrap();
        let err = p.set_geometry(geometry()).unwrap_err();
        assert!(matches!(err, DockError::AlreadyRunning));
        p.stop();

        p.set_geometry(geometry()).unwrap();
        p.start(
            Box::new(StaticSource::blank(1, 2, 2)),
            Box::new(StubDetector::empty()),
        )
        .unwrap();
        wait_until_stopped(&p);
    }

    #[test]
    fn test_empty_frame_reports_ok() {
        let mut p = pipeline();
        p.start(
            Box::new(StaticSource::blank(1, 2, 2)),
            Box::new(StubDetector::empty()),
        )
        .unwrap();
        wait_until_stopped(&p);

        let status = p.status().unwrap();
        assert_eq!(status.state, DockState::Ok);
        assert!(!status.truck_in_zone);
        assert!(!status.person_present);
    }
}
