// src/main.rs

mod classifier;
mod config;
mod decision;
mod detector;
mod error;
mod geometry;
mod overlay;
mod pipeline;
mod relay;
mod source;
mod types;
mod zone;

use anyhow::Result;
use clap::Parser;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

use classifier::ClassMap;
use decision::DecisionSettings;
use detector::Detector;
use pipeline::{DockPipeline, ExitReason, PipelineSettings, PipelineState};
use relay::{RelayWorker, TcpLineRelay};
use source::FrameSource;
use types::{Config, DockState, PipelineFrame};
use zone::DockGeometry;

/// Poll cadence of the consumer loop; the pipeline slot overwrites
/// in between, so a slower consumer only means fresher drops.
const CONSUMER_POLL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "dock-sentinel", about = "Loading-dock status monitor")]
struct Args {
    /// Application configuration (YAML).
    #[arg(long, default_value = "config.yaml")]
    config: String,

    /// Zone and parking-line geometry (JSON).
    #[arg(long, default_value = "zone_config.json")]
    zones: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "dock_sentinel={},ort=warn",
            config.logging.level
        ))
        .init();
    info!("🚚 Dock Sentinel starting");

    let geometry = DockGeometry::load(&args.zones)?;
    let class_map = ClassMap::new(&config.detection)?;
    info!("✓ Class map validated");

    let settings = PipelineSettings {
        confidence_threshold: config.detection.confidence_threshold,
        decision: DecisionSettings {
            touch_threshold_px: config.detection.touch_threshold_px,
            person_scope: config.detection.person_scope,
        },
    };

    let frame_source = open_source(&config)?;
    let object_detector = build_detector(&config)?;

    let mut dock_pipeline = DockPipeline::new(geometry.clone(), class_map, settings);
    dock_pipeline.start(frame_source, object_detector)?;

    let status_relay = if config.relay.enabled {
        info!("Relay enabled -> {}", config.relay.addr);
        Some(RelayWorker::spawn(Box::new(TcpLineRelay::new(
            config.relay.addr.clone(),
        ))))
    } else {
        None
    };

    // Consumer: poll the latest-frame slot, report and relay transitions.
    let mut last_state: Option<DockState> = None;
    while dock_pipeline.state() != PipelineState::Stopped {
        if let Some(published) = dock_pipeline.take_latest() {
            let status = published.status;
            if last_state != Some(status.state) {
                info!(
                    "Dock status: {} (truck_in_zone={}, touching_line={}, person_present={})",
                    status.state.as_str(),
                    status.truck_in_zone,
                    status.touching_line,
                    status.person_present
                );
                if let Some(relay) = &status_relay {
                    relay.update(status.state);
                }
                if config.video.save_annotated {
                    save_annotated(&config.video.output_dir, &published, &geometry);
                }
                last_state = Some(status.state);
            }
        }
        thread::sleep(CONSUMER_POLL);
    }

    // The source may have ended between polls; report the final frame.
    if let Some(published) = dock_pipeline.take_latest() {
        if last_state != Some(published.status.state) {
            info!("Final dock status: {}", published.status.state.as_str());
            if let Some(relay) = &status_relay {
                relay.update(published.status.state);
            }
        }
    }

    match dock_pipeline.exit_reason() {
        Some(ExitReason::SourceExhausted) => info!("Video source ended"),
        Some(ExitReason::Fatal(reason)) => error!("Pipeline aborted: {}", reason),
        Some(ExitReason::StopRequested) | None => {}
    }
    let metrics = dock_pipeline.metrics();
    info!(
        "Frames: {} processed, {} failed, {} dropped",
        metrics.frames_processed, metrics.frames_failed, metrics.frames_dropped
    );

    dock_pipeline.stop();
    if let Some(relay) = status_relay {
        relay.shutdown();
    }
    Ok(())
}

fn save_annotated(output_dir: &str, published: &PipelineFrame, geometry: &DockGeometry) {
    let dir = if output_dir.is_empty() {
        "output"
    } else {
        output_dir
    };
    let result = std::fs::create_dir_all(dir)
        .map_err(anyhow::Error::from)
        .and_then(|_| {
            overlay::annotate(
                &published.frame,
                geometry,
                &published.detections,
                &published.status,
            )
        })
        .and_then(|img| {
            let path = format!(
                "{}/frame_{:06}_{}.png",
                dir,
                published.frame_id,
                published.status.state.as_str()
            );
            img.save(&path)?;
            info!("Saved annotated frame: {}", path);
            Ok(())
        });
    if let Err(e) = result {
        warn!("Could not save annotated frame: {e:#}");
    }
}

#[cfg(feature = "source-opencv")]
fn open_source(config: &Config) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(source::VideoSource::open(&config.video.source)?))
}

#[cfg(not(feature = "source-opencv"))]
fn open_source(config: &Config) -> Result<Box<dyn FrameSource>> {
    warn!(
        "Built without the source-opencv feature; serving synthetic frames instead of {:?}",
        config.video.source
    );
    Ok(Box::new(source::StaticSource::blank(30, 640, 480)))
}

#[cfg(feature = "detector-ort")]
fn build_detector(config: &Config) -> Result<Box<dyn Detector>> {
    Ok(Box::new(detector::YoloDetector::new(
        &config.model.path,
        config.model.input_size,
        config.model.class_names.clone(),
    )?))
}

#[cfg(not(feature = "detector-ort"))]
fn build_detector(_config: &Config) -> Result<Box<dyn Detector>> {
    warn!("Built without the detector-ort feature; using a stub detector");
    Ok(Box::new(detector::StubDetector::empty()))
}
