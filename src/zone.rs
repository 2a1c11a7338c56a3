// src/zone.rs
//
// Immutable zone/parking-line store. Loaded once per session from the
// zone configuration file, validated, then shared read-only behind an Arc.
// Reloading requires restarting the pipeline; geometry is never swapped
// mid-frame.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::DockError;
use crate::types::Point;

/// On-disk record: ordered [x, y] pixel pairs for the zone polygon (≥3)
/// and the parking line polyline (≥2).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ZoneConfigFile {
    zone_coordinates: Vec<[f32; 2]>,
    parking_line_points: Vec<[f32; 2]>,
}

/// The geometric configuration consumed by the decision engine.
#[derive(Debug, Clone)]
pub struct DockGeometry {
    pub zone: Vec<Point>,
    pub parking_line: Vec<Point>,
}

impl DockGeometry {
    pub fn new(zone: Vec<Point>, parking_line: Vec<Point>) -> Self {
        Self { zone, parking_line }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading zone config {}", path.display()))?;
        let file: ZoneConfigFile = serde_json::from_str(&contents)
            .with_context(|| format!("parsing zone config {}", path.display()))?;

        let geometry = Self {
            zone: file
                .zone_coordinates
                .iter()
                .map(|[x, y]| Point::new(*x, *y))
                .collect(),
            parking_line: file
                .parking_line_points
                .iter()
                .map(|[x, y]| Point::new(*x, *y))
                .collect(),
        };
        info!(
            "Loaded zone config: {} zone vertices, {} parking line points",
            geometry.zone.len(),
            geometry.parking_line.len()
        );
        Ok(geometry)
    }

    /// Validates the shape constraints. Called once before the pipeline
    /// starts; the decision engine assumes a validated geometry.
    pub fn validate(&self) -> Result<(), DockError> {
        if self.zone.len() < 3 {
            return Err(DockError::invalid_geometry(format!(
                "zone polygon needs at least 3 vertices, got {}",
                self.zone.len()
            )));
        }
        if self.parking_line.len() < 2 {
            return Err(DockError::invalid_geometry(format!(
                "parking line needs at least 2 points, got {}",
                self.parking_line.len()
            )));
        }
        for p in self.zone.iter().chain(self.parking_line.iter()) {
            if !p.x.is_finite() || !p.y.is_finite() {
                return Err(DockError::invalid_geometry(
                    "zone/line coordinates must be finite",
                ));
            }
        }
        Ok(())
    }
}
