// src/error.rs
//
// Typed error taxonomy for the dock pipeline. Configuration errors
// (geometry, class mapping) are fatal before any frame is processed;
// per-frame errors are absorbed inside the loop and never propagate out.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DockError {
    /// Malformed zone or parking-line configuration. Fatal to pipeline start.
    #[error("invalid geometry: {reason}")]
    InvalidGeometry { reason: String },

    /// A detection label is mapped to more than one category. Caught at
    /// configuration validation, never at runtime per frame.
    #[error("ambiguous class mapping: label {label:?} appears in more than one category")]
    AmbiguousClassMapping { label: String },

    /// The detector failed on a single frame. Logged and skipped by the loop.
    #[error("detector failure: {reason}")]
    DetectorFailure { reason: String },

    /// End of video file or camera disconnect. Clean stop, not a crash.
    #[error("frame source exhausted")]
    SourceExhausted,

    /// start() called while the pipeline is RUNNING or STOPPING.
    #[error("pipeline already running")]
    AlreadyRunning,
}

impl DockError {
    pub fn invalid_geometry(reason: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            reason: reason.into(),
        }
    }
}
