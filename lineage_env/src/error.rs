//! Error types for the lineage environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvError {
    /// Voxel lies outside the label volume
    #[error("Voxel {voxel:?} out of bounds for shape {shape:?}")]
    OutOfBounds { voxel: [i64; 3], shape: [usize; 3] },

    /// Frame index past the end of the volume
    #[error("Frame {frame} out of range ({n_frames} frames)")]
    FrameOutOfRange { frame: usize, n_frames: usize },

    /// Calibration component is zero, negative or not finite
    #[error("Invalid calibration: {0}")]
    InvalidCalibration(String),

    /// Label buffer does not match the declared shape
    #[error("Shape mismatch: expected {expected} labels, got {got}")]
    ShapeMismatch { expected: usize, got: usize },
}

impl EnvError {
    /// Creates an invalid-calibration error.
    pub fn calibration(msg: impl Into<String>) -> Self {
        Self::InvalidCalibration(msg.into())
    }
}
