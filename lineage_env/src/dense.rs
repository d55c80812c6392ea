//! In-memory implementation of LabelVolume.

use crate::{EnvError, LabelVolume, Voxel};

/// Dense label buffer backed by a single `Vec<u32>`.
///
/// Layout is frame-major, then z, y, x (x fastest), matching how label
/// stacks are usually written out by segmentation tools.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseLabelVolume {
    /// Spatial shape [nx, ny, nz]
    shape: [usize; 3],

    /// Number of frames
    n_frames: usize,

    /// Label storage
    labels: Vec<u32>,
}

impl DenseLabelVolume {
    /// Creates an empty (all background) volume.
    pub fn new(shape: [usize; 3], n_frames: usize) -> Self {
        let shape = [shape[0], shape[1], shape[2].max(1)];
        let len = shape[0] * shape[1] * shape[2] * n_frames;
        Self {
            shape,
            n_frames,
            labels: vec![0; len],
        }
    }

    /// Wraps an existing label buffer.
    pub fn from_labels(shape: [usize; 3], n_frames: usize, labels: Vec<u32>) -> Result<Self, EnvError> {
        let shape = [shape[0], shape[1], shape[2].max(1)];
        let expected = shape[0] * shape[1] * shape[2] * n_frames;
        if labels.len() != expected {
            return Err(EnvError::ShapeMismatch { expected, got: labels.len() });
        }
        Ok(Self { shape, n_frames, labels })
    }

    fn offset(&self, voxel: Voxel, frame: usize) -> Option<usize> {
        if frame >= self.n_frames || !self.contains(voxel) {
            return None;
        }
        let [nx, ny, nz] = self.shape;
        let [x, y, z] = [voxel[0] as usize, voxel[1] as usize, voxel[2] as usize];
        Some(((frame * nz + z) * ny + y) * nx + x)
    }

    /// Writes a single label.
    pub fn set(&mut self, voxel: Voxel, frame: usize, label: u32) -> Result<(), EnvError> {
        match self.offset(voxel, frame) {
            Some(idx) => {
                self.labels[idx] = label;
                Ok(())
            }
            None if frame >= self.n_frames => Err(EnvError::FrameOutOfRange {
                frame,
                n_frames: self.n_frames,
            }),
            None => Err(EnvError::OutOfBounds { voxel, shape: self.shape }),
        }
    }

    /// Paints a filled, rotated ellipse into every z-slice of a frame.
    ///
    /// `radii` are the semi-axes along the rotated x and y directions,
    /// `angle` is the rotation of the first semi-axis in radians.
    /// Returns the number of voxels painted.
    pub fn paint_ellipse(
        &mut self,
        frame: usize,
        center: [f64; 2],
        radii: [f64; 2],
        angle: f64,
        label: u32,
    ) -> usize {
        if frame >= self.n_frames || radii[0] <= 0.0 || radii[1] <= 0.0 {
            return 0;
        }
        let (sin, cos) = angle.sin_cos();
        let reach = radii[0].max(radii[1]).ceil() as i64 + 1;
        let cx = center[0].round() as i64;
        let cy = center[1].round() as i64;
        let mut painted = 0;

        for y in (cy - reach)..=(cy + reach) {
            for x in (cx - reach)..=(cx + reach) {
                let dx = x as f64 - center[0];
                let dy = y as f64 - center[1];
                // Rotate into the ellipse frame
                let u = dx * cos + dy * sin;
                let v = -dx * sin + dy * cos;
                if (u / radii[0]).powi(2) + (v / radii[1]).powi(2) > 1.0 {
                    continue;
                }
                for z in 0..self.shape[2] as i64 {
                    if let Some(idx) = self.offset([x, y, z], frame) {
                        self.labels[idx] = label;
                        painted += 1;
                    }
                }
            }
        }
        painted
    }
}

impl LabelVolume for DenseLabelVolume {
    fn shape(&self) -> [usize; 3] {
        self.shape
    }

    fn n_frames(&self) -> usize {
        self.n_frames
    }

    fn label(&self, voxel: Voxel, frame: usize) -> u32 {
        self.offset(voxel, frame).map(|idx| self.labels[idx]).unwrap_or(0)
    }
}
