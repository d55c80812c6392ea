//! Label volume sampler trait.

use crate::Voxel;

/// Read-only access to an integer-labelled segmentation over time.
///
/// This trait abstracts the segmentation output so that the correction
/// engine can run against an in-memory buffer, a memory-mapped stack or a
/// synthetic volume generated by the simulation harness.
///
/// Label `0` means "no object". Sampling outside the volume returns `0`
/// rather than failing: events and spots near the border simply resolve
/// to nothing.
pub trait LabelVolume: Send + Sync + 'static {
    /// Spatial shape `[nx, ny, nz]`. 2-D volumes report `nz = 1`.
    fn shape(&self) -> [usize; 3];

    /// Number of frames in the time axis.
    fn n_frames(&self) -> usize;

    /// Samples the label at a voxel in a frame.
    fn label(&self, voxel: Voxel, frame: usize) -> u32;

    /// Number of spatial dimensions (2 or 3).
    fn ndim(&self) -> usize {
        if self.shape()[2] > 1 {
            3
        } else {
            2
        }
    }

    /// Index of the last frame, if any.
    fn last_frame(&self) -> Option<usize> {
        self.n_frames().checked_sub(1)
    }

    /// Returns true if the voxel lies inside the spatial extent.
    fn contains(&self, voxel: Voxel) -> bool {
        let shape = self.shape();
        (0..3).all(|d| voxel[d] >= 0 && (voxel[d] as usize) < shape[d])
    }

    /// Largest non-zero label along the Z column at `(x, y)`, if any.
    ///
    /// Used to tolerate vertical localisation error of event detections.
    fn column_max_label(&self, x: i64, y: i64, frame: usize) -> Option<u32> {
        let nz = self.shape()[2] as i64;
        (0..nz)
            .map(|z| self.label([x, y, z], frame))
            .filter(|&label| label != 0)
            .max()
    }

    /// All voxels carrying `label` in `frame`.
    fn voxels_with_label(&self, label: u32, frame: usize) -> Vec<Voxel> {
        let [nx, ny, nz] = self.shape();
        let mut voxels = Vec::new();
        if label == 0 || frame >= self.n_frames() {
            return voxels;
        }
        for z in 0..nz as i64 {
            for y in 0..ny as i64 {
                for x in 0..nx as i64 {
                    if self.label([x, y, z], frame) == label {
                        voxels.push([x, y, z]);
                    }
                }
            }
        }
        voxels
    }
}
