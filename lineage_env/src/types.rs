//! Common types for the lineage environment abstraction.

use serde::{Deserialize, Serialize};

use crate::EnvError;

/// Integer voxel coordinate `[x, y, z]`. 2-D volumes use `z = 0`.
pub type Voxel = [i64; 3];

/// Physical size of one voxel along `[x, y, z]`.
///
/// Track node positions are physical; label volumes are indexed in voxels.
/// Dividing a position by the calibration gives the voxel it falls in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration(pub [f64; 3]);

impl Calibration {
    /// Creates a calibration, rejecting zero, negative or non-finite sizes.
    pub fn new(dx: f64, dy: f64, dz: f64) -> Result<Self, EnvError> {
        for (axis, value) in [("x", dx), ("y", dy), ("z", dz)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(EnvError::calibration(format!("{axis} = {value}")));
            }
        }
        Ok(Self([dx, dy, dz]))
    }

    /// Unit calibration (positions already in voxels).
    pub fn unit() -> Self {
        Self([1.0, 1.0, 1.0])
    }

    /// Converts a physical position to the voxel containing it.
    pub fn to_voxel(&self, position: [f64; 3]) -> Voxel {
        [
            (position[0] / self.0[0]).floor() as i64,
            (position[1] / self.0[1]).floor() as i64,
            (position[2] / self.0[2]).floor() as i64,
        ]
    }

    /// Physical volume of one voxel.
    pub fn voxel_volume(&self) -> f64 {
        self.0[0] * self.0[1] * self.0[2]
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::unit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_calibration_rejects_zero() {
        assert!(Calibration::new(1.0, 0.0, 1.0).is_err());
        assert!(Calibration::new(1.0, 1.0, f64::NAN).is_err());
        assert!(Calibration::new(0.5, 0.5, 2.0).is_ok());
    }

    #[test]
    fn test_to_voxel_floors() {
        let cal = Calibration::new(0.5, 0.5, 2.0).unwrap();
        assert_eq!(cal.to_voxel([1.2, 0.4, 5.0]), [2, 0, 2]);
        assert_eq!(cal.to_voxel([-0.1, 0.0, 0.0]), [-1, 0, 0]);
    }

    #[test]
    fn test_voxel_volume() {
        let cal = Calibration::new(0.3, 0.3, 1.5).unwrap();
        assert_relative_eq!(cal.voxel_volume(), 0.135, epsilon = 1e-12);
        assert_relative_eq!(Calibration::default().voxel_volume(), 1.0);
    }
}
