//! Rigid transforms tagged with an uncertainty diagonal.

use nalgebra::Isometry3;

/// Index of the yaw standard deviation in [`TransformWithUncertainty::sigma`].
pub const SIGMA_YAW: usize = 0;
/// Index of the pitch standard deviation.
pub const SIGMA_PITCH: usize = 1;
/// Index of the roll standard deviation.
pub const SIGMA_ROLL: usize = 2;
/// Index of the X translation standard deviation.
pub const SIGMA_X: usize = 3;
/// Index of the Y translation standard deviation.
pub const SIGMA_Y: usize = 4;
/// Index of the Z translation standard deviation.
pub const SIGMA_Z: usize = 5;

/// A rigid transform with a diagonal 6-DOF uncertainty.
///
/// The standard-deviation vector is ordered `[yaw, pitch, roll, x, y, z]`
/// (rotation block first, ZYX convention). The same ordering is used for
/// every transform handed to the scan-projection collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformWithUncertainty {
    /// The nominal transform.
    pub transform: Isometry3<f32>,
    /// Per-axis standard deviations, ordered `[yaw, pitch, roll, x, y, z]`.
    pub sigma: [f32; 6],
}

impl TransformWithUncertainty {
    /// An exactly-known transform (all deviations zero).
    pub fn exact(transform: Isometry3<f32>) -> Self {
        Self {
            transform,
            sigma: [0.0; 6],
        }
    }

    /// Set the rotation-block deviations.
    pub fn with_rotation_sigma(mut self, yaw: f32, pitch: f32, roll: f32) -> Self {
        self.sigma[SIGMA_YAW] = yaw;
        self.sigma[SIGMA_PITCH] = pitch;
        self.sigma[SIGMA_ROLL] = roll;
        self
    }

    /// Diagonal of the 6×6 covariance (deviations squared).
    pub fn covariance_diagonal(&self) -> [f32; 6] {
        let mut cov = [0.0; 6];
        for (c, s) in cov.iter_mut().zip(self.sigma.iter()) {
            *c = s * s;
        }
        cov
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_covariance_diagonal() {
        let t = TransformWithUncertainty::exact(Isometry3::identity())
            .with_rotation_sigma(0.1, 0.2, 0.0);
        let cov = t.covariance_diagonal();
        assert_relative_eq!(cov[SIGMA_YAW], 0.01, epsilon = 1e-7);
        assert_relative_eq!(cov[SIGMA_PITCH], 0.04, epsilon = 1e-7);
        assert_eq!(cov[SIGMA_ROLL], 0.0);
        assert_eq!(cov[SIGMA_X], 0.0);
    }
}
