//! Odometry motion model for the particle filter projection step.
//!
//! Odometry deltas are applied in each particle's local frame with
//! additive Gaussian noise whose deviation scales with the magnitude of
//! the reported motion. A robot that does not move does not diffuse.

use rand::Rng;
use rand_distr::StandardNormal;

use crate::core::types::Pose2D;

/// Per-axis noise deviations for one projection step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionNoise {
    /// Deviation of the X component in meters.
    pub sigma_x: f32,
    /// Deviation of the Y component in meters.
    pub sigma_y: f32,
    /// Deviation of the heading component in radians.
    pub sigma_theta: f32,
    /// Growth of the height-belief deviation over this step.
    pub sigma_z: f32,
}

impl MotionNoise {
    /// Zero noise: projection applies the delta exactly.
    pub fn none() -> Self {
        Self {
            sigma_x: 0.0,
            sigma_y: 0.0,
            sigma_theta: 0.0,
            sigma_z: 0.0,
        }
    }

    /// Sample a noisy variant of an odometry delta.
    pub fn perturb<R: Rng>(&self, delta: &Pose2D, rng: &mut R) -> Pose2D {
        let nx: f32 = rng.sample(StandardNormal);
        let ny: f32 = rng.sample(StandardNormal);
        let nt: f32 = rng.sample(StandardNormal);
        Pose2D::new(
            delta.x + nx * self.sigma_x,
            delta.y + ny * self.sigma_y,
            delta.theta + nt * self.sigma_theta,
        )
    }
}

/// Scales odometry deltas into per-step noise deviations.
#[derive(Debug, Clone, Copy)]
pub struct MotionModel {
    weighting_factor: f32,
    z_process_sigma: f32,
}

impl MotionModel {
    /// Create a motion model with the given noise scales.
    pub fn new(weighting_factor: f32, z_process_sigma: f32) -> Self {
        Self {
            weighting_factor,
            z_process_sigma,
        }
    }

    /// Noise deviations for one odometry delta.
    ///
    /// Translation noise is proportional to the translation magnitude;
    /// heading noise picks up a share of the translation as well, so
    /// straight driving still spreads the heading hypothesis. The height
    /// belief widens by a fixed amount per step while the robot moves,
    /// since contact transitions leak error into the vertical axis.
    pub fn noise_for(&self, delta: &Pose2D) -> MotionNoise {
        let trans = delta.translation_norm();
        let rot = delta.theta.abs();
        let moving = trans > 1e-6 || rot > 1e-6;
        MotionNoise {
            sigma_x: self.weighting_factor * trans,
            sigma_y: self.weighting_factor * trans,
            sigma_theta: self.weighting_factor * (rot + 0.5 * trans),
            sigma_z: if moving { self.z_process_sigma } else { 0.0 },
        }
    }
}
