//! Filter configuration.

use serde::{Deserialize, Serialize};

use crate::algorithms::localization::ContactModelConfig;
use crate::algorithms::mapping::{MlsGridConfig, ScanIntegratorConfig};

/// Cartesian and angular thresholds for triggering an update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UpdateThreshold {
    /// Translation threshold in meters.
    pub distance: f32,
    /// Rotation threshold in radians.
    pub angle: f32,
}

impl UpdateThreshold {
    /// Create a threshold pair.
    pub fn new(distance: f32, angle: f32) -> Self {
        Self { distance, angle }
    }

    /// Whether a pose delta exceeds either threshold.
    pub fn exceeded_by(&self, delta: &crate::core::types::Pose2D) -> bool {
        delta.translation_norm() > self.distance || delta.theta.abs() > self.angle
    }
}

/// Top-level configuration of the embodied SLAM filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Random seed for the particle filter. Runs with the same seed and
    /// input sequence are bitwise reproducible.
    pub seed: u64,

    /// Number of particles.
    pub particle_count: usize,

    /// Effective-sample-size threshold below which the filter resamples.
    pub min_effective: usize,

    /// Standard deviation of the initial particle spread (x, y, theta)
    /// and of the initial height belief.
    pub initial_error: f32,

    /// Motion-noise scale: noise deviation per axis is this factor times
    /// the magnitude of the odometry delta.
    pub weighting_factor: f32,

    /// Per-step growth of the height-belief deviation while moving.
    pub z_process_sigma: f32,

    /// Standard deviation of a single contact measurement in meters.
    pub measurement_error: f32,

    /// Exponential forgetting applied to a particle's weight before a
    /// new measurement is multiplied in. 1.0 keeps the full history.
    pub discount_factor: f64,

    /// Pose delta that triggers a proprioceptive measurement update.
    pub measurement_threshold: UpdateThreshold,

    /// Pose delta that triggers a scan-mapping update.
    pub mapping_threshold: UpdateThreshold,

    /// Contact measurement model settings.
    pub contact: ContactModelConfig,

    /// Scan integration settings.
    pub mapping: ScanIntegratorConfig,

    /// Geometry of the grid template used for all MLS grids.
    pub grid: MlsGridConfig,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            particle_count: 250,
            min_effective: 50,
            initial_error: 0.1,
            weighting_factor: 0.1,
            z_process_sigma: 0.01,
            measurement_error: 0.1,
            discount_factor: 0.9,
            measurement_threshold: UpdateThreshold::new(0.1, 10.0_f32.to_radians()),
            mapping_threshold: UpdateThreshold::new(0.02, 5.0_f32.to_radians()),
            contact: ContactModelConfig::default(),
            mapping: ScanIntegratorConfig::default(),
            grid: MlsGridConfig::default(),
        }
    }
}
