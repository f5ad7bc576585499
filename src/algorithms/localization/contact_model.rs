//! Proprioceptive contact measurement model.
//!
//! Scores a body pose hypothesis by comparing the heights of its ground
//! contact points against the surface patches of a map. Residuals from a
//! successful evaluation feed a scalar Kalman update of the particle's
//! height belief.

use std::collections::BTreeMap;

use nalgebra::{Isometry3, Point3, UnitQuaternion};
use serde::{Deserialize, Serialize};

use crate::algorithms::mapping::SurfacePatch;
use crate::core::math::{kalman_update, log_gaussian, remove_yaw};
use crate::core::types::BodyContactState;

/// Density floor for contacts scored against a vertical column top.
/// Keeps a single bad column from zeroing a particle outright.
const MIN_COLUMN_DENSITY: f64 = 1e-9;

/// Configuration of the contact measurement model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContactModelConfig {
    /// Minimum number of contact points that must find a surface patch
    /// for the measurement to count.
    pub min_contacts: usize,

    /// Factor applied to the summed log-likelihood. Values below 1.0
    /// soften the measurement, values above sharpen it.
    pub likelihood_correction: f64,

    /// Sigma bound used when matching a contact point against the
    /// patches stacked in a cell.
    pub lookup_sigma_threshold: f32,
}

impl Default for ContactModelConfig {
    fn default() -> Self {
        Self {
            min_contacts: 3,
            likelihood_correction: 1.0,
            lookup_sigma_threshold: 3.0,
        }
    }
}

/// Contact measurement model with the active candidate set.
#[derive(Debug, Clone)]
pub struct ContactModel {
    config: ContactModelConfig,
    sensor_sigma: f32,
    /// Selected contact points in the world-aligned (yaw-free) body frame.
    candidates: Vec<Point3<f32>>,
    /// Inverse-variance-weighted residual sums of the last evaluation.
    z_info: Option<(f64, f64)>,
}

impl ContactModel {
    /// Create a contact model.
    ///
    /// `sensor_sigma` is the standard deviation of a single contact
    /// height measurement.
    pub fn new(config: ContactModelConfig, sensor_sigma: f32) -> Self {
        Self {
            config,
            sensor_sigma,
            candidates: Vec::new(),
            z_info: None,
        }
    }

    /// The configuration.
    pub fn config(&self) -> &ContactModelConfig {
        &self.config
    }

    /// Select the active contact points for the current body state.
    ///
    /// Candidates are rotated into the world-aligned body frame (yaw
    /// removed), slipping contacts are dropped, and the lowest candidate
    /// per foot becomes that foot's contact point.
    pub fn set_contact_points(
        &mut self,
        state: &BodyContactState,
        orientation: &UnitQuaternion<f32>,
    ) {
        let rotation = remove_yaw(orientation);
        let mut lowest: BTreeMap<usize, Point3<f32>> = BTreeMap::new();
        for candidate in &state.points {
            if candidate.slip {
                continue;
            }
            let rotated = rotation * candidate.position;
            match lowest.get_mut(&candidate.foot) {
                Some(current) if current.z <= rotated.z => {}
                _ => {
                    lowest.insert(candidate.foot, rotated);
                }
            }
        }
        self.candidates = lowest.into_values().collect();
        self.z_info = None;
    }

    /// The selected contact points, in the world-aligned body frame.
    pub fn contact_points(&self) -> &[Point3<f32>] {
        &self.candidates
    }

    /// Score a pose hypothesis against a map.
    ///
    /// Each contact point is transformed into the world, looked up in
    /// the map and scored with a Gaussian on the height residual. Points
    /// without a surface patch are skipped; if fewer than `min_contacts`
    /// points find one the measurement is rejected and `None` is
    /// returned. On success the summed log-likelihood is returned and
    /// the residual statistics are retained for
    /// [`ContactModel::update_z_estimate`].
    pub fn evaluate_pose<F>(
        &mut self,
        body2world: &Isometry3<f32>,
        pose_variance: f32,
        mut map_lookup: F,
    ) -> Option<f64>
    where
        F: FnMut(&Point3<f32>) -> Option<SurfacePatch>,
    {
        self.z_info = None;

        let mut log_likelihood = 0.0f64;
        let mut d1 = 0.0f64;
        let mut d2 = 0.0f64;
        let mut hits = 0usize;

        for candidate in &self.candidates {
            let world = body2world * candidate;
            let Some(patch) = map_lookup(&world) else {
                continue;
            };
            hits += 1;

            let residual = (world.z - patch.mean) as f64;
            let variance =
                (pose_variance + patch.variance() + self.sensor_sigma * self.sensor_sigma) as f64;

            let mut contribution = log_gaussian(residual, variance);
            if !patch.horizontal {
                // patch is the top of a vertical column
                contribution = contribution.max(MIN_COLUMN_DENSITY.ln());
            }
            log_likelihood += contribution;

            d1 += residual / variance;
            d2 += 1.0 / variance;
        }

        if hits < self.config.min_contacts {
            return None;
        }

        self.z_info = Some((d1, d2));
        Some(self.config.likelihood_correction * log_likelihood)
    }

    /// Fuse the residuals of the last successful evaluation into a
    /// height belief.
    ///
    /// The implied measurement is the current height shifted by the
    /// inverse-variance-weighted mean residual, with the combined
    /// residual variance.
    pub fn update_z_estimate(&self, z: &mut f32, sigma_z: &mut f32) {
        if let Some((d1, d2)) = self.z_info {
            if d2 > 0.0 {
                let mean_residual = (d1 / d2) as f32;
                let meas_sigma = ((1.0 / d2) as f32).sqrt();
                kalman_update(z, sigma_z, *z - mean_residual, meas_sigma);
            }
        }
    }
}
