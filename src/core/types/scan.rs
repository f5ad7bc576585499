//! Laser scan type passed through to the scan-projection collaborator.

use serde::{Deserialize, Serialize};

/// Raw planar laser scan in polar coordinates.
///
/// The core never interprets the ranges itself; the scan is handed to
/// the scan-projection collaborator together with uncertainty-tagged
/// mounting transforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserScan {
    /// Start angle in radians
    pub angle_min: f32,
    /// Angular resolution (radians between consecutive readings)
    pub angle_increment: f32,
    /// Minimum valid range in meters
    pub range_min: f32,
    /// Maximum valid range in meters
    pub range_max: f32,
    /// Range measurements in meters (0 or NaN = invalid)
    pub ranges: Vec<f32>,
}

impl LaserScan {
    /// Create a new laser scan.
    pub fn new(
        angle_min: f32,
        angle_increment: f32,
        range_min: f32,
        range_max: f32,
        ranges: Vec<f32>,
    ) -> Self {
        Self {
            angle_min,
            angle_increment,
            range_min,
            range_max,
            ranges,
        }
    }

    /// Whether the scan carries no usable readings.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
