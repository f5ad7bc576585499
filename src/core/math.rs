//! Mathematical primitives shared across the filter.
//!
//! Angle normalization, Gaussian log-densities and the scalar Kalman
//! update used by both the surface-patch merge and the per-particle
//! height estimate.

use std::f32::consts::PI;

use nalgebra::{UnitQuaternion, Vector3};

/// Wrap an angle into the [-π, π] interval.
///
/// Headings that accumulated several turns come back as the equivalent
/// angle within one turn.
///
/// # Example
/// ```
/// use bhumi_slam::core::math::normalize_angle;
/// use std::f32::consts::FRAC_PI_2;
///
/// // a full turn plus a quarter lands on the quarter turn
/// let wrapped = normalize_angle(5.0 * FRAC_PI_2);
/// assert!((wrapped - FRAC_PI_2).abs() < 1e-6);
/// ```
#[inline]
pub fn normalize_angle(angle: f32) -> f32 {
    let mut a = angle % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a < -PI {
        a += 2.0 * PI;
    }
    a
}

/// Signed rotation taking heading `a` onto heading `b`, along the
/// shorter way around the circle.
#[inline]
pub fn angle_diff(a: f32, b: f32) -> f32 {
    normalize_angle(b - a)
}

/// Yaw component (rotation about Z) of an orientation.
#[inline]
pub fn yaw_of(orientation: &UnitQuaternion<f32>) -> f32 {
    orientation.euler_angles().2
}

/// Strip the yaw component from an orientation, leaving pitch and roll.
///
/// The result rotates body-frame vectors into a world-aligned frame
/// whose X axis still points along the body heading.
pub fn remove_yaw(orientation: &UnitQuaternion<f32>) -> UnitQuaternion<f32> {
    UnitQuaternion::from_axis_angle(&Vector3::z_axis(), -yaw_of(orientation)) * orientation
}

/// Log-density of a zero-mean Gaussian with the given variance.
///
/// Returns `f64::NEG_INFINITY` for a non-zero residual at zero variance.
pub fn log_gaussian(x: f64, variance: f64) -> f64 {
    if variance < 1e-12 {
        if x.abs() < 1e-9 {
            return 0.0;
        }
        return f64::NEG_INFINITY;
    }
    -0.5 * (x * x / variance + (2.0 * std::f64::consts::PI * variance).ln())
}

/// Scalar Kalman update of a Gaussian `(mean, stdev)` with a measurement
/// `(meas_mean, meas_stdev)`.
///
/// The posterior variance is `1 / (1/σ² + 1/σ_m²)`, so it never exceeds
/// either input variance.
pub fn kalman_update(mean: &mut f32, stdev: &mut f32, meas_mean: f32, meas_stdev: f32) {
    let var = *stdev * *stdev;
    let meas_var = meas_stdev * meas_stdev;
    let gain = var / (var + meas_var);
    *mean += gain * (meas_mean - *mean);
    *stdev = ((1.0 - gain) * var).sqrt();
}

/// Square of a value.
#[inline]
pub fn sq(x: f32) -> f32 {
    x * x
}
