//! Core value types.

mod contact;
mod pose;
mod scan;
mod transform;

pub use contact::{BodyContactState, ContactPoint};
pub use pose::{Point2D, Pose2D};
pub use scan::LaserScan;
pub use transform::{
    TransformWithUncertainty, SIGMA_PITCH, SIGMA_ROLL, SIGMA_X, SIGMA_Y, SIGMA_YAW, SIGMA_Z,
};
