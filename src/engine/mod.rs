//! Filter orchestration: pose estimation and the embodied SLAM loop.

mod pose_estimator;
mod slam_filter;

pub use pose_estimator::PoseEstimator;
pub use slam_filter::{EmbodiedSlamFilter, OdometryProvider, ScanProjector};
