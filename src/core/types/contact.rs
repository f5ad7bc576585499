//! Body contact state produced by the robot-geometry collaborator.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// A candidate ground-contact point in the body frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContactPoint {
    /// Position in the body frame, meters.
    pub position: Point3<f32>,
    /// Identifier of the foot or wheel this candidate belongs to.
    pub foot: usize,
    /// Whether this contact is currently slipping.
    pub slip: bool,
}

impl ContactPoint {
    /// Create a non-slipping contact candidate.
    pub fn new(position: Point3<f32>, foot: usize) -> Self {
        Self {
            position,
            foot,
            slip: false,
        }
    }
}

/// The set of candidate contact points for one body state sample.
///
/// Candidates are grouped by foot identifier; each foot may contribute
/// several candidates of which at most one (the lowest) is in contact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BodyContactState {
    /// All contact candidates, in body frame.
    pub points: Vec<ContactPoint>,
}

impl BodyContactState {
    /// Create a contact state from a list of candidates.
    pub fn new(points: Vec<ContactPoint>) -> Self {
        Self { points }
    }

    /// Number of distinct feet represented in the candidate set.
    pub fn foot_count(&self) -> usize {
        let mut feet: Vec<usize> = self.points.iter().map(|p| p.foot).collect();
        feet.sort_unstable();
        feet.dedup();
        feet.len()
    }
}
