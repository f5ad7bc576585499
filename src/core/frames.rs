//! Frame tree of the mapping environment.
//!
//! Grids and the scan source are anchored at frame nodes; each node owns
//! a local transform relative to its parent. Relative transforms between
//! any two frames are computed by walking both chains to the world root.
//! Cycles are impossible by construction: a node can only be attached
//! under an already-existing parent.

use nalgebra::Isometry3;

/// Handle to a node in the frame tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(usize);

#[derive(Debug, Clone)]
struct FrameNode {
    parent: Option<FrameId>,
    local: Isometry3<f32>,
}

/// Frame tree plus bookkeeping about the items attached to it.
///
/// One environment is shared by the whole filter: the per-particle maps,
/// the shared map (if any) and the scan grid all anchor their frames
/// here. It is only mutated by the mapping engine during a tick.
#[derive(Debug, Clone)]
pub struct Environment {
    nodes: Vec<FrameNode>,
    grid_count: usize,
}

impl Environment {
    /// Create an environment holding only the world root frame.
    pub fn new() -> Self {
        Self {
            nodes: vec![FrameNode {
                parent: None,
                local: Isometry3::identity(),
            }],
            grid_count: 0,
        }
    }

    /// The world root frame.
    #[inline]
    pub fn world(&self) -> FrameId {
        FrameId(0)
    }

    /// Attach a new frame under `parent` with the given local transform.
    pub fn add_frame(&mut self, parent: FrameId, local: Isometry3<f32>) -> FrameId {
        assert!(parent.0 < self.nodes.len(), "unknown parent frame");
        self.nodes.push(FrameNode {
            parent: Some(parent),
            local,
        });
        FrameId(self.nodes.len() - 1)
    }

    /// Replace the local transform of a frame.
    pub fn set_transform(&mut self, frame: FrameId, local: Isometry3<f32>) {
        self.nodes[frame.0].local = local;
    }

    /// Local transform of a frame relative to its parent.
    pub fn transform(&self, frame: FrameId) -> &Isometry3<f32> {
        &self.nodes[frame.0].local
    }

    /// Transform mapping `frame`-local coordinates into the world frame.
    pub fn to_world(&self, frame: FrameId) -> Isometry3<f32> {
        let mut acc = self.nodes[frame.0].local;
        let mut cursor = self.nodes[frame.0].parent;
        while let Some(parent) = cursor {
            acc = self.nodes[parent.0].local * acc;
            cursor = self.nodes[parent.0].parent;
        }
        acc
    }

    /// Transform mapping `from`-local coordinates into `to`-local ones.
    pub fn relative_transform(&self, from: FrameId, to: FrameId) -> Isometry3<f32> {
        self.to_world(to).inverse() * self.to_world(from)
    }

    /// Record that an MLS grid was instantiated in this environment.
    pub(crate) fn register_grid(&mut self) {
        self.grid_count += 1;
    }

    /// Number of MLS grids instantiated in this environment.
    pub fn mls_grid_count(&self) -> usize {
        self.grid_count
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Point3, Translation3, UnitQuaternion, Vector3};

    fn translation(x: f32, y: f32, z: f32) -> Isometry3<f32> {
        Isometry3::from_parts(Translation3::new(x, y, z), UnitQuaternion::identity())
    }

    #[test]
    fn test_to_world_chains_parents() {
        let mut env = Environment::new();
        let a = env.add_frame(env.world(), translation(1.0, 0.0, 0.0));
        let b = env.add_frame(a, translation(0.0, 2.0, 0.0));

        let p = env.to_world(b) * Point3::origin();
        assert_relative_eq!(p.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(p.y, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_relative_transform_between_siblings() {
        let mut env = Environment::new();
        let a = env.add_frame(env.world(), translation(1.0, 0.0, 0.0));
        let b = env.add_frame(env.world(), translation(0.0, 3.0, 0.0));

        // origin of a expressed in b
        let p = env.relative_transform(a, b) * Point3::origin();
        assert_relative_eq!(p.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(p.y, -3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_relative_transform_roundtrip() {
        let mut env = Environment::new();
        let rot = Isometry3::from_parts(
            Translation3::new(2.0, -1.0, 0.5),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.7),
        );
        let a = env.add_frame(env.world(), rot);
        let b = env.add_frame(a, translation(0.3, 0.3, 0.0));

        let fwd = env.relative_transform(a, b);
        let back = env.relative_transform(b, a);
        let p = Point3::new(0.4, -0.2, 0.1);
        let roundtrip = back * (fwd * p);
        assert_relative_eq!(roundtrip.x, p.x, epsilon = 1e-5);
        assert_relative_eq!(roundtrip.y, p.y, epsilon = 1e-5);
        assert_relative_eq!(roundtrip.z, p.z, epsilon = 1e-5);
    }

    #[test]
    fn test_set_transform_moves_subtree() {
        let mut env = Environment::new();
        let a = env.add_frame(env.world(), translation(0.0, 0.0, 0.0));
        let b = env.add_frame(a, translation(1.0, 0.0, 0.0));

        env.set_transform(a, translation(5.0, 0.0, 0.0));
        let p = env.to_world(b) * Point3::origin();
        assert_relative_eq!(p.x, 6.0, epsilon = 1e-6);
    }

    #[test]
    fn test_grid_count() {
        let mut env = Environment::new();
        assert_eq!(env.mls_grid_count(), 0);
        env.register_grid();
        env.register_grid();
        assert_eq!(env.mls_grid_count(), 2);
    }
}
