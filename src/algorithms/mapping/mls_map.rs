//! Tiled multi-level surface map.
//!
//! A map is a stack of MLS grids anchored in a common parent frame. All
//! writes go to the single active grid (the most recently created one);
//! reads fall back to older grids when the query lies outside the active
//! footprint. Re-centering the map means creating a fresh active grid
//! near the current pose, which bounds the extent of any single grid
//! while keeping history readable.
//!
//! Old grids are shared immutably between map clones; only the active
//! grid is copied, and only when a clone first writes to it.

use std::sync::Arc;

use nalgebra::{Isometry3, Point3};

use crate::core::frames::{Environment, FrameId};

use super::mls_grid::{MlsGrid, MlsGridConfig, SurfacePatch};

/// A stack of MLS grids with one writable active grid.
#[derive(Debug, Clone)]
pub struct MlsMap {
    config: MlsGridConfig,
    frame: FrameId,
    grids: Vec<Arc<MlsGrid>>,
}

impl MlsMap {
    /// Create a map with its first active grid.
    ///
    /// The map frame is attached under `parent`; the initial grid is
    /// anchored at `grid_transform` relative to the map frame.
    pub fn new(
        env: &mut Environment,
        parent: FrameId,
        config: MlsGridConfig,
        grid_transform: Isometry3<f32>,
    ) -> Self {
        let frame = env.add_frame(parent, Isometry3::identity());
        let grid_frame = env.add_frame(frame, grid_transform);
        env.register_grid();
        Self {
            config,
            frame,
            grids: vec![Arc::new(MlsGrid::new(config, grid_frame))],
        }
    }

    /// Map frame node.
    pub fn frame(&self) -> FrameId {
        self.frame
    }

    /// Grid geometry shared by all grids of this map.
    pub fn config(&self) -> &MlsGridConfig {
        &self.config
    }

    /// All grids, oldest first. The last entry is the active grid.
    pub fn grids(&self) -> &[Arc<MlsGrid>] {
        &self.grids
    }

    /// The grid currently receiving writes.
    pub fn active_grid(&self) -> &MlsGrid {
        self.grids.last().expect("map holds at least one grid")
    }

    /// Writable access to the active grid.
    ///
    /// If the active grid is shared with another map clone it is copied
    /// first, so the write never becomes visible to other particles.
    pub fn active_grid_mut(&mut self) -> &mut MlsGrid {
        Arc::make_mut(self.grids.last_mut().expect("map holds at least one grid"))
    }

    /// Create a fresh active grid anchored at `transform` relative to
    /// the previously active grid's frame.
    ///
    /// The old active grid becomes immutable history.
    pub fn create_grid(&mut self, env: &mut Environment, transform: Isometry3<f32>) {
        let grid_frame = env.add_frame(self.active_grid().frame(), transform);
        env.register_grid();
        self.grids.push(Arc::new(MlsGrid::new(self.config, grid_frame)));
    }

    /// Look up the surface patch under a world-frame point.
    ///
    /// The newest grid whose footprint contains the point answers the
    /// query; the probe height is the point's height in that grid's
    /// frame.
    pub fn get_patch(
        &self,
        env: &Environment,
        point: &Point3<f32>,
        probe_stdev: f32,
        sigma_threshold: f32,
    ) -> Option<SurfacePatch> {
        for grid in self.grids.iter().rev() {
            let local = env.relative_transform(env.world(), grid.frame()) * point;
            if let Some(index) = grid.to_grid(local.x, local.y) {
                let probe =
                    SurfacePatch::horizontal(local.z, probe_stdev, self.config.horizontal_thickness);
                return grid.get(index, &probe, sigma_threshold).copied();
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Translation3, UnitQuaternion};

    fn translation(x: f32, y: f32) -> Isometry3<f32> {
        Isometry3::from_parts(Translation3::new(x, y, 0.0), UnitQuaternion::identity())
    }

    fn centered_map(env: &mut Environment) -> MlsMap {
        // grid origin at (-10, -10): footprint covers [-10, 10]^2
        let world = env.world();
        MlsMap::new(env, world, MlsGridConfig::default(), translation(-10.0, -10.0))
    }

    #[test]
    fn test_map_starts_with_one_grid() {
        let mut env = Environment::new();
        let map = centered_map(&mut env);
        assert_eq!(map.grids().len(), 1);
        assert_eq!(env.mls_grid_count(), 1);
    }

    #[test]
    fn test_write_and_read_back() {
        let mut env = Environment::new();
        let mut map = centered_map(&mut env);

        let grid = map.active_grid_mut();
        let (m, n) = grid.to_grid(10.0 + 1.0, 10.0 + 2.0).unwrap();
        grid.update(m, n, SurfacePatch::horizontal(0.3, 0.05, 0.1));

        let hit = map
            .get_patch(&env, &Point3::new(1.0, 2.0, 0.3), 0.1, 3.0)
            .expect("patch under query point");
        assert_relative_eq!(hit.mean, 0.3);
    }

    #[test]
    fn test_read_through_to_older_grid() {
        let mut env = Environment::new();
        let mut map = centered_map(&mut env);

        // patch near the old grid centre
        let grid = map.active_grid_mut();
        let (m, n) = grid.to_grid(10.0, 10.0).unwrap();
        grid.update(m, n, SurfacePatch::horizontal(0.2, 0.05, 0.1));

        // re-center 30 m away: active footprint no longer covers origin
        map.create_grid(&mut env, translation(30.0, 0.0));
        assert_eq!(map.grids().len(), 2);

        let hit = map
            .get_patch(&env, &Point3::new(0.0, 0.0, 0.2), 0.1, 3.0)
            .expect("read falls back to the older grid");
        assert_relative_eq!(hit.mean, 0.2);
    }

    #[test]
    fn test_active_grid_preferred_over_history() {
        let mut env = Environment::new();
        let mut map = centered_map(&mut env);

        let grid = map.active_grid_mut();
        let (m, n) = grid.to_grid(10.0, 10.0).unwrap();
        grid.update(m, n, SurfacePatch::horizontal(0.2, 0.05, 0.1));

        // overlapping new grid with a different estimate at the origin
        map.create_grid(&mut env, translation(1.0, 0.0));
        let grid = map.active_grid_mut();
        let (m, n) = grid.to_grid(9.0, 10.0).unwrap();
        grid.update(m, n, SurfacePatch::horizontal(0.6, 0.05, 0.1));

        let hit = map
            .get_patch(&env, &Point3::new(0.0, 0.0, 0.6), 0.1, 3.0)
            .unwrap();
        assert_relative_eq!(hit.mean, 0.6);
    }

    #[test]
    fn test_clone_shares_until_first_write() {
        let mut env = Environment::new();
        let mut map = centered_map(&mut env);
        map.create_grid(&mut env, translation(5.0, 0.0));

        let mut clone = map.clone();
        assert!(Arc::ptr_eq(&map.grids()[0], &clone.grids()[0]));
        assert!(Arc::ptr_eq(&map.grids()[1], &clone.grids()[1]));

        // first write detaches only the active grid of the writer
        clone
            .active_grid_mut()
            .update(3, 3, SurfacePatch::horizontal(0.1, 0.05, 0.1));
        assert!(Arc::ptr_eq(&map.grids()[0], &clone.grids()[0]));
        assert!(!Arc::ptr_eq(&map.grids()[1], &clone.grids()[1]));

        // the original never sees the clone's patch
        assert!(map.active_grid().cell(3, 3).is_empty());
        assert_eq!(clone.active_grid().cell(3, 3).len(), 1);
    }
}
