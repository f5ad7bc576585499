//! Scan integration into per-particle surface maps.
//!
//! Takes a projected scan grid (uncertainty-tagged patches in the scan
//! frame) and merges it into each particle's map, coupling the patch
//! heights to the particle's height belief. Integration is two-phase:
//! measurement patches are collected first, an optional height
//! refinement adjusts the particle's belief against already-mapped
//! horizontal patches, and only then is the batch committed to the
//! active grid.

use nalgebra::{Point3, Translation3};
use serde::{Deserialize, Serialize};

use crate::algorithms::localization::{Centroid, Particle};
use crate::core::frames::{Environment, FrameId};
use crate::core::math::kalman_update;

use super::mls_grid::{CellIndex, MlsGrid, SurfacePatch};
use super::mls_map::MlsMap;

/// Configuration of the scan integrator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanIntegratorConfig {
    /// Re-anchor the active grid at the particle pose every N mapping
    /// invocations, bounding the extent any single grid must cover.
    pub recenter_interval: u64,

    /// Refine the particle height belief against previously mapped
    /// horizontal patches before committing the measurement.
    ///
    /// Off by default; the refinement couples mapping error back into
    /// the height belief and has not proven itself in the field.
    pub enable_particle_z_refinement: bool,

    /// Sigma bound for matching measurement patches against map patches
    /// during the refinement.
    pub refinement_sigma_threshold: f32,
}

impl Default for ScanIntegratorConfig {
    fn default() -> Self {
        Self {
            recenter_interval: 50,
            enable_particle_z_refinement: false,
            refinement_sigma_threshold: 0.5,
        }
    }
}

/// Merges projected scan grids into particle maps.
#[derive(Debug)]
pub struct ScanIntegrator {
    config: ScanIntegratorConfig,
    update_idx: u64,
}

impl ScanIntegrator {
    /// Create a scan integrator.
    pub fn new(config: ScanIntegratorConfig) -> Self {
        Self {
            config,
            update_idx: 0,
        }
    }

    /// The configuration.
    pub fn config(&self) -> &ScanIntegratorConfig {
        &self.config
    }

    /// Index stamped on patches of the next mapping invocation.
    pub fn update_idx(&self) -> u64 {
        self.update_idx
    }

    /// Integrate a scan grid into every particle's own map.
    ///
    /// The scan frame is re-anchored at each particle's planar pose
    /// before the scan cells are transformed into that particle's
    /// active grid. Particles without their own map (shared-map mode)
    /// are skipped.
    pub fn integrate_particles(
        &mut self,
        env: &mut Environment,
        particles: &mut [Particle],
        scan_grid: &MlsGrid,
        scan_frame: FrameId,
    ) {
        for particle in particles.iter_mut() {
            if particle.map.is_none() {
                continue;
            }
            env.set_transform(scan_frame, particle.pose.to_isometry(0.0));

            if self.update_idx % self.config.recenter_interval == 0 {
                self.recenter(env, particle, scan_frame);
            }

            let (z, sigma_z) = (particle.z, particle.sigma_z);
            let map = particle.map.as_mut().expect("checked above");
            let patches = self.collect_measurement(env, map, scan_grid, z, sigma_z);

            let mut shift = 0.0;
            if self.config.enable_particle_z_refinement {
                let (d1, d2) = self.refinement_terms(map, &patches);
                if d2 > 0.0 {
                    let z_old = particle.z;
                    kalman_update(
                        &mut particle.z,
                        &mut particle.sigma_z,
                        z_old + (d1 / d2) as f32,
                        (1.0 / d2).sqrt() as f32,
                    );
                    shift = particle.z - z_old;
                }
            }

            Self::commit(map, patches, shift);
        }
        self.update_idx += 1;
    }

    /// Integrate a scan grid into a single shared map.
    ///
    /// Runs the merge once at the filter centroid instead of once per
    /// particle; the height refinement does not apply.
    pub fn integrate_shared(
        &mut self,
        env: &mut Environment,
        map: &mut MlsMap,
        scan_grid: &MlsGrid,
        scan_frame: FrameId,
        centroid: &Centroid,
    ) {
        env.set_transform(scan_frame, centroid.pose.to_isometry(0.0));
        let patches = self.collect_measurement(env, map, scan_grid, centroid.z, centroid.sigma_z);
        Self::commit(map, patches, 0.0);
        self.update_idx += 1;
    }

    /// Create a fresh active grid anchored at the particle's pose.
    ///
    /// The new grid keeps the template geometry; its origin is offset by
    /// half the grid extent so the particle sits at the grid centre.
    fn recenter(&self, env: &mut Environment, particle: &mut Particle, scan_frame: FrameId) {
        let map = particle.map.as_mut().expect("recenter needs a map");
        let active_frame = map.active_grid().frame();
        let pose_in_grid = env.relative_transform(scan_frame, active_frame);
        let (cx, cy) = map.config().center_offset();
        log::debug!(
            "re-centering particle map at ({:.2}, {:.2}), grid {} of this map",
            particle.pose.x,
            particle.pose.y,
            map.grids().len() + 1
        );
        map.create_grid(env, pose_in_grid * Translation3::new(-cx, -cy, 0.0));
    }

    /// Probe phase: transform scan cells into the active grid and bind
    /// the patch heights to the particle's height belief.
    fn collect_measurement(
        &self,
        env: &Environment,
        map: &MlsMap,
        scan_grid: &MlsGrid,
        z: f32,
        sigma_z: f32,
    ) -> Vec<(CellIndex, SurfacePatch)> {
        let active = map.active_grid();
        let scan2grid = env.relative_transform(scan_grid.frame(), active.frame());

        let mut patches = Vec::new();
        for (m, n) in scan_grid.touched_cells() {
            let (x, y) = scan_grid.from_grid(m, n);
            let center = scan2grid * Point3::new(x, y, 0.0);
            let Some(target) = active.to_grid(center.x, center.y) else {
                continue;
            };
            for patch in scan_grid.cell(m, n) {
                let mut measurement = *patch;
                measurement.mean += z;
                measurement.stdev =
                    (measurement.stdev * measurement.stdev + sigma_z * sigma_z).sqrt();
                measurement.update_idx = self.update_idx;
                patches.push((target, measurement));
            }
        }
        patches
    }

    /// Accumulate inverse-variance residual terms against horizontal
    /// patches mapped on an earlier tick.
    fn refinement_terms(&self, map: &MlsMap, patches: &[(CellIndex, SurfacePatch)]) -> (f64, f64) {
        let active = map.active_grid();
        let mut d1 = 0.0f64;
        let mut d2 = 0.0f64;
        for (target, measurement) in patches {
            let Some(mapped) =
                active.get(*target, measurement, self.config.refinement_sigma_threshold)
            else {
                continue;
            };
            if mapped.horizontal && measurement.horizontal && mapped.update_idx < self.update_idx {
                let diff = (measurement.mean - mapped.mean) as f64;
                let var = (mapped.variance() + measurement.variance()) as f64;
                d1 += diff / var;
                d2 += 1.0 / var;
            }
        }
        (d1, d2)
    }

    /// Merge phase: commit the measurement batch to the active grid.
    ///
    /// This is the first write after a resample may have shared the map,
    /// so the active grid is copied on demand here.
    fn commit(map: &mut MlsMap, patches: Vec<(CellIndex, SurfacePatch)>, shift: f32) {
        if patches.is_empty() {
            return;
        }
        let grid = map.active_grid_mut();
        for ((m, n), mut patch) in patches {
            patch.mean += shift;
            grid.update(m, n, patch);
        }
    }
}
