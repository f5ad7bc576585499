//! Multi-level surface grid.
//!
//! Each cell of the planar lattice holds an ordered stack of surface
//! patches, so overhangs and multi-storey terrain can be represented.
//! Patches carry a height estimate with uncertainty; overlapping
//! estimates in a cell are fused with a variance-weighted update.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::frames::FrameId;
use crate::core::math::kalman_update;

/// Cell index `(m, n)` into an MLS grid.
pub type CellIndex = (usize, usize);

/// Geometry of an MLS grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MlsGridConfig {
    /// Grid extent along X in meters.
    pub size_x: f32,
    /// Grid extent along Y in meters.
    pub size_y: f32,
    /// Cell size along X in meters.
    pub resolution_x: f32,
    /// Cell size along Y in meters.
    pub resolution_y: f32,
    /// Vertical extent assigned to horizontal (flat slab) patches.
    pub horizontal_thickness: f32,
    /// Maximum vertical distance at which a query may group a patch
    /// with a probe. Patches further apart are always kept distinct.
    pub gap_size: f32,
}

impl Default for MlsGridConfig {
    fn default() -> Self {
        Self {
            size_x: 20.0,
            size_y: 20.0,
            resolution_x: 0.05,
            resolution_y: 0.05,
            horizontal_thickness: 0.1,
            gap_size: 1.5,
        }
    }
}

impl MlsGridConfig {
    /// Grid width in cells.
    pub fn width(&self) -> usize {
        (self.size_x / self.resolution_x).round() as usize
    }

    /// Grid height in cells.
    pub fn height(&self) -> usize {
        (self.size_y / self.resolution_y).round() as usize
    }

    /// Offset from the grid origin (cell `(0, 0)`) to the grid centre.
    pub fn center_offset(&self) -> (f32, f32) {
        (self.size_x / 2.0, self.size_y / 2.0)
    }
}

/// A single surface estimate within a grid cell.
///
/// `mean` is the height of the surface top in meters. Horizontal patches
/// model a flat slab of the configured thickness; non-horizontal patches
/// model a vertical column extending `thickness` meters downward from
/// `mean`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfacePatch {
    /// Height of the surface top in meters.
    pub mean: f32,
    /// Standard deviation of the height estimate.
    pub stdev: f32,
    /// Flat slab (true) or vertical column (false).
    pub horizontal: bool,
    /// Vertical extent below `mean`.
    pub thickness: f32,
    /// Mapping tick at which this patch was last touched.
    pub update_idx: u64,
}

impl SurfacePatch {
    /// Create a horizontal patch with the given slab thickness.
    pub fn horizontal(mean: f32, stdev: f32, thickness: f32) -> Self {
        Self {
            mean,
            stdev,
            horizontal: true,
            thickness,
            update_idx: 0,
        }
    }

    /// Create a vertical-column patch of the given extent.
    pub fn vertical(mean: f32, stdev: f32, thickness: f32) -> Self {
        Self {
            mean,
            stdev,
            horizontal: false,
            thickness,
            update_idx: 0,
        }
    }

    /// Variance of the height estimate.
    #[inline]
    pub fn variance(&self) -> f32 {
        self.stdev * self.stdev
    }

    /// Lower bound of the vertical extent.
    #[inline]
    fn bottom(&self) -> f32 {
        self.mean - self.thickness
    }

    /// Whether two patches describe the same surface and must be fused.
    ///
    /// Spans are inflated by the combined standard deviation, so noisy
    /// estimates of one surface fuse even when their means differ.
    fn overlaps(&self, other: &SurfacePatch) -> bool {
        let dev = (self.variance() + other.variance()).sqrt();
        if self.horizontal && other.horizontal {
            (self.mean - other.mean).abs() <= self.thickness.max(other.thickness) + dev
        } else {
            self.bottom() - dev <= other.mean && other.bottom() - dev <= self.mean
        }
    }

    /// Fuse another patch into this one.
    ///
    /// Mean and deviation follow the variance-weighted (Kalman) update;
    /// the result is horizontal only if both inputs were.
    fn merge(&mut self, other: &SurfacePatch) {
        let top = self.mean.max(other.mean);
        let bottom = self.bottom().min(other.bottom());
        kalman_update(&mut self.mean, &mut self.stdev, other.mean, other.stdev);
        self.horizontal = self.horizontal && other.horizontal;
        if !self.horizontal {
            self.thickness = top - bottom;
        }
        self.update_idx = self.update_idx.max(other.update_idx);
    }
}

/// Multi-level surface grid anchored at a frame node.
///
/// Cell coordinates are local to the grid frame: cell `(0, 0)` covers
/// the local origin, `to_grid`/`from_grid` convert between local metric
/// coordinates and cell indices. Cells are stored sparsely; the key set
/// doubles as the touched-cell index iterated by the mapping engine.
#[derive(Debug, Clone)]
pub struct MlsGrid {
    config: MlsGridConfig,
    frame: FrameId,
    cells: BTreeMap<CellIndex, Vec<SurfacePatch>>,
}

impl MlsGrid {
    /// Create an empty grid anchored at `frame`.
    pub fn new(config: MlsGridConfig, frame: FrameId) -> Self {
        Self {
            config,
            frame,
            cells: BTreeMap::new(),
        }
    }

    /// Grid geometry.
    pub fn config(&self) -> &MlsGridConfig {
        &self.config
    }

    /// Frame node this grid is anchored at.
    pub fn frame(&self) -> FrameId {
        self.frame
    }

    /// Convert local metric coordinates to a cell index.
    ///
    /// Returns `None` outside the grid footprint.
    #[inline]
    pub fn to_grid(&self, x: f32, y: f32) -> Option<CellIndex> {
        let m = (x / self.config.resolution_x).floor();
        let n = (y / self.config.resolution_y).floor();
        if m >= 0.0 && n >= 0.0 {
            let m = m as usize;
            let n = n as usize;
            if m < self.config.width() && n < self.config.height() {
                return Some((m, n));
            }
        }
        None
    }

    /// Local metric coordinates of a cell centre.
    #[inline]
    pub fn from_grid(&self, m: usize, n: usize) -> (f32, f32) {
        (
            (m as f32 + 0.5) * self.config.resolution_x,
            (n as f32 + 0.5) * self.config.resolution_y,
        )
    }

    /// Patches stacked in a cell, ordered by ascending mean.
    pub fn cell(&self, m: usize, n: usize) -> &[SurfacePatch] {
        self.cells.get(&(m, n)).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Cells that have ever received a patch, in deterministic order.
    pub fn touched_cells(&self) -> impl Iterator<Item = CellIndex> + '_ {
        self.cells.keys().copied()
    }

    /// Number of touched cells.
    pub fn touched_count(&self) -> usize {
        self.cells.len()
    }

    /// Insert a patch into a cell in sorted position, without fusing.
    ///
    /// Used to seed prior patches; measurement integration goes through
    /// [`MlsGrid::update`] instead.
    pub fn insert(&mut self, m: usize, n: usize, patch: SurfacePatch) {
        if m >= self.config.width() || n >= self.config.height() {
            return;
        }
        let cell = self.cells.entry((m, n)).or_default();
        let idx = cell.partition_point(|p| p.mean < patch.mean);
        cell.insert(idx, patch);
    }

    /// Merge a measurement patch into a cell.
    ///
    /// The patch fuses with an overlapping neighbour if one exists
    /// (closest mean wins), cascading while the fused patch still
    /// overlaps its neighbours; otherwise it is inserted in sorted
    /// position as a new surface level.
    pub fn update(&mut self, m: usize, n: usize, patch: SurfacePatch) {
        if m >= self.config.width() || n >= self.config.height() {
            return;
        }
        let cell = self.cells.entry((m, n)).or_default();
        let idx = cell.partition_point(|p| p.mean < patch.mean);

        let below = idx
            .checked_sub(1)
            .filter(|&j| cell[j].overlaps(&patch))
            .map(|j| (j, (cell[j].mean - patch.mean).abs()));
        let above = (idx < cell.len() && cell[idx].overlaps(&patch))
            .then(|| (idx, (cell[idx].mean - patch.mean).abs()));

        let target = match (below, above) {
            (Some((j, dj)), Some((k, dk))) => Some(if dj <= dk { j } else { k }),
            (Some((j, _)), None) => Some(j),
            (None, Some((k, _))) => Some(k),
            (None, None) => None,
        };

        match target {
            Some(mut j) => {
                cell[j].merge(&patch);
                while j > 0 && cell[j].overlaps(&cell[j - 1]) {
                    let left = cell.remove(j - 1);
                    j -= 1;
                    cell[j].merge(&left);
                }
                while j + 1 < cell.len() && cell[j].overlaps(&cell[j + 1]) {
                    let right = cell.remove(j + 1);
                    cell[j].merge(&right);
                }
            }
            None => cell.insert(idx, patch),
        }
    }

    /// Find the patch in a cell matching a probe.
    ///
    /// Returns the patch whose mean is within `sigma_threshold` combined
    /// deviations of the probe mean (and within the configured gap
    /// size), breaking ties by the smallest absolute difference.
    pub fn get(
        &self,
        (m, n): CellIndex,
        probe: &SurfacePatch,
        sigma_threshold: f32,
    ) -> Option<&SurfacePatch> {
        let mut best: Option<&SurfacePatch> = None;
        let mut best_diff = f32::INFINITY;
        for patch in self.cell(m, n) {
            let diff = (patch.mean - probe.mean).abs();
            let bound = sigma_threshold * (probe.variance() + patch.variance()).sqrt();
            if diff <= bound && diff <= self.config.gap_size && diff < best_diff {
                best = Some(patch);
                best_diff = diff;
            }
        }
        best
    }

    /// Remove all patches, keeping the geometry and frame.
    pub fn clear(&mut self) {
        self.cells.clear();
    }
}
