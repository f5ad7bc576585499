//! Surface mapping: MLS grids, tiled maps and scan integration.

mod integrator;
mod mls_grid;
mod mls_map;

pub use integrator::{ScanIntegrator, ScanIntegratorConfig};
pub use mls_grid::{CellIndex, MlsGrid, MlsGridConfig, SurfacePatch};
pub use mls_map::MlsMap;
