// ============================================================================
// dispatch.rs — Heatmask
// Tile-grid computation and kernel invocation.
// ============================================================================

use crate::backend::{ComputeBackend, DispatchJob, TileGrid};
use crate::binder::ParameterBinder;
use crate::buffers::SyncedRecords;
use crate::error::HeatmaskError;
use crate::surface::MaskSurfaceLifecycle;

/// Work-group edge; must equal `@workgroup_size` in `shaders/heat_mask.wgsl`.
pub const TILE_SIZE: u32 = 8;

/// Tiles per axis needed to cover a square surface.
pub fn tile_grid(edge: u32) -> TileGrid {
    let n = (edge + TILE_SIZE - 1) / TILE_SIZE;
    TileGrid { x: n, y: n }
}

/// Issues the heat kernel once per frame.
#[derive(Debug, Default)]
pub struct DispatchController {
    dispatches: u64,
}

impl DispatchController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind this frame's records and count, then submit over the whole surface.
    pub fn dispatch<B: ComputeBackend>(
        &mut self,
        backend: &mut B,
        binder: &ParameterBinder,
        synced: SyncedRecords<'_, B::RecordBuffer>,
        surface: &MaskSurfaceLifecycle<B::Surface>,
    ) -> Result<TileGrid, HeatmaskError> {
        let bound_edge = binder
            .bound_edge()
            .ok_or_else(|| HeatmaskError::usage("dispatch before static parameters are bound"))?;
        let (target, edge) = match (surface.surface(), surface.edge()) {
            (Some(target), Some(edge)) => (target, edge),
            _ => return Err(HeatmaskError::usage("dispatch without a mask surface")),
        };
        if edge != bound_edge {
            return Err(HeatmaskError::usage(format!(
                "mask surface is {}x{} but the kernel was bound for {}",
                edge, edge, bound_edge
            )));
        }

        let grid = tile_grid(edge);
        backend.dispatch(DispatchJob {
            records: synced.buffer,
            record_capacity: synced.capacity,
            source_count: synced.count,
            surface: target,
            grid,
        })?;
        self.dispatches += 1;
        Ok(grid)
    }

    pub fn dispatch_count(&self) -> u64 {
        self.dispatches
    }
}
