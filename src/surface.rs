// ============================================================================
// surface.rs — Heatmask
// Ownership of the mask texture the kernel writes into.
// ============================================================================

use crate::backend::{ComputeBackend, DeviceResource};
use crate::error::HeatmaskError;

struct Allocated<S> {
    surface: S,
    edge: u32,
}

/// Owns the mask surface. Destroyed exactly once, including on drop.
pub struct MaskSurfaceLifecycle<S: DeviceResource> {
    allocated: Option<Allocated<S>>,
}

impl<S: DeviceResource> MaskSurfaceLifecycle<S> {
    pub fn new() -> Self {
        Self { allocated: None }
    }

    /// Allocate the surface. Repeating with the same edge keeps the existing
    /// one; a different edge replaces it (explicit reconfiguration).
    pub fn create<B>(&mut self, backend: &mut B, edge: u32) -> Result<(), HeatmaskError>
    where
        B: ComputeBackend<Surface = S>,
    {
        if self.edge() == Some(edge) {
            return Ok(());
        }
        self.destroy();
        let surface = backend.allocate_surface(edge)?;
        self.allocated = Some(Allocated { surface, edge });
        log::info!("Mask surface created: {}x{}", edge, edge);
        Ok(())
    }

    /// Release the surface if it exists. Idempotent.
    pub fn destroy(&mut self) {
        if let Some(old) = self.allocated.take() {
            old.surface.release();
            log::info!("Mask surface destroyed: {}x{}", old.edge, old.edge);
        }
    }

    /// Read-only handle for samplers and materials.
    pub fn surface(&self) -> Option<&S> {
        self.allocated.as_ref().map(|a| &a.surface)
    }

    pub fn edge(&self) -> Option<u32> {
        self.allocated.as_ref().map(|a| a.edge)
    }
}

impl<S: DeviceResource> Default for MaskSurfaceLifecycle<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: DeviceResource> Drop for MaskSurfaceLifecycle<S> {
    fn drop(&mut self) {
        self.destroy();
    }
}
