// ============================================================================
// binder.rs — Heatmask
// One-time binding of static parameters to the kernel.
// ============================================================================

use crate::backend::ComputeBackend;
use crate::config::StaticParameters;
use crate::error::HeatmaskError;

/// Tracks whether the kernel's static parameters have been pushed.
#[derive(Debug, Default)]
pub struct ParameterBinder {
    bound_edge: Option<u32>,
    binds: u32,
}

impl ParameterBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and bind every static parameter.
    ///
    /// Meant to run once before the first dispatch. Binding again is allowed
    /// but the pipeline should be reconfigured instead.
    pub fn bind_static<B: ComputeBackend>(
        &mut self,
        backend: &mut B,
        params: &StaticParameters,
    ) -> Result<(), HeatmaskError> {
        params.validate()?;
        if self.is_bound() {
            log::warn!("Static parameters re-bound mid-run; prefer HeatmaskPipeline::reconfigure");
        }
        // Unbound until the backend accepts the new values.
        self.bound_edge = None;
        backend.bind_static(params)?;
        self.bound_edge = Some(params.surface_edge);
        self.binds += 1;
        log::info!(
            "Static parameters bound: edge={}, map_size={}, blend={}, noise {}x{} (detail {})",
            params.surface_edge,
            params.map_size,
            params.blend_distance,
            params.noise.width,
            params.noise.height,
            params.noise_detail,
        );
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.bound_edge.is_some()
    }

    /// Surface edge the kernel was told about.
    pub fn bound_edge(&self) -> Option<u32> {
        self.bound_edge
    }

    pub fn bind_count(&self) -> u32 {
        self.binds
    }
}
