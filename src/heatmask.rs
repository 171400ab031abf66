// ============================================================================
// heatmask.rs — Heatmask
// HeatmaskPipeline: owns the registry, buffer, surface, binder and dispatcher
// and drives aggregate → sync → dispatch once per tick.
// ============================================================================

use crate::aggregate::aggregate;
use crate::backend::{ComputeBackend, TileGrid};
use crate::binder::ParameterBinder;
use crate::buffers::BufferLifecycleManager;
use crate::config::StaticParameters;
use crate::dispatch::DispatchController;
use crate::error::HeatmaskError;
use crate::source::{RegistryHandle, SourceRegistry};
use crate::surface::MaskSurfaceLifecycle;

/// What one tick did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameStats {
    pub frame: u64,
    pub source_count: u32,
    pub buffer_capacity: usize,
    pub reallocated: bool,
    pub grid: TileGrid,
}

/// Read-only view of the mask for downstream sampling.
pub struct MaskView<'a, S> {
    pub surface: &'a S,
    pub edge: u32,
    /// World extent the mask covers.
    pub map_size: f32,
}

pub struct HeatmaskPipeline<B: ComputeBackend> {
    // Declared before `backend` so device resources are released first on drop.
    buffers: BufferLifecycleManager<B::RecordBuffer>,
    surface: MaskSurfaceLifecycle<B::Surface>,
    binder: ParameterBinder,
    dispatcher: DispatchController,
    registry: SourceRegistry,
    map_size: f32,
    frame: u64,
    halted: bool,
    backend: B,
}

impl<B: ComputeBackend> HeatmaskPipeline<B> {
    /// Create the surface and bind static parameters. Any failure leaves
    /// nothing allocated.
    pub fn new(mut backend: B, params: &StaticParameters) -> Result<Self, HeatmaskError> {
        params.validate()?;

        let mut surface = MaskSurfaceLifecycle::new();
        surface.create(&mut backend, params.surface_edge)?;
        let mut binder = ParameterBinder::new();
        binder.bind_static(&mut backend, params)?;

        log::info!(
            "Heatmask pipeline initialized: {}x{} mask over {} world units",
            params.surface_edge,
            params.surface_edge,
            params.map_size
        );

        Ok(Self {
            buffers: BufferLifecycleManager::new(),
            surface,
            binder,
            dispatcher: DispatchController::new(),
            registry: SourceRegistry::new(),
            map_size: params.map_size,
            frame: 0,
            halted: false,
            backend,
        })
    }

    /// Registration entry point to hand to heat sources.
    pub fn registration_handle(&self) -> RegistryHandle {
        self.registry.handle()
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Aggregate sources, sync the buffer and submit the kernel.
    ///
    /// Any error halts the pipeline; later ticks fail without dispatching.
    pub fn tick(&mut self) -> Result<FrameStats, HeatmaskError> {
        if self.halted {
            return Err(HeatmaskError::usage("pipeline halted after a previous error"));
        }
        let result = self.run_frame();
        if let Err(e) = &result {
            self.halted = true;
            log::error!("Heatmask halted at frame {}: {}", self.frame, e);
        }
        result
    }

    fn run_frame(&mut self) -> Result<FrameStats, HeatmaskError> {
        let records = aggregate(&self.registry.snapshot());

        let synced = self.buffers.sync(&mut self.backend, &records)?;
        let source_count = synced.count;
        let buffer_capacity = synced.capacity;
        let reallocated = synced.reallocated;

        let grid = self
            .dispatcher
            .dispatch(&mut self.backend, &self.binder, synced, &self.surface)?;

        let stats = FrameStats {
            frame: self.frame,
            source_count,
            buffer_capacity,
            reallocated,
            grid,
        };
        self.frame += 1;
        Ok(stats)
    }

    /// Apply new static parameters: recreate the surface if its size
    /// changed and rebind. Clears a halt on success.
    pub fn reconfigure(&mut self, params: &StaticParameters) -> Result<(), HeatmaskError> {
        params.validate()?;
        self.halted = true;
        self.surface.create(&mut self.backend, params.surface_edge)?;
        self.binder.bind_static(&mut self.backend, params)?;
        self.map_size = params.map_size;
        self.halted = false;
        log::info!("Heatmask pipeline reconfigured: edge={}", params.surface_edge);
        Ok(())
    }

    /// Drop every registered source (scene reload). Existing handles stop working.
    pub fn reset_sources(&mut self) {
        self.registry.reset();
    }

    pub fn mask(&self) -> Option<MaskView<'_, B::Surface>> {
        match (self.surface.surface(), self.surface.edge()) {
            (Some(surface), Some(edge)) => Some(MaskView {
                surface,
                edge,
                map_size: self.map_size,
            }),
            _ => None,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Release the buffer and surface and hand back the backend.
    pub fn teardown(mut self) -> B {
        self.buffers.release();
        self.surface.destroy();
        log::info!("Heatmask pipeline torn down after {} frames", self.frame);
        // Every field but `backend` is already empty; dropping them is a no-op.
        let Self { backend, .. } = self;
        backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::RecordingBackend;
    use crate::config::HeatmaskConfig;
    use crate::source::HeatSource;

    fn params(edge: u32) -> StaticParameters {
        HeatmaskConfig {
            surface_edge: edge,
            ..Default::default()
        }
        .to_static_parameters()
        .unwrap()
    }

    #[test]
    fn test_new_binds_once_and_creates_surface() {
        let (backend, ledger) = RecordingBackend::new();
        let pipeline = HeatmaskPipeline::new(backend, &params(128)).unwrap();

        let ledger = ledger.borrow();
        assert_eq!(ledger.static_binds, 1);
        assert_eq!(ledger.surfaces_allocated, vec![128]);
        let mask = pipeline.mask().unwrap();
        assert_eq!(mask.edge, 128);
        assert_eq!(mask.map_size, 256.0);
    }

    #[test]
    fn test_failed_init_releases_surface() {
        let (backend, ledger) = RecordingBackend::new();
        ledger.borrow_mut().fail_static_bind = true;
        assert!(matches!(
            HeatmaskPipeline::new(backend, &params(128)),
            Err(HeatmaskError::ResourceExhausted { .. })
        ));

        let ledger = ledger.borrow();
        assert_eq!(ledger.surfaces_allocated, vec![128]);
        assert_eq!(ledger.live_surfaces(), 0);
        assert_eq!(ledger.static_binds, 0);
    }

    #[test]
    fn test_invalid_params_allocate_nothing() {
        let (backend, ledger) = RecordingBackend::new();
        let mut bad = params(128);
        bad.noise.data.pop();
        assert!(matches!(
            HeatmaskPipeline::new(backend, &bad),
            Err(HeatmaskError::Config(_))
        ));
        assert!(ledger.borrow().surfaces_allocated.is_empty());
    }

    #[test]
    fn test_empty_registry_dispatches_with_capacity_one() {
        let (backend, ledger) = RecordingBackend::new();
        let mut pipeline = HeatmaskPipeline::new(backend, &params(100)).unwrap();

        let stats = pipeline.tick().unwrap();
        assert_eq!(stats.source_count, 0);
        assert_eq!(stats.buffer_capacity, 1);
        assert_eq!(stats.grid, TileGrid { x: 13, y: 13 });
        assert_eq!(ledger.borrow().dispatches.len(), 1);
    }

    #[test]
    fn test_ticks_track_sources_between_frames() {
        let (backend, ledger) = RecordingBackend::new();
        let mut pipeline = HeatmaskPipeline::new(backend, &params(64)).unwrap();
        let handle = pipeline.registration_handle();

        let a = HeatSource::new([0.0, 0.0], 1.0, 10.0);
        let b = HeatSource::new([5.0, 5.0], 2.0, 20.0);
        let c = HeatSource::new([-3.0, 2.0], 3.0, 30.0);
        handle.register(&a).unwrap();
        let key_b = handle.register(&b).unwrap();
        handle.register(&c).unwrap();

        let first = pipeline.tick().unwrap();
        assert_eq!(first.source_count, 3);
        assert!(first.reallocated);

        b.set_heat(99.0);
        let second = pipeline.tick().unwrap();
        assert!(!second.reallocated);

        pipeline.registry().deregister(key_b);
        let third = pipeline.tick().unwrap();
        assert_eq!(third.source_count, 2);
        assert!(third.reallocated);
        assert_eq!(third.frame, 2);

        let ledger = ledger.borrow();
        assert_eq!(ledger.uploads[1].1[1].heat, 99.0);
        assert_eq!(ledger.uploads[2].1.len(), 2);
        for d in &ledger.dispatches {
            assert_eq!(d.buffer_capacity, (d.source_count as usize).max(1));
        }
        assert_eq!(ledger.live_buffers(), 1);
    }

    #[test]
    fn test_error_halts_pipeline() {
        let (backend, ledger) = RecordingBackend::new();
        let mut pipeline = HeatmaskPipeline::new(backend, &params(64)).unwrap();
        pipeline.tick().unwrap();

        let s = HeatSource::new([1.0, 1.0], 1.0, 1.0);
        pipeline.registration_handle().register(&s).unwrap();
        ledger.borrow_mut().fail_buffer_alloc = true;
        assert!(matches!(
            pipeline.tick(),
            Err(HeatmaskError::ResourceExhausted { .. })
        ));
        assert!(pipeline.is_halted());

        ledger.borrow_mut().fail_buffer_alloc = false;
        assert!(matches!(pipeline.tick(), Err(HeatmaskError::Usage(_))));
        assert_eq!(ledger.borrow().dispatches.len(), 1);
    }

    #[test]
    fn test_reconfigure_resizes_surface_and_rebinds() {
        let (backend, ledger) = RecordingBackend::new();
        let mut pipeline = HeatmaskPipeline::new(backend, &params(64)).unwrap();
        pipeline.tick().unwrap();

        pipeline.reconfigure(&params(256)).unwrap();
        let stats = pipeline.tick().unwrap();
        assert_eq!(stats.grid, TileGrid { x: 32, y: 32 });

        let ledger = ledger.borrow();
        assert_eq!(ledger.static_binds, 2);
        assert_eq!(ledger.surfaces_allocated, vec![64, 256]);
        assert_eq!(ledger.live_surfaces(), 1);
    }

    #[test]
    fn test_reset_sources_invalidates_old_handles() {
        let (backend, _ledger) = RecordingBackend::new();
        let mut pipeline = HeatmaskPipeline::new(backend, &params(64)).unwrap();
        let old = pipeline.registration_handle();
        let s = HeatSource::new([0.0, 0.0], 1.0, 1.0);
        old.register(&s).unwrap();

        pipeline.reset_sources();
        assert!(old.register(&s).is_err());
        assert_eq!(pipeline.tick().unwrap().source_count, 0);
    }

    #[test]
    fn test_teardown_and_drop_release_everything() {
        let (backend, ledger) = RecordingBackend::new();
        let mut pipeline = HeatmaskPipeline::new(backend, &params(64)).unwrap();
        let s = HeatSource::new([0.0, 0.0], 1.0, 1.0);
        pipeline.registration_handle().register(&s).unwrap();
        pipeline.tick().unwrap();
        pipeline.teardown();
        {
            let l = ledger.borrow();
            assert_eq!(l.live_buffers(), 0);
            assert_eq!(l.live_surfaces(), 0);
        }

        let (backend, ledger) = RecordingBackend::new();
        {
            let mut pipeline = HeatmaskPipeline::new(backend, &params(64)).unwrap();
            pipeline.tick().unwrap();
        }
        let l = ledger.borrow();
        assert_eq!(l.live_buffers(), 0);
        assert_eq!(l.surfaces_released.len(), 1);
    }
}
