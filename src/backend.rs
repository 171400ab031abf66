// ============================================================================
// backend.rs — Heatmask
// Device seam: what the pipeline needs from a GPU to run the heat kernel.
// ============================================================================

use crate::aggregate::BufferRecord;
use crate::config::StaticParameters;
use crate::error::HeatmaskError;

/// A device allocation that is explicitly released when its owner lets go.
///
/// `release` consumes the handle, so a resource cannot be released twice.
/// Work already submitted against it must stay valid; wgpu guarantees this.
pub trait DeviceResource {
    fn release(self);
}

/// Work-group counts along each axis of the mask.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TileGrid {
    pub x: u32,
    pub y: u32,
}

/// Everything bound for one kernel invocation.
pub struct DispatchJob<'a, R, S> {
    pub records: &'a R,
    /// Elements the bound buffer holds; `max(1, source_count)`.
    pub record_capacity: usize,
    pub source_count: u32,
    pub surface: &'a S,
    pub grid: TileGrid,
}

pub trait ComputeBackend {
    type RecordBuffer: DeviceResource;
    type Surface: DeviceResource;

    /// Allocate a storage buffer holding exactly `capacity` records.
    fn allocate_records(&mut self, capacity: usize) -> Result<Self::RecordBuffer, HeatmaskError>;

    /// Write `records` at the start of `buffer`.
    fn upload_records(&mut self, buffer: &Self::RecordBuffer, records: &[BufferRecord]);

    /// Allocate a square mask surface with storage-write access.
    fn allocate_surface(&mut self, edge: u32) -> Result<Self::Surface, HeatmaskError>;

    /// Push the static kernel parameters. Called at init, not per frame.
    fn bind_static(&mut self, params: &StaticParameters) -> Result<(), HeatmaskError>;

    /// Submit the kernel without waiting for it to finish.
    fn dispatch(
        &mut self,
        job: DispatchJob<'_, Self::RecordBuffer, Self::Surface>,
    ) -> Result<(), HeatmaskError>;
}
