// ============================================================================
// lib.rs — Heatmask
// Heat-distribution mask: heat sources are aggregated each frame, uploaded
// into a storage buffer and rasterized by a tiled compute kernel into a
// mask texture for downstream materials to sample.
// ============================================================================

pub mod aggregate;
pub mod backend;
pub mod binder;
pub mod buffers;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod export;
pub mod gpu;
pub mod headless;
pub mod heatmask;
pub mod noise;
pub mod pipeline;
pub mod source;
pub mod surface;

pub use aggregate::{aggregate, BufferRecord};
pub use backend::{ComputeBackend, DeviceResource, TileGrid};
pub use config::{HeatmaskConfig, StaticParameters};
pub use error::HeatmaskError;
pub use gpu::{MaskTexture, WgpuBackend};
pub use heatmask::{FrameStats, HeatmaskPipeline, MaskView};
pub use source::{HeatSource, RegistryHandle, SourceKey, SourceRegistry};
