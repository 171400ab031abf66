// ============================================================================
// aggregate.rs — Heatmask
// Flattens a registry snapshot into GPU-ready records, once per frame.
// ============================================================================

use bytemuck::{Pod, Zeroable};

use crate::source::RegistrySnapshot;

/// One heat source as laid out in the kernel's storage buffer.
/// Stride = 16 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct BufferRecord {
    pub position_x: f32,
    pub position_y: f32,
    pub range: f32,
    pub heat: f32,
}

pub const RECORD_STRIDE: u64 = std::mem::size_of::<BufferRecord>() as u64;

/// Build one record per source, in snapshot order.
pub fn aggregate(snapshot: &RegistrySnapshot) -> Vec<BufferRecord> {
    snapshot
        .sources()
        .iter()
        .map(|source| {
            let s = source.state();
            BufferRecord {
                position_x: s.position[0],
                position_y: s.position[1],
                range: s.range,
                heat: s.heat,
            }
        })
        .collect()
}
