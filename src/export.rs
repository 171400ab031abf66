// ============================================================================
// export.rs — Heatmask
// PNG export of a mask read back from the GPU.
// ============================================================================

use std::fs;
use std::path::Path;

use crate::error::HeatmaskError;

/// Write tightly packed RGBA8 mask pixels to a PNG file.
pub fn save_mask_png(path: &Path, edge: u32, rgba: &[u8]) -> Result<(), HeatmaskError> {
    let expected = edge as usize * edge as usize * 4;
    if rgba.len() != expected {
        return Err(HeatmaskError::Readback(format!(
            "mask readback has {} bytes, expected {} for {}x{}",
            rgba.len(),
            expected,
            edge,
            edge
        )));
    }

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    image::save_buffer(path, rgba, edge, edge, image::ColorType::Rgba8)?;
    log::info!("Mask saved: {:?}", path);
    Ok(())
}
