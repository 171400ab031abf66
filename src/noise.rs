// ============================================================================
// noise.rs — Heatmask
// Noise texture used by the kernel to perturb heat falloff.
// ============================================================================

use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::MAX_SURFACE_EDGE;
use crate::error::HeatmaskError;

/// RGBA8 pixel data for the noise texture.
#[derive(Clone, Debug, PartialEq)]
pub struct NoiseTexture {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl NoiseTexture {
    /// Decode an image file (PNG/JPEG) into RGBA8.
    pub fn load(path: &Path) -> Result<Self, HeatmaskError> {
        let img = image::open(path)
            .map_err(|e| HeatmaskError::config(format!("cannot load noise texture {:?}: {}", path, e)))?
            .to_rgba8();
        let (width, height) = img.dimensions();
        Ok(Self {
            width,
            height,
            data: img.into_raw(),
        })
    }

    /// Seeded value noise: a coarse random lattice, bilinearly upsampled and
    /// wrapped so the texture tiles.
    pub fn generate(size: u32, seed: u64) -> Self {
        let size = size.max(1);
        let mut rng = StdRng::seed_from_u64(seed);

        let cells = (size / 8).max(2) as usize;
        let lattice: Vec<f32> = (0..cells * cells).map(|_| rng.gen::<f32>()).collect();
        let at = |x: usize, y: usize| lattice[(y % cells) * cells + (x % cells)];

        let scale = cells as f32 / size as f32;
        let mut data = Vec::with_capacity(size as usize * size as usize * 4);
        for y in 0..size {
            for x in 0..size {
                let fx = x as f32 * scale;
                let fy = y as f32 * scale;
                let (ix, iy) = (fx as usize, fy as usize);
                let (tx, ty) = (fx.fract(), fy.fract());
                let top = at(ix, iy) * (1.0 - tx) + at(ix + 1, iy) * tx;
                let bottom = at(ix, iy + 1) * (1.0 - tx) + at(ix + 1, iy + 1) * tx;
                let v = ((top * (1.0 - ty) + bottom * ty) * 255.0).round() as u8;
                data.extend_from_slice(&[v, v, v, 255]);
            }
        }

        Self {
            width: size,
            height: size,
            data,
        }
    }

    pub fn validate(&self) -> Result<(), HeatmaskError> {
        if self.width == 0 || self.height == 0 {
            return Err(HeatmaskError::config("noise texture has zero size"));
        }
        if self.width > MAX_SURFACE_EDGE || self.height > MAX_SURFACE_EDGE {
            return Err(HeatmaskError::config(format!(
                "noise texture {}x{} exceeds {} texels per side",
                self.width, self.height, MAX_SURFACE_EDGE
            )));
        }
        let expected = self.width as usize * self.height as usize * 4;
        if self.data.len() != expected {
            return Err(HeatmaskError::config(format!(
                "noise texture is {}x{} but has {} bytes (expected {})",
                self.width,
                self.height,
                self.data.len(),
                expected
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_deterministic_per_seed() {
        let a = NoiseTexture::generate(64, 7);
        let b = NoiseTexture::generate(64, 7);
        let c = NoiseTexture::generate(64, 8);
        assert_eq!(a, b);
        assert_ne!(a.data, c.data);
    }

    #[test]
    fn test_generate_has_rgba_layout() {
        let noise = NoiseTexture::generate(32, 1);
        assert_eq!(noise.width, 32);
        assert_eq!(noise.height, 32);
        assert_eq!(noise.data.len(), 32 * 32 * 4);
        assert!(noise.data.chunks_exact(4).all(|px| px[3] == 255 && px[0] == px[1]));
        assert!(noise.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_wrong_length() {
        let noise = NoiseTexture {
            width: 4,
            height: 4,
            data: vec![0; 10],
        };
        assert!(matches!(noise.validate(), Err(HeatmaskError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_dimensions() {
        let width = MAX_SURFACE_EDGE + 1;
        let noise = NoiseTexture {
            width,
            height: 1,
            data: vec![0; width as usize * 4],
        };
        assert!(matches!(noise.validate(), Err(HeatmaskError::Config(_))));
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = NoiseTexture::load(Path::new("does/not/exist.png")).unwrap_err();
        assert!(matches!(err, HeatmaskError::Config(_)));
    }
}
