// ============================================================================
// config.rs — Heatmask
// Static kernel parameters and the JSON configuration they are built from.
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::HeatmaskError;
use crate::headless::HeadlessConfig;
use crate::noise::NoiseTexture;

/// Largest mask edge accepted before asking the device (wgpu default limit).
pub const MAX_SURFACE_EDGE: u32 = 8192;

// ======================== Static Parameters ========================

/// Kernel configuration bound once at initialization.
#[derive(Clone, Debug)]
pub struct StaticParameters {
    /// Mask edge length in texels.
    pub surface_edge: u32,
    /// Width of the falloff band past each source's range, in world units.
    pub blend_distance: f32,
    /// Four RGBA stops, coldest first.
    pub color_stops: [[f32; 4]; 4],
    pub noise: NoiseTexture,
    /// Noise UV scale.
    pub noise_detail: f32,
    /// World extent covered by the mask ("map size").
    pub map_size: f32,
}

impl StaticParameters {
    pub fn validate(&self) -> Result<(), HeatmaskError> {
        if self.surface_edge == 0 || self.surface_edge > MAX_SURFACE_EDGE {
            return Err(HeatmaskError::config(format!(
                "surface edge {} outside 1..={}",
                self.surface_edge, MAX_SURFACE_EDGE
            )));
        }
        if !self.surface_edge.is_power_of_two() {
            log::warn!(
                "Surface edge {} is not a power of two; edge tiles will be partially idle",
                self.surface_edge
            );
        }
        if !(self.map_size.is_finite() && self.map_size > 0.0) {
            return Err(HeatmaskError::config(format!(
                "map size must be positive, got {}",
                self.map_size
            )));
        }
        if !(self.blend_distance.is_finite() && self.blend_distance >= 0.0) {
            return Err(HeatmaskError::config(format!(
                "blend distance must be non-negative, got {}",
                self.blend_distance
            )));
        }
        if !self.noise_detail.is_finite() {
            return Err(HeatmaskError::config("noise detail must be finite"));
        }
        for (i, stop) in self.color_stops.iter().enumerate() {
            if stop.iter().any(|c| !(0.0..=1.0).contains(c)) {
                return Err(HeatmaskError::config(format!(
                    "color stop {} has a channel outside [0, 1]: {:?}",
                    i, stop
                )));
            }
        }
        self.noise.validate()
    }
}

// ======================== JSON Configuration ========================

/// Where the noise texture comes from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoiseSource {
    Image { path: PathBuf },
    Generated { size: u32, seed: u64 },
}

impl Default for NoiseSource {
    fn default() -> Self {
        NoiseSource::Generated { size: 256, seed: 1 }
    }
}

impl NoiseSource {
    pub fn resolve(&self) -> Result<NoiseTexture, HeatmaskError> {
        match self {
            NoiseSource::Image { path } => NoiseTexture::load(path),
            NoiseSource::Generated { size, seed } => {
                if *size == 0 || *size > MAX_SURFACE_EDGE {
                    return Err(HeatmaskError::config(format!(
                        "generated noise size {} outside 1..={}",
                        size, MAX_SURFACE_EDGE
                    )));
                }
                Ok(NoiseTexture::generate(*size, *seed))
            }
        }
    }
}

/// On-disk configuration. Missing fields take their defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatmaskConfig {
    pub surface_edge: u32,
    pub blend_distance: f32,
    pub map_size: f32,
    pub noise_detail: f32,
    pub color_stops: [[f32; 4]; 4],
    pub noise: NoiseSource,
    pub headless: HeadlessConfig,
}

impl Default for HeatmaskConfig {
    fn default() -> Self {
        Self {
            surface_edge: 512,
            blend_distance: 6.0,
            map_size: 256.0,
            noise_detail: 3.0,
            color_stops: [
                [0.0, 0.0, 0.0, 0.0],
                [0.10, 0.25, 0.85, 0.45],
                [0.95, 0.55, 0.10, 0.75],
                [1.0, 0.95, 0.85, 1.0],
            ],
            noise: NoiseSource::default(),
            headless: HeadlessConfig::default(),
        }
    }
}

impl HeatmaskConfig {
    pub fn load(path: &Path) -> Result<Self, HeatmaskError> {
        let text = fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        log::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Resolve the noise source and check every field.
    pub fn to_static_parameters(&self) -> Result<StaticParameters, HeatmaskError> {
        let params = StaticParameters {
            surface_edge: self.surface_edge,
            blend_distance: self.blend_distance,
            color_stops: self.color_stops,
            noise: self.noise.resolve()?,
            noise_detail: self.noise_detail,
            map_size: self.map_size,
        };
        params.validate()?;
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let params = HeatmaskConfig::default().to_static_parameters().unwrap();
        assert_eq!(params.surface_edge, 512);
        assert_eq!(params.noise.width, 256);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: HeatmaskConfig = serde_json::from_str(
            r#"{ "surface_edge": 128, "noise": { "kind": "generated", "size": 16, "seed": 3 } }"#,
        )
        .unwrap();
        assert_eq!(config.surface_edge, 128);
        assert_eq!(config.map_size, 256.0);
        assert_eq!(config.noise, NoiseSource::Generated { size: 16, seed: 3 });
    }

    #[test]
    fn test_zero_edge_is_rejected() {
        let config = HeatmaskConfig {
            surface_edge: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.to_static_parameters(),
            Err(HeatmaskError::Config(_))
        ));
    }

    #[test]
    fn test_oversized_edge_is_rejected() {
        let config = HeatmaskConfig {
            surface_edge: MAX_SURFACE_EDGE * 2,
            ..Default::default()
        };
        assert!(config.to_static_parameters().is_err());
    }

    #[test]
    fn test_non_power_of_two_edge_is_accepted() {
        let config = HeatmaskConfig {
            surface_edge: 100,
            ..Default::default()
        };
        assert!(config.to_static_parameters().is_ok());
    }

    #[test]
    fn test_bad_scalars_are_rejected() {
        let bad_map = HeatmaskConfig {
            map_size: 0.0,
            ..Default::default()
        };
        let bad_blend = HeatmaskConfig {
            blend_distance: -1.0,
            ..Default::default()
        };
        let bad_noise = HeatmaskConfig {
            noise_detail: f32::NAN,
            ..Default::default()
        };
        assert!(bad_map.to_static_parameters().is_err());
        assert!(bad_blend.to_static_parameters().is_err());
        assert!(bad_noise.to_static_parameters().is_err());
    }

    #[test]
    fn test_color_channel_out_of_range_is_rejected() {
        let mut config = HeatmaskConfig::default();
        config.color_stops[2][0] = 1.5;
        assert!(matches!(
            config.to_static_parameters(),
            Err(HeatmaskError::Config(_))
        ));
    }

    #[test]
    fn test_oversized_generated_noise_is_config_error() {
        for size in [0, MAX_SURFACE_EDGE + 1, 40_000] {
            let config = HeatmaskConfig {
                noise: NoiseSource::Generated { size, seed: 1 },
                ..Default::default()
            };
            assert!(
                matches!(config.to_static_parameters(), Err(HeatmaskError::Config(_))),
                "noise size {}",
                size
            );
        }
    }

    #[test]
    fn test_missing_config_file_is_io_error() {
        let err = HeatmaskConfig::load(Path::new("no/such/heatmask.json")).unwrap_err();
        assert!(matches!(err, HeatmaskError::Io(_)));
    }
}
